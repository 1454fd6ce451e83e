//! Client-side view of a conversation's block state.
//!
//! A block by either party stops sending for both; only academy admins may
//! toggle, and only the imposer may lift their own block.  The server remains
//! authoritative: this gate only saves a round trip and keeps the composer
//! state in sync with system messages seen on the realtime channel.

use scoutlink_shared::constants::{SYSTEM_KEY_BLOCKED, SYSTEM_KEY_UNBLOCKED};
use scoutlink_shared::protocol::{BlockAction, BlockRecord, BlockState};
use scoutlink_shared::{ConversationId, Message, MessagePayload, Role, UserId};

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ModerationGate {
    conversation_id: ConversationId,
    viewer: UserId,
    role: Role,
    blocks: Vec<BlockRecord>,
    /// Blocked according to a rejected send, imposer unknown.
    blocked_unattributed: bool,
}

impl ModerationGate {
    pub fn new(conversation_id: ConversationId, viewer: UserId, role: Role) -> Self {
        Self {
            conversation_id,
            viewer,
            role,
            blocks: Vec::new(),
            blocked_unattributed: false,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocks.is_empty() || self.blocked_unattributed
    }

    pub fn blocked_by_me(&self) -> bool {
        self.blocks.iter().any(|b| b.blocked_by == self.viewer)
    }

    pub fn can_toggle(&self) -> bool {
        self.role.can_moderate()
    }

    /// The action a toggle would perform.
    pub fn next_action(&self) -> BlockAction {
        if self.blocked_by_me() {
            BlockAction::Unblock
        } else {
            BlockAction::Block
        }
    }

    /// Reject a send before any network call when the thread is blocked.
    pub fn check_send(&self) -> Result<(), ClientError> {
        if self.is_blocked() {
            Err(ClientError::Blocked)
        } else {
            Ok(())
        }
    }

    /// Adopt the server's state.
    pub fn update(&mut self, state: BlockState) {
        self.blocked_unattributed = state.blocked && state.blocks.is_empty();
        self.blocks = state.blocks;
    }

    /// A send came back `ConversationBlocked`.
    pub fn mark_blocked(&mut self) {
        if self.blocks.is_empty() {
            self.blocked_unattributed = true;
        }
    }

    /// Follow block/unblock system messages.  Returns `true` if the state
    /// changed.
    pub fn observe(&mut self, message: &Message) -> bool {
        let MessagePayload::System(key) = &message.payload else {
            return false;
        };
        if message.conversation_id != self.conversation_id {
            return false;
        }

        let was_blocked = self.is_blocked();
        match key.as_str() {
            SYSTEM_KEY_BLOCKED => {
                if !self.blocks.iter().any(|b| b.blocked_by == message.sender_id) {
                    self.blocks.push(BlockRecord {
                        conversation_id: self.conversation_id,
                        blocked_by: message.sender_id,
                        created_at: message.created_at,
                    });
                }
                self.blocked_unattributed = false;
            }
            SYSTEM_KEY_UNBLOCKED => {
                self.blocks.retain(|b| b.blocked_by != message.sender_id);
                self.blocked_unattributed = false;
            }
            _ => return false,
        }
        was_blocked != self.is_blocked()
    }
}
