/// Scroll policy for messages that arrive from the other party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    near_bottom: bool,
    unseen: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportAction {
    /// Follow the new message and mark it read.
    ScrollAndMarkRead,
    /// Leave the scroll position alone and show "N new messages".
    ShowBadge(u32),
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            near_bottom: true,
            unseen: 0,
        }
    }
}

impl Viewport {
    pub fn near_bottom(&self) -> bool {
        self.near_bottom
    }

    pub fn unseen(&self) -> u32 {
        self.unseen
    }

    pub fn on_remote_appended(&mut self) -> ViewportAction {
        if self.near_bottom {
            ViewportAction::ScrollAndMarkRead
        } else {
            self.unseen += 1;
            ViewportAction::ShowBadge(self.unseen)
        }
    }

    /// Returns `true` when reaching the bottom should mark the badge's
    /// messages read.
    pub fn set_near_bottom(&mut self, near_bottom: bool) -> bool {
        self.near_bottom = near_bottom;
        if near_bottom && self.unseen > 0 {
            self.unseen = 0;
            return true;
        }
        false
    }
}
