//! Presentation helpers: day separators, inbox previews, sizes and times.
//!
//! Everything takes `now` and a UTC offset explicitly so output does not
//! depend on the machine running it.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

use scoutlink_shared::constants::{SYSTEM_KEY_BLOCKED, SYSTEM_KEY_UNBLOCKED};
use scoutlink_shared::protocol::LastMessagePreview;
use scoutlink_shared::{MessageKind, MessagePayload};

use crate::reconciler::Entry;

const MAX_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayLabel {
    Today,
    Yesterday,
    Date(NaiveDate),
}

impl std::fmt::Display for DayLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DayLabel::Today => f.write_str("Today"),
            DayLabel::Yesterday => f.write_str("Yesterday"),
            DayLabel::Date(date) => write!(f, "{}", date.format("%b %d, %Y")),
        }
    }
}

pub fn day_label(at: DateTime<Utc>, now: DateTime<Utc>, offset: FixedOffset) -> DayLabel {
    let day = at.with_timezone(&offset).date_naive();
    let today = now.with_timezone(&offset).date_naive();
    if day == today {
        DayLabel::Today
    } else if today.pred_opt() == Some(day) {
        DayLabel::Yesterday
    } else {
        DayLabel::Date(day)
    }
}

/// A run of consecutive entries sharing a local calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup<'a> {
    pub label: DayLabel,
    pub entries: Vec<&'a Entry>,
}

/// Split the thread at day boundaries, keeping list order.
pub fn group_by_day<'a>(
    entries: &'a [Entry],
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Vec<DayGroup<'a>> {
    let mut groups: Vec<DayGroup<'a>> = Vec::new();
    for entry in entries {
        let label = day_label(entry.created_at, now, offset);
        match groups.last_mut() {
            Some(group) if group.label == label => group.entries.push(entry),
            _ => groups.push(DayGroup {
                label,
                entries: vec![entry],
            }),
        }
    }
    groups
}

/// "2.4 MB" style sizes.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    if elapsed < Duration::minutes(1) {
        "Just now".to_string()
    } else if elapsed < Duration::hours(1) {
        format!("{} min ago", elapsed.num_minutes())
    } else if elapsed < Duration::days(1) {
        format!("{} h ago", elapsed.num_hours())
    } else if elapsed.num_days() == 1 {
        "Yesterday".to_string()
    } else if elapsed.num_days() < 7 {
        format!("{} days ago", elapsed.num_days())
    } else {
        at.format("%b %d, %Y").to_string()
    }
}

/// Cut at a character boundary and add an ellipsis.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

fn system_text(key: &str) -> String {
    match key {
        SYSTEM_KEY_BLOCKED => "Conversation blocked".to_string(),
        SYSTEM_KEY_UNBLOCKED => "Conversation unblocked".to_string(),
        other => other.to_string(),
    }
}

/// One-line summary of a message payload.
pub fn payload_preview(payload: &MessagePayload) -> String {
    match payload {
        MessagePayload::Text(text) => truncate(text, MAX_PREVIEW_CHARS),
        MessagePayload::File(file) => {
            format!("📎 {} ({})", file.name, format_file_size(file.size))
        }
        MessagePayload::PlayerReference(_) => "Shared a player profile".to_string(),
        MessagePayload::System(key) => system_text(key),
    }
}

/// Inbox row preview.
pub fn last_message_preview(last: Option<&LastMessagePreview>) -> String {
    let Some(last) = last else {
        return "No messages yet".to_string();
    };
    match last.kind {
        MessageKind::Text => truncate(last.preview.as_deref().unwrap_or_default(), MAX_PREVIEW_CHARS),
        MessageKind::File => format!("📎 {}", last.preview.as_deref().unwrap_or("Attachment")),
        MessageKind::PlayerReference => "Shared a player profile".to_string(),
        MessageKind::System => system_text(last.preview.as_deref().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scoutlink_shared::{FileMeta, UserId};

    use crate::reconciler::Reconciler;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_day_label_uses_local_offset() {
        let now = utc(2026, 3, 10, 12, 0);
        let utc_offset = FixedOffset::east_opt(0).unwrap();
        let plus_three = FixedOffset::east_opt(3 * 3600).unwrap();

        assert_eq!(day_label(utc(2026, 3, 10, 1, 0), now, utc_offset), DayLabel::Today);
        assert_eq!(day_label(utc(2026, 3, 9, 22, 0), now, utc_offset), DayLabel::Yesterday);
        // 22:00 UTC on the 9th is already the 10th at UTC+3.
        assert_eq!(day_label(utc(2026, 3, 9, 22, 0), now, plus_three), DayLabel::Today);
        assert_eq!(
            day_label(utc(2026, 3, 1, 9, 0), now, utc_offset).to_string(),
            "Mar 01, 2026"
        );
    }

    #[test]
    fn test_group_by_day_keeps_order() {
        let conversation = scoutlink_shared::ConversationId::new();
        let sender = UserId::new();
        let mut reconciler = Reconciler::new(Duration::seconds(5));
        for at in [
            utc(2026, 3, 9, 10, 0),
            utc(2026, 3, 9, 18, 0),
            utc(2026, 3, 10, 8, 0),
        ] {
            reconciler.push_pending(conversation, sender, MessagePayload::Text("x".into()), at);
        }

        let groups = group_by_day(
            reconciler.entries(),
            utc(2026, 3, 10, 12, 0),
            FixedOffset::east_opt(0).unwrap(),
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, DayLabel::Yesterday);
        assert_eq!(groups[0].entries.len(), 2);
        assert_eq!(groups[1].label, DayLabel::Today);
    }

    #[test]
    fn test_file_sizes() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(10 * 1024 * 1024), "10.0 MB");
    }

    #[test]
    fn test_relative_time() {
        let now = utc(2026, 3, 10, 12, 0);
        assert_eq!(format_relative_time(now, now), "Just now");
        assert_eq!(format_relative_time(utc(2026, 3, 10, 11, 15), now), "45 min ago");
        assert_eq!(format_relative_time(utc(2026, 3, 10, 9, 0), now), "3 h ago");
        assert_eq!(format_relative_time(utc(2026, 3, 9, 9, 0), now), "Yesterday");
        assert_eq!(format_relative_time(utc(2026, 2, 1, 9, 0), now), "Feb 01, 2026");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("  short  ", 10), "short");
        assert_eq!(truncate("ééééééé", 4), "ééé…");
    }

    #[test]
    fn test_previews() {
        let file = MessagePayload::File(FileMeta {
            url: "c/f.pdf".into(),
            name: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 2048,
        });
        assert_eq!(payload_preview(&file), "📎 report.pdf (2.0 KB)");
        assert_eq!(
            payload_preview(&MessagePayload::System(SYSTEM_KEY_BLOCKED.into())),
            "Conversation blocked"
        );
        assert_eq!(last_message_preview(None), "No messages yet");

        let last = LastMessagePreview {
            kind: MessageKind::Text,
            preview: Some("See you at the match".into()),
            sender_id: UserId::new(),
            created_at: Utc::now(),
        };
        assert_eq!(last_message_preview(Some(&last)), "See you at the match");
    }
}
