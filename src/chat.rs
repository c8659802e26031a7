//! Append-only chat log, ordered by receipt.
//!
//! The server fans every chat message out to all participants, sender
//! included, so entries are appended only on receipt — there is no local
//! echo and no reordering.

use std::sync::Mutex;

use protocol::ChatEntry;

#[derive(Default)]
pub struct ChatLog {
    entries: Mutex<Vec<ChatEntry>>,
}

impl ChatLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: ChatEntry) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(entry);
    }

    /// All entries so far, in receipt order.
    #[must_use]
    pub fn entries(&self) -> Vec<ChatEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(from: &str, text: &str, at: i64) -> ChatEntry {
        ChatEntry {
            from_player_id: from.to_owned(),
            text: text.to_owned(),
            received_at: at,
        }
    }

    #[test]
    fn entries_keep_receipt_order() {
        let log = ChatLog::new();
        assert!(log.is_empty());

        log.append(entry("p2", "glhf", 10));
        log.append(entry("p1", "you too", 20));

        let entries = log.entries();
        assert_eq!(log.len(), 2);
        assert_eq!(entries[0].text, "glhf");
        assert_eq!(entries[1].text, "you too");
    }
}
