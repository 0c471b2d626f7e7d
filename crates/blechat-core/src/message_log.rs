//! Append-only message log
//!
//! Every state machine transition that the user should see ends up here.
//! Entries are numbered in arrival order and never edited; the log is only
//! ever cleared as a whole when a new central session begins.

use tokio::sync::watch;

use crate::types::{Message, MessageKind, Origin};

/// Writer side of the log; readers subscribe for snapshots
#[derive(Debug)]
pub struct MessageLog {
    entries: watch::Sender<Vec<Message>>,
    next_seq: u64,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        let (entries, _) = watch::channel(Vec::new());
        Self {
            entries,
            next_seq: 0,
        }
    }

    /// Append an entry and return its sequence number
    pub fn append(&mut self, text: impl Into<String>, origin: Origin, kind: MessageKind) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let message = Message {
            seq,
            text: text.into(),
            origin,
            kind,
        };
        self.entries.send_modify(|entries| entries.push(message));
        seq
    }

    /// A chat line this device sent
    pub fn sent(&mut self, text: impl Into<String>) -> u64 {
        self.append(text, Origin::Local, MessageKind::Chat)
    }

    /// A chat line the remote side sent
    pub fn received(&mut self, text: impl Into<String>) -> u64 {
        self.append(text, Origin::Remote, MessageKind::Chat)
    }

    pub fn info(&mut self, text: impl Into<String>) -> u64 {
        self.append(text, Origin::Local, MessageKind::Info)
    }

    pub fn error(&mut self, text: impl Into<String>) -> u64 {
        self.append(text, Origin::Local, MessageKind::Error)
    }

    /// Drop every entry; sequence numbers keep counting up
    pub fn clear(&mut self) {
        self.entries.send_modify(Vec::clear);
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.entries.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_orders_and_tags() {
        let mut log = MessageLog::new();
        log.info("Connecting to AA:BB ...");
        log.sent("hi");
        log.received("hello");
        log.error("Send failed");

        let entries = log.snapshot();
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries.iter().map(|m| m.seq).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(entries[1].from_self() && entries[1].is_chat());
        assert!(!entries[2].from_self());
        assert!(entries[3].is_error());
    }

    #[test]
    fn test_clear_keeps_counting() {
        let mut log = MessageLog::new();
        log.info("a");
        log.info("b");
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.info("c"), 2);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_observer_sees_whole_snapshots() {
        let mut log = MessageLog::new();
        let mut observer = log.subscribe();
        log.sent("one");
        log.sent("two");
        let seen = observer.borrow_and_update().clone();
        assert_eq!(seen.len(), 2);
        assert!(!observer.has_changed().unwrap());
    }
}
