//! Terminal output helpers shared by the commands

use blechat_core::{Message, Peer};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What a line typed at the prompt asks for
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Status,
    Quit,
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Self::Empty,
            "/quit" => Self::Quit,
            "/status" => Self::Status,
            _ => Self::Send(line.to_string()),
        }
    }
}

/// Lines from standard input
pub fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Entries with a sequence number above `after`
pub fn new_entries(messages: &[Message], after: Option<u64>) -> Vec<&Message> {
    messages
        .iter()
        .filter(|m| after.map_or(true, |seq| m.seq > seq))
        .collect()
}

/// Print every log entry as it is appended, prefixed with `label`
pub fn follow_log(label: &'static str, mut log: watch::Receiver<Vec<Message>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = None;
        loop {
            {
                let messages = log.borrow_and_update();
                for message in new_entries(&messages, last) {
                    println!("[{}] {}", label, message);
                    last = Some(message.seq);
                }
            }
            if log.changed().await.is_err() {
                break;
            }
        }
    })
}

pub fn print_peers(peers: &[Peer]) {
    println!("{:<24} {:<20} {:>5}", "NAME", "ADDRESS", "RSSI");
    for peer in peers {
        println!(
            "{:<24} {:<20} {:>5}",
            peer.display_name(),
            peer.address.as_str(),
            peer.rssi
        );
    }
}

#[cfg(test)]
mod tests {
    use blechat_core::{MessageKind, Origin};

    use super::*;

    fn entry(seq: u64) -> Message {
        Message {
            seq,
            text: format!("line {}", seq),
            origin: Origin::Local,
            kind: MessageKind::Info,
        }
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse(" /status "), Input::Status);
        assert_eq!(Input::parse("   "), Input::Empty);
        assert_eq!(Input::parse("hi there"), Input::Send("hi there".into()));
    }

    #[test]
    fn test_new_entries_skip_printed() {
        let log = vec![entry(4), entry(5), entry(6)];
        assert_eq!(new_entries(&log, None).len(), 3);
        let fresh: Vec<u64> = new_entries(&log, Some(4)).iter().map(|m| m.seq).collect();
        assert_eq!(fresh, vec![5, 6]);
        assert!(new_entries(&log, Some(6)).is_empty());
    }
}
