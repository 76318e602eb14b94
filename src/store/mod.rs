//! In-memory short message store.
//!
//! Volatile append/enumerate log of messages the simulator has accepted.
//! No eviction; everything is lost on restart, which is the point of a
//! test simulator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::debug;

/// One accepted short message.
#[derive(Debug, Clone)]
pub struct ShortMessage {
    /// Simulator-assigned message id, echoed in submit_sm_resp.
    pub message_id: String,
    /// System id of the submitting client.
    pub system_id: String,
    pub source_addr: String,
    pub dest_addr: String,
    /// Message text, decoded leniently for display.
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl fmt::Display for ShortMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} -> {}: {}",
            self.received_at.format("%Y-%m-%d %H:%M:%S"),
            self.system_id,
            self.source_addr,
            self.dest_addr,
            self.text
        )
    }
}

/// Thread-safe message log.
pub struct ShortMessageStore {
    messages: RwLock<Vec<ShortMessage>>,
    next_id: AtomicU64,
}

impl ShortMessageStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a message and return its assigned id.
    pub fn record(
        &self,
        system_id: &str,
        source_addr: &str,
        dest_addr: &str,
        text: String,
    ) -> String {
        let message_id = format!("{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        let message = ShortMessage {
            message_id: message_id.clone(),
            system_id: system_id.to_string(),
            source_addr: source_addr.to_string(),
            dest_addr: dest_addr.to_string(),
            text,
            received_at: Utc::now(),
        };

        debug!(
            message_id = %message.message_id,
            system_id = %message.system_id,
            "message recorded"
        );

        self.messages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        message_id
    }

    /// All messages in arrival order.
    pub fn all(&self) -> Vec<ShortMessage> {
        self.messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.messages.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for ShortMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_enumerate() {
        let store = ShortMessageStore::new();

        let first = store.record("alice", "1000", "2000", "hello".into());
        let second = store.record("bob", "2000", "1000", "hi back".into());
        assert_ne!(first, second);

        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].system_id, "alice");
        assert_eq!(all[0].text, "hello");
        assert_eq!(all[1].system_id, "bob");
    }

    #[test]
    fn test_ids_are_sequential() {
        let store = ShortMessageStore::new();
        assert_eq!(store.record("a", "1", "2", "x".into()), "1");
        assert_eq!(store.record("a", "1", "2", "y".into()), "2");
        assert_eq!(store.count(), 2);
    }
}
