//! Outbound message buffering while the socket is not open.

use std::collections::VecDeque;

use tokio_util::sync::CancellationToken;

/// Default number of messages held while disconnected.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// A queuing strategy for messages sent while the socket is not open.
///
/// The socket only relies on this contract, so any strategy (bounded FIFO,
/// drop-oldest, priority queue, ...) can be plugged in.
pub trait MessageBuffer: Send {
    /// Enqueue a payload. Returns `false` if the buffer refused it.
    fn push(&mut self, payload: String, cancel: Option<CancellationToken>) -> bool;

    /// Dequeue the next live payload, discarding cancelled entries on the way.
    fn shift(&mut self) -> Option<String>;

    /// Drop everything.
    fn clear(&mut self);

    /// Number of entries currently held, cancelled or not.
    fn len(&self) -> usize;

    /// `true` when nothing is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A payload waiting for the next connection.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    /// Serialized frame.
    pub payload: String,
    /// Set when the sender no longer wants the message delivered.
    pub cancel: Option<CancellationToken>,
}

impl BufferedMessage {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Bounded first-in first-out buffer. Pushes beyond capacity are rejected.
#[derive(Debug)]
pub struct FifoMessageBuffer {
    entries: VecDeque<BufferedMessage>,
    capacity: usize,
}

impl FifoMessageBuffer {
    /// Create a buffer holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Maximum number of held messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FifoMessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl MessageBuffer for FifoMessageBuffer {
    fn push(&mut self, payload: String, cancel: Option<CancellationToken>) -> bool {
        if self.entries.len() >= self.capacity {
            // Cancelled entries would be skipped anyway; reclaim their slots.
            self.entries.retain(|entry| !entry.is_cancelled());
        }
        if self.entries.len() >= self.capacity {
            tracing::warn!(
                capacity = self.capacity,
                "Message buffer full, rejecting outbound message"
            );
            return false;
        }
        self.entries.push_back(BufferedMessage { payload, cancel });
        true
    }

    fn shift(&mut self) -> Option<String> {
        while let Some(entry) = self.entries.pop_front() {
            if entry.is_cancelled() {
                tracing::trace!("Skipping cancelled buffered message");
                continue;
            }
            return Some(entry.payload);
        }
        None
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut buffer = FifoMessageBuffer::new(4);
        assert!(buffer.push("a".into(), None));
        assert!(buffer.push("b".into(), None));
        assert!(buffer.push("c".into(), None));

        assert_eq!(buffer.shift().as_deref(), Some("a"));
        assert_eq!(buffer.shift().as_deref(), Some("b"));
        assert_eq!(buffer.shift().as_deref(), Some("c"));
        assert_eq!(buffer.shift(), None);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut buffer = FifoMessageBuffer::new(2);
        assert!(buffer.push("a".into(), None));
        assert!(buffer.push("b".into(), None));
        assert!(!buffer.push("c".into(), None));
        assert_eq!(buffer.len(), 2);

        buffer.shift();
        assert!(buffer.push("c".into(), None));
    }

    #[test]
    fn test_shift_skips_cancelled() {
        let mut buffer = FifoMessageBuffer::new(8);
        let cancelled = CancellationToken::new();
        let live = CancellationToken::new();

        buffer.push("first".into(), Some(cancelled.clone()));
        buffer.push("second".into(), Some(live.clone()));
        buffer.push("third".into(), Some(cancelled.clone()));
        cancelled.cancel();

        assert_eq!(buffer.shift().as_deref(), Some("second"));
        assert_eq!(buffer.shift(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full_buffer_reclaims_cancelled_slots() {
        let mut buffer = FifoMessageBuffer::new(2);
        let token = CancellationToken::new();
        buffer.push("stale".into(), Some(token.clone()));
        buffer.push("live".into(), None);
        token.cancel();

        assert!(buffer.push("new".into(), None));
        assert_eq!(buffer.shift().as_deref(), Some("live"));
        assert_eq!(buffer.shift().as_deref(), Some("new"));
    }

    #[test]
    fn test_clear() {
        let mut buffer = FifoMessageBuffer::default();
        buffer.push("a".into(), None);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.shift(), None);
        assert_eq!(buffer.capacity(), DEFAULT_BUFFER_CAPACITY);
    }
}
