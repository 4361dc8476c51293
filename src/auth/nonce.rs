//! Action nonces.
//!
//! Hyperliquid nonces are millisecond timestamps. The exchange keeps the
//! highest nonces it has seen per signer and rejects anything already used
//! or too far from its own clock.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of action nonces. Each call must return a value greater than any
/// previous one.
pub trait NonceProvider: Send + Sync {
    /// The next nonce.
    fn next_nonce(&self) -> u64;
}

/// Millisecond clock nonces, bumped by one when the clock has not advanced.
#[derive(Debug, Default)]
pub struct IncreasingNonce {
    last: AtomicU64,
    /// Added to the local clock, e.g. to track the server's clock.
    offset_ms: AtomicI64,
}

impl IncreasingNonce {
    /// Nonces from the local clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift the clock by `offset_ms` (may be negative).
    pub fn with_clock_offset(self, offset_ms: i64) -> Self {
        self.offset_ms.store(offset_ms, Ordering::Relaxed);
        self
    }

    /// Record a nonce used elsewhere for the same signer, so later nonces
    /// are issued above it.
    pub fn observe(&self, nonce: u64) {
        self.last.fetch_max(nonce, Ordering::SeqCst);
    }

    fn now_ms(&self) -> u64 {
        let local = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        local.saturating_add_signed(self.offset_ms.load(Ordering::Relaxed))
    }
}

impl NonceProvider for IncreasingNonce {
    fn next_nonce(&self) -> u64 {
        let now = self.now_ms();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        now.max(previous.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_nonces_increase() {
        let nonces = IncreasingNonce::new();
        let mut last = 0;
        for _ in 0..1000 {
            let nonce = nonces.next_nonce();
            assert!(nonce > last);
            last = nonce;
        }
    }

    #[test]
    fn test_nonce_tracks_millisecond_clock() {
        let nonces = IncreasingNonce::new();
        let before = nonces.now_ms();
        let nonce = nonces.next_nonce();
        assert!(nonce >= before);
        assert!(nonce < before + 60_000);
    }

    #[test]
    fn test_clock_offset() {
        let nonces = IncreasingNonce::new().with_clock_offset(-86_400_000);
        let local = IncreasingNonce::new().now_ms();
        let nonce = nonces.next_nonce();
        assert!(nonce < local - 86_000_000);
    }

    #[test]
    fn test_observed_nonce_is_never_reused() {
        let nonces = IncreasingNonce::new();
        let ahead = nonces.now_ms() + 3_600_000;
        nonces.observe(ahead);
        assert_eq!(nonces.next_nonce(), ahead + 1);

        // Observing an older nonce changes nothing.
        nonces.observe(5);
        assert_eq!(nonces.next_nonce(), ahead + 2);
    }

    #[test]
    fn test_nonces_unique_across_threads() {
        let nonces = Arc::new(IncreasingNonce::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let nonces = nonces.clone();
                thread::spawn(move || (0..1000).map(|_| nonces.next_nonce()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            for nonce in worker.join().unwrap() {
                assert!(seen.insert(nonce), "duplicate nonce {nonce}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
