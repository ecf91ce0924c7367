//! Dedup registry shared by both ingestion feeds.
//!
//! The set is the sole mechanism preventing double-publication when both
//! feeds observe the same sale, so check-and-insert must be atomic with
//! respect to other candidates. A synchronous mutex around the LRU gives
//! that under cooperative scheduling; no suspension point ever sits inside
//! the critical section. Capacity is fixed so a long-running process does
//! not leak: ids old enough to be evicted are already behind the watermark
//! and can never be observed again.

use log::debug;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

pub struct DedupRegistry {
    seen: Mutex<LruCache<String, ()>>,
    watermark: AtomicI64,
}

impl DedupRegistry {
    pub fn new(capacity: usize, initial_watermark: i64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("nonzero capacity");
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
            watermark: AtomicI64::new(initial_watermark),
        }
    }

    /// Atomically marks a source id processed. Returns `false` when the id
    /// was already present (a duplicate).
    pub fn check_and_insert(&self, source_id: &str) -> bool {
        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        if seen.contains(source_id) {
            return false;
        }
        seen.put(source_id.to_string(), ());
        true
    }

    /// Non-claiming peek, used to skip expensive receipt fetches for ids
    /// another feed already handled.
    pub fn contains(&self, source_id: &str) -> bool {
        self.seen
            .lock()
            .expect("dedup lock poisoned")
            .contains(source_id)
    }

    /// Timestamp bound for the next feed poll window.
    pub fn watermark(&self) -> i64 {
        self.watermark.load(Ordering::Relaxed)
    }

    /// Advances the watermark monotonically.
    pub fn advance_watermark(&self, event_timestamp: i64) {
        self.watermark.fetch_max(event_timestamp, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("dedup lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        let dropped = seen.len();
        seen.clear();
        debug!("dedup registry cleared ({} ids dropped)", dropped);
    }
}
