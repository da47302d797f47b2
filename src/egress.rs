//! Egress Store: bounded per-session FIFO of synthesized audio.
//!
//! The TTS completion callback enqueues; the SIP-bridge egress poll (or the
//! Twilio stream task) dequeues, possibly from another task. Each queue has
//! its own mutex so a slow poller on one call never blocks enqueue on
//! another. Overflow drops the oldest chunk: the freshest translated audio
//! is the most valuable, and the telephony leg prefers a gap over a stall.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::session::TtsChunk;

/// Default per-session queue bound.
pub const DEFAULT_MAX_QUEUE_PER_SESSION: usize = 64;

/// Result of an enqueue, reported back to the orchestrator for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EgressReport {
    pub queue_size: usize,
    pub dropped_oldest: bool,
}

type Queue = Arc<Mutex<VecDeque<TtsChunk>>>;

/// Per-session bounded FIFO of [`TtsChunk`]s.
pub struct EgressStore {
    max_per_session: usize,
    queues: RwLock<HashMap<String, Queue>>,
}

impl EgressStore {
    /// `max_per_session` is clamped to at least 1.
    pub fn new(max_per_session: usize) -> Self {
        Self {
            max_per_session: max_per_session.max(1),
            queues: RwLock::new(HashMap::new()),
        }
    }

    fn queue_for(&self, session_id: &str) -> Queue {
        if let Some(q) = self.queues.read().get(session_id) {
            return Arc::clone(q);
        }
        let mut queues = self.queues.write();
        Arc::clone(
            queues
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }

    /// Append a chunk, evicting the oldest entry when the queue is full.
    pub fn enqueue(&self, chunk: TtsChunk) -> EgressReport {
        let queue = self.queue_for(&chunk.session_id);
        let mut q = queue.lock();
        let mut dropped_oldest = false;
        while q.len() >= self.max_per_session {
            q.pop_front();
            dropped_oldest = true;
        }
        q.push_back(chunk);
        EgressReport {
            queue_size: q.len(),
            dropped_oldest,
        }
    }

    /// Pop the oldest pending chunk. Empty queues are removed from the map
    /// so ended sessions do not leak entries.
    pub fn dequeue(&self, session_id: &str) -> Option<TtsChunk> {
        let queue = {
            let queues = self.queues.read();
            Arc::clone(queues.get(session_id)?)
        };
        let (chunk, now_empty) = {
            let mut q = queue.lock();
            let chunk = q.pop_front();
            (chunk, q.is_empty())
        };
        if now_empty {
            let mut queues = self.queues.write();
            if let Some(q) = queues.get(session_id) {
                if q.lock().is_empty() {
                    queues.remove(session_id);
                }
            }
        }
        chunk
    }

    pub fn size(&self, session_id: &str) -> usize {
        self.queues
            .read()
            .get(session_id)
            .map(|q| q.lock().len())
            .unwrap_or(0)
    }

    /// Drop everything queued for a session (called on session end).
    pub fn clear(&self, session_id: &str) {
        self.queues.write().remove(session_id);
    }
}

impl Default for EgressStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_PER_SESSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AudioEncoding;

    fn chunk(session: &str, ts: u64) -> TtsChunk {
        TtsChunk {
            session_id: session.into(),
            encoding: AudioEncoding::PcmS16le,
            sample_rate_hz: 16_000,
            payload: vec![0u8; 4],
            timestamp_ms: ts,
        }
    }

    #[test]
    fn fifo_order() {
        let store = EgressStore::new(8);
        store.enqueue(chunk("s1", 1));
        store.enqueue(chunk("s1", 2));
        store.enqueue(chunk("s1", 3));

        assert_eq!(store.dequeue("s1").unwrap().timestamp_ms, 1);
        assert_eq!(store.dequeue("s1").unwrap().timestamp_ms, 2);
        assert_eq!(store.dequeue("s1").unwrap().timestamp_ms, 3);
        assert!(store.dequeue("s1").is_none());
    }

    #[test]
    fn overflow_drops_oldest_and_keeps_last_b() {
        let bound = 3;
        let store = EgressStore::new(bound);
        for ts in 0..10u64 {
            let report = store.enqueue(chunk("s1", ts));
            assert!(report.queue_size <= bound);
        }
        assert_eq!(store.size("s1"), bound);

        // The queue holds the last `bound` chunks, still in FIFO order.
        for expected in 7..10u64 {
            assert_eq!(store.dequeue("s1").unwrap().timestamp_ms, expected);
        }
    }

    #[test]
    fn enqueue_reports_drop() {
        let store = EgressStore::new(1);
        let first = store.enqueue(chunk("s1", 1));
        assert!(!first.dropped_oldest);
        assert_eq!(first.queue_size, 1);

        let second = store.enqueue(chunk("s1", 2));
        assert!(second.dropped_oldest);
        assert_eq!(second.queue_size, 1);
        assert_eq!(store.dequeue("s1").unwrap().timestamp_ms, 2);
    }

    #[test]
    fn queues_are_per_session() {
        let store = EgressStore::new(4);
        store.enqueue(chunk("s1", 1));
        store.enqueue(chunk("s2", 2));

        assert_eq!(store.size("s1"), 1);
        assert_eq!(store.size("s2"), 1);
        assert_eq!(store.dequeue("s2").unwrap().timestamp_ms, 2);
        assert_eq!(store.size("s1"), 1);
    }

    #[test]
    fn empty_queues_are_removed() {
        let store = EgressStore::new(4);
        store.enqueue(chunk("s1", 1));
        store.dequeue("s1");
        assert!(store.queues.read().is_empty());
    }

    #[test]
    fn clear_discards_pending() {
        let store = EgressStore::new(4);
        store.enqueue(chunk("s1", 1));
        store.enqueue(chunk("s1", 2));
        store.clear("s1");
        assert_eq!(store.size("s1"), 0);
        assert!(store.dequeue("s1").is_none());
    }

    #[test]
    fn bound_is_clamped_to_one() {
        let store = EgressStore::new(0);
        store.enqueue(chunk("s1", 1));
        let report = store.enqueue(chunk("s1", 2));
        assert_eq!(report.queue_size, 1);
        assert!(report.dropped_oldest);
    }
}
