//! Per-session pipeline metrics.
//!
//! Latency fields are last-sample gauges, not histograms; counters are
//! strictly monotonic. The `/metrics` snapshot is defined in terms of these
//! scalars only.

use serde::Serialize;

/// Counters and latest-sample gauges for one session. Created lazily on
/// first update and kept for as long as the session exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Latest speech-to-text call latency.
    pub stt_latency_ms: u64,
    /// Latest machine-translation call latency.
    pub translation_latency_ms: u64,
    /// Latest text-to-speech call latency.
    pub tts_latency_ms: u64,
    /// Latest whole-frame pipeline latency (stt + mt + tts).
    pub pipeline_latency_ms: u64,
    /// Frames discarded by the rate limiter.
    pub dropped_frames: u64,
    /// Frames counted while the session was in passthrough mode.
    pub passthrough_frames: u64,
    /// Frames that produced a translated TTS chunk.
    pub translated_chunks: u64,
    /// Chunks evicted from the egress queue by overflow.
    pub egress_drop_count: u64,
    /// High-water mark of the egress queue.
    pub egress_queue_peak: u64,
}

impl SessionMetrics {
    /// Record an egress enqueue result.
    pub fn record_egress(&mut self, queue_size: usize, dropped_oldest: bool) {
        self.egress_queue_peak = self.egress_queue_peak.max(queue_size as u64);
        if dropped_oldest {
            self.egress_drop_count += 1;
        }
    }
}
