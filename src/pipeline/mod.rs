//! Streaming Pipeline: per-call STT → MT → TTS orchestration.
//!
//! ## Design
//! - One `VoiceOrchestrator` owns the pipeline for every session: frame
//!   admission (rate limiting on client timestamps), mode switching, stage
//!   sequencing, and metric accounting
//! - Providers are polymorphic capabilities; a `None` stage result skips the
//!   rest of the frame and the stream continues
//! - Session events flow out through a sink callback to the event bridge;
//!   synthesized audio flows out through a sink callback to the egress store

pub mod events;
pub mod metrics;
pub mod orchestrator;

pub use events::{SessionEvent, SessionEventKind};
pub use metrics::SessionMetrics;
pub use orchestrator::{EventSink, TtsSink, VoiceOrchestrator};
