//! Session Core: canonical call-session types and the in-memory store.
//!
//! ## Design
//! - Closed tagged enums for every wire-visible discriminator (ingress
//!   source, language, mode, state, encoding) — no stringly-typed dispatch
//! - One `CallSession` per `(source, externalCallId)` pair, minted with a
//!   locally-generated opaque id that all other components key on
//! - Dual-index store behind a coarse reader-writer lock; the orchestrator
//!   is the single writer, HTTP snapshot routes read concurrently

pub mod store;
pub mod types;

pub use store::{ControlPatch, SessionStore};
pub use types::{
    now_epoch_ms, AudioEncoding, AudioFrame, CallSession, IncomingCallEvent, IngressSource,
    LanguageCode, SessionMode, SessionState, TranscriptionChunk, TranslationChunk, TtsChunk,
};
