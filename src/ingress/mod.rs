//! Ingress Adapters: the two telephony dialects mapped onto the canonical
//! session vocabulary.
//!
//! ## Design
//! - `asterisk`: JSON-over-HTTP from the PBX-side bridge — handshake, media
//!   frames, egress polling, call end
//! - `twilio`: form-encoded voice webhook (answered with dial XML, signature
//!   checked) plus the media-stream WebSocket message set
//! - Both produce the same `IncomingCallEvent`/`AudioFrame` types; nothing
//!   past this layer knows which dialect a call arrived on

pub mod asterisk;
pub mod twilio;
