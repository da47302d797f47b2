//! Canonical call-session types shared by every core component.
//!
//! Both ingress dialects (SIP bridge, Twilio webhook/stream) are parsed into
//! these types at the boundary; everything past the ingress adapters speaks
//! only this vocabulary.

use serde::{Deserialize, Serialize};

// ── Ingress source ───────────────────────────────────────────────

/// Where a call entered the gateway. External call IDs are namespaced by
/// this value so a SIP call-id can never collide with a Twilio CallSid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngressSource {
    /// Asterisk-class PBX speaking the JSON sip-bridge dialect.
    SipBridge,
    /// Cloud telephony webhook + media-stream ingress.
    WebhookStream,
}

impl IngressSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SipBridge => "sip-bridge",
            Self::WebhookStream => "webhook-stream",
        }
    }

    /// Parse from the wire form (`sip-bridge` / `webhook-stream`).
    pub fn from_str_code(code: &str) -> Option<Self> {
        match code {
            "sip-bridge" => Some(Self::SipBridge),
            "webhook-stream" => Some(Self::WebhookStream),
            _ => None,
        }
    }
}

// ── Language codes ───────────────────────────────────────────────

/// The two languages the gateway translates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    En,
    Es,
}

impl LanguageCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
        }
    }

    /// Parse from an ISO 639-1 code (case-insensitive).
    pub fn from_str_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            _ => None,
        }
    }

    /// Cross-language policy: Spanish speech is rendered in English and
    /// vice versa.
    pub fn counterpart(self) -> Self {
        match self {
            Self::En => Self::Es,
            Self::Es => Self::En,
        }
    }
}

// ── Session mode & state ─────────────────────────────────────────

/// Operator-selectable processing mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Run the full STT→MT→TTS pipeline (default).
    PrivateTranslation,
    /// Skip the pipeline entirely; frames are only counted.
    Passthrough,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrivateTranslation => "private-translation",
            Self::Passthrough => "passthrough",
        }
    }

    pub fn from_str_code(code: &str) -> Option<Self> {
        match code {
            "private-translation" => Some(Self::PrivateTranslation),
            "passthrough" => Some(Self::Passthrough),
            _ => None,
        }
    }
}

/// Lifecycle state of a call session: `pending → active → (ended | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Active,
    Ended,
    Failed,
}

impl SessionState {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

// ── Call session ─────────────────────────────────────────────────

/// A single logical telephone call handled by the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    /// Locally-minted opaque identifier, stable for the session's lifetime.
    pub id: String,
    pub source: IngressSource,
    /// Caller number as reported by the ingress (E.164).
    pub inbound_caller: String,
    /// The configured dial target (E.164).
    pub outbound_target: String,
    pub started_at_ms: u64,
    pub mode: SessionMode,
    pub source_language: LanguageCode,
    pub target_language: LanguageCode,
    pub state: SessionState,
}

/// Canonical handshake event both ingress dialects map to.
#[derive(Debug, Clone)]
pub struct IncomingCallEvent {
    pub source: IngressSource,
    /// Identifier assigned by the ingress (SIP call-id or Twilio CallSid).
    pub external_call_id: String,
    pub from: String,
    pub to: String,
    pub received_at_ms: u64,
}

// ── Media units ──────────────────────────────────────────────────

/// Audio payload encodings accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    PcmS16le,
    Mulaw,
}

impl AudioEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PcmS16le => "pcm_s16le",
            Self::Mulaw => "mulaw",
        }
    }
}

/// One inbound audio frame, already decoded from its dialect wrapper.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub session_id: String,
    pub source: IngressSource,
    pub sample_rate_hz: u32,
    pub encoding: AudioEncoding,
    /// Client-side timestamp; the rate limiter compares these, not wall-clock.
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// Partial or final transcript emitted by the STT provider.
#[derive(Debug, Clone)]
pub struct TranscriptionChunk {
    pub session_id: String,
    pub text: String,
    pub is_final: bool,
    pub language: LanguageCode,
    pub timestamp_ms: u64,
}

/// Translated text emitted by the MT provider.
#[derive(Debug, Clone)]
pub struct TranslationChunk {
    pub session_id: String,
    pub text: String,
    pub source_language: LanguageCode,
    pub target_language: LanguageCode,
    pub timestamp_ms: u64,
}

/// Synthesized audio ready for return delivery.
#[derive(Debug, Clone)]
pub struct TtsChunk {
    pub session_id: String,
    pub encoding: AudioEncoding,
    pub sample_rate_hz: u32,
    pub payload: Vec<u8>,
    pub timestamp_ms: u64,
}

/// Current time in epoch milliseconds.
pub fn now_epoch_ms() -> u64 {
    u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

// ── Tests ────────────────────────────────────────────────────────
