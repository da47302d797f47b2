//! Twilio dialect: the voice webhook (form-encoded, answered with dial XML)
//! and the media-stream WebSocket message vocabulary.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::session::{
    AudioEncoding, AudioFrame, IncomingCallEvent, IngressSource, TtsChunk,
};
use crate::util::constant_time_eq;

/// Media streams are always 8 kHz μ-law.
pub const STREAM_SAMPLE_RATE_HZ: u32 = 8_000;

// ── Voice webhook ────────────────────────────────────────────────

/// Parsed `POST /twilio/voice` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceWebhook {
    pub call_sid: String,
    pub from: String,
    pub to: String,
}

/// Extract the fields we need from the decoded form pairs. Returns `None`
/// when any required field is missing or empty.
pub fn parse_voice_form(pairs: &[(String, String)]) -> Option<VoiceWebhook> {
    let field = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    Some(VoiceWebhook {
        call_sid: field("CallSid")?,
        from: field("From")?,
        to: field("To")?,
    })
}

impl VoiceWebhook {
    pub fn into_event(self, received_at_ms: u64) -> IncomingCallEvent {
        IncomingCallEvent {
            source: IngressSource::WebhookStream,
            external_call_id: self.call_sid,
            from: self.from,
            to: self.to,
            received_at_ms,
        }
    }
}

/// TwiML answer: optionally start the media stream, then dial the target.
pub fn dial_response_xml(outbound_target: &str, stream_url: Option<&str>) -> String {
    let stream = stream_url
        .map(|url| format!("<Start><Stream url=\"{url}\"/></Start>"))
        .unwrap_or_default();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{stream}<Dial>{outbound_target}</Dial></Response>"
    )
}

// ── Webhook signature ────────────────────────────────────────────

/// Twilio's request signature: HMAC-SHA1 over the full URL followed by the
/// form's `key + value` pairs sorted by key, base64-encoded.
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut data = url.to_string();
    for (key, value) in sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac =
        Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()).expect("hmac accepts any key length");
    mac.update(data.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    provided: &str,
) -> bool {
    let expected = compute_signature(auth_token, url, params);
    constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

// ── Media stream messages ────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub call_sid: String,
    #[serde(default)]
    pub stream_sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamMedia {
    pub payload: String,
    /// Milliseconds since stream start, sent as a string.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// One JSON text frame on the media WebSocket, discriminated by `event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamMessage {
    Connected,
    Start { start: StreamStart },
    Media { media: StreamMedia },
    Stop,
}

/// Parse a text frame; unknown or malformed messages yield `None`.
pub fn parse_stream_message(raw: &str) -> Option<StreamMessage> {
    serde_json::from_str(raw).ok()
}

/// Build the canonical frame for a `media` message.
pub fn media_frame(
    session_id: &str,
    media: &StreamMedia,
    fallback_ts: u64,
) -> Option<AudioFrame> {
    let payload = base64::engine::general_purpose::STANDARD
        .decode(media.payload.as_bytes())
        .ok()?;
    let timestamp_ms = media
        .timestamp
        .as_deref()
        .and_then(|t| t.parse::<u64>().ok())
        .unwrap_or(fallback_ts);
    Some(AudioFrame {
        session_id: session_id.to_string(),
        source: IngressSource::WebhookStream,
        sample_rate_hz: STREAM_SAMPLE_RATE_HZ,
        encoding: AudioEncoding::Mulaw,
        timestamp_ms,
        payload,
    })
}

/// Outbound `media` message carrying translated audio back down the stream.
pub fn outbound_media_json(stream_sid: Option<&str>, chunk: &TtsChunk) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(&chunk.payload);
    serde_json::json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": payload },
    })
    .to_string()
}
