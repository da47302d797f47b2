//! SIP-bridge dialect: JSON-over-HTTP payloads from the Asterisk-side
//! bridge, validated and mapped to canonical events and frames.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::is_valid_e164;
use crate::session::{AudioEncoding, AudioFrame, IncomingCallEvent, IngressSource, TtsChunk};

/// `POST /asterisk/inbound` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundCallBody {
    pub call_id: String,
    pub from: String,
    pub to: String,
}

impl InboundCallBody {
    /// Field-level validation beyond what serde can express.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.call_id.trim().is_empty() {
            return Err("callId must be non-empty");
        }
        if !is_valid_e164(&self.from) {
            return Err("from must be E.164");
        }
        if !is_valid_e164(&self.to) {
            return Err("to must be E.164");
        }
        Ok(())
    }

    pub fn into_event(self, received_at_ms: u64) -> IncomingCallEvent {
        IncomingCallEvent {
            source: IngressSource::SipBridge,
            external_call_id: self.call_id,
            from: self.from,
            to: self.to,
            received_at_ms,
        }
    }
}

/// `POST /asterisk/media` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFrameBody {
    pub call_id: String,
    pub sample_rate_hz: u32,
    pub encoding: AudioEncoding,
    pub payload_base64: String,
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
}

impl MediaFrameBody {
    /// Decode into a canonical frame. `fallback_ts` supplies the timestamp
    /// when the bridge didn't send one.
    pub fn into_frame(self, session_id: &str, fallback_ts: u64) -> Result<AudioFrame, &'static str> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(self.payload_base64.as_bytes())
            .map_err(|_| "payloadBase64 is not valid base64")?;
        Ok(AudioFrame {
            session_id: session_id.to_string(),
            source: IngressSource::SipBridge,
            sample_rate_hz: self.sample_rate_hz,
            encoding: self.encoding,
            timestamp_ms: self.timestamp_ms.unwrap_or(fallback_ts),
            payload,
        })
    }
}

/// `POST /asterisk/end` body: either `{callId, source?}` or `{sessionId}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallBody {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub source: Option<IngressSource>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl EndCallBody {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.call_id.is_none() && self.session_id.is_none() {
            return Err("either callId or sessionId is required");
        }
        Ok(())
    }
}

/// `GET /asterisk/egress/next` query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressQuery {
    pub call_id: String,
    #[serde(default)]
    pub source: Option<IngressSource>,
}

impl EgressQuery {
    /// The SIP bridge is the only poller, so that's the default namespace.
    pub fn source(&self) -> IngressSource {
        self.source.unwrap_or(IngressSource::SipBridge)
    }
}

/// Egress poll response for one dequeued chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressChunkBody {
    pub session_id: String,
    pub encoding: AudioEncoding,
    pub sample_rate_hz: u32,
    pub timestamp_ms: u64,
    pub payload_base64: String,
    pub remaining_queue: usize,
}

impl EgressChunkBody {
    pub fn from_chunk(chunk: TtsChunk, remaining_queue: usize) -> Self {
        Self {
            session_id: chunk.session_id,
            encoding: chunk.encoding,
            sample_rate_hz: chunk.sample_rate_hz,
            timestamp_ms: chunk.timestamp_ms,
            payload_base64: base64::engine::general_purpose::STANDARD.encode(&chunk.payload),
            remaining_queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_parses_and_validates() {
        let body: InboundCallBody = serde_json::from_str(
            r#"{"callId":"sip-1","from":"+15550000001","to":"+18005550199"}"#,
        )
        .unwrap();
        assert!(body.validate().is_ok());

        let event = body.into_event(42);
        assert_eq!(event.source, IngressSource::SipBridge);
        assert_eq!(event.external_call_id, "sip-1");
        assert_eq!(event.received_at_ms, 42);
    }

    #[test]
    fn inbound_missing_field_fails_parse() {
        let result: Result<InboundCallBody, _> =
            serde_json::from_str(r#"{"callId":"sip-1","from":"+15550000001"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn inbound_rejects_bad_e164() {
        let body: InboundCallBody = serde_json::from_str(
            r#"{"callId":"sip-1","from":"5550001","to":"+18005550199"}"#,
        )
        .unwrap();
        assert_eq!(body.validate(), Err("from must be E.164"));
    }

    #[test]
    fn media_decodes_base64() {
        let body: MediaFrameBody = serde_json::from_str(
            r#"{"callId":"sip-1","sampleRateHz":8000,"encoding":"mulaw","payloadBase64":"AQI="}"#,
        )
        .unwrap();
        let frame = body.into_frame("session-1", 99).unwrap();
        assert_eq!(frame.payload, vec![1, 2]);
        assert_eq!(frame.encoding, AudioEncoding::Mulaw);
        assert_eq!(frame.sample_rate_hz, 8_000);
        assert_eq!(frame.timestamp_ms, 99);
    }

    #[test]
    fn media_keeps_client_timestamp() {
        let body: MediaFrameBody = serde_json::from_str(
            r#"{"callId":"sip-1","sampleRateHz":8000,"encoding":"mulaw","payloadBase64":"AQI=","timestampMs":1234}"#,
        )
        .unwrap();
        let frame = body.into_frame("session-1", 99).unwrap();
        assert_eq!(frame.timestamp_ms, 1_234);
    }

    #[test]
    fn media_unknown_encoding_fails_parse() {
        let result: Result<MediaFrameBody, _> = serde_json::from_str(
            r#"{"callId":"sip-1","sampleRateHz":8000,"encoding":"opus","payloadBase64":"AQI="}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn media_bad_base64_is_rejected() {
        let body: MediaFrameBody = serde_json::from_str(
            r#"{"callId":"sip-1","sampleRateHz":8000,"encoding":"mulaw","payloadBase64":"!!!"}"#,
        )
        .unwrap();
        assert!(body.into_frame("session-1", 0).is_err());
    }

    #[test]
    fn end_accepts_either_identifier() {
        let by_call: EndCallBody =
            serde_json::from_str(r#"{"callId":"sip-1","source":"sip-bridge"}"#).unwrap();
        assert!(by_call.validate().is_ok());

        let by_session: EndCallBody = serde_json::from_str(r#"{"sessionId":"abc"}"#).unwrap();
        assert!(by_session.validate().is_ok());

        let neither: EndCallBody = serde_json::from_str(r#"{}"#).unwrap();
        assert!(neither.validate().is_err());
    }

    #[test]
    fn egress_query_defaults_to_sip_bridge() {
        let q: EgressQuery = serde_urlencoded::from_str("callId=sip-1").unwrap();
        assert_eq!(q.source(), IngressSource::SipBridge);

        let q: EgressQuery =
            serde_urlencoded::from_str("callId=sip-1&source=webhook-stream").unwrap();
        assert_eq!(q.source(), IngressSource::WebhookStream);
    }

    #[test]
    fn egress_chunk_encodes_payload() {
        let chunk = TtsChunk {
            session_id: "s1".into(),
            encoding: AudioEncoding::PcmS16le,
            sample_rate_hz: 16_000,
            payload: vec![1, 2],
            timestamp_ms: 7,
        };
        let body = EgressChunkBody::from_chunk(chunk, 3);
        assert_eq!(body.payload_base64, "AQI=");
        assert_eq!(body.remaining_queue, 3);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["sampleRateHz"], 16_000);
        assert_eq!(json["encoding"], "pcm_s16le");
    }
}
