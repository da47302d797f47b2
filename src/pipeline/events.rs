//! Session event envelopes published to the external orchestrator.

use serde::Serialize;

/// Closed set of event kinds the orchestrator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionEventKind {
    #[serde(rename = "session.started")]
    Started,
    #[serde(rename = "session.ended")]
    Ended,
    #[serde(rename = "session.control.updated")]
    ControlUpdated,
    #[serde(rename = "session.transcript")]
    Transcript,
    #[serde(rename = "session.translation")]
    Translation,
}

impl SessionEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "session.started",
            Self::Ended => "session.ended",
            Self::ControlUpdated => "session.control.updated",
            Self::Transcript => "session.transcript",
            Self::Translation => "session.translation",
        }
    }
}

/// One session event. The payload is an opaque JSON object whose shape is
/// owned by the emitting site.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: SessionEventKind,
    pub session_id: String,
    pub at_ms: u64,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_to_dotted_name() {
        assert_eq!(
            serde_json::to_string(&SessionEventKind::ControlUpdated).unwrap(),
            "\"session.control.updated\""
        );
        for kind in [
            SessionEventKind::Started,
            SessionEventKind::Ended,
            SessionEventKind::Transcript,
            SessionEventKind::Translation,
        ] {
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
    }

    #[test]
    fn event_wire_shape() {
        let event = SessionEvent {
            kind: SessionEventKind::Transcript,
            session_id: "s1".into(),
            at_ms: 123,
            payload: serde_json::json!({"text": "hola", "isFinal": true}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.transcript");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["atMs"], 123);
        assert_eq!(json["payload"]["text"], "hola");
    }
}
