//! The voice orchestrator: single owner of the per-call pipeline.
//!
//! One instance serves every session. For each inbound frame it runs
//! STT → MT → TTS in sequence, accounts latency and counters, and hands
//! synthesized audio to the egress sink. Provider failures surface as
//! `None` results and never propagate past this module.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::egress::EgressReport;
use crate::providers::ProviderSet;
use crate::session::{
    now_epoch_ms, AudioFrame, CallSession, IncomingCallEvent, SessionMode, SessionState,
    SessionStore, TtsChunk,
};

use super::events::{SessionEvent, SessionEventKind};
use super::metrics::SessionMetrics;

/// Receives synthesized audio; returns the egress enqueue report so the
/// orchestrator can account for queue peak and overflow drops. The sink
/// clones the chunk if it queues it.
pub type TtsSink = Arc<dyn Fn(&TtsChunk) -> Option<EgressReport> + Send + Sync>;

/// Receives session events; delivery failures are the sink's problem and
/// must never surface here.
pub type EventSink = Arc<dyn Fn(SessionEvent) + Send + Sync>;

pub struct VoiceOrchestrator {
    store: Arc<SessionStore>,
    providers: ProviderSet,
    outbound_target: String,
    /// Minimum spacing between processed frames per session, measured on
    /// the frames' own timestamps. 0 disables the limiter.
    min_frame_interval_ms: u64,
    tts_sink: Option<TtsSink>,
    event_sink: Option<EventSink>,
    last_frame_ts: Mutex<HashMap<String, u64>>,
    metrics: RwLock<HashMap<String, SessionMetrics>>,
}

impl VoiceOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        providers: ProviderSet,
        outbound_target: String,
        min_frame_interval_ms: u64,
    ) -> Self {
        Self {
            store,
            providers,
            outbound_target,
            min_frame_interval_ms,
            tts_sink: None,
            event_sink: None,
            last_frame_ts: Mutex::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Wire the egress delivery callback (set once at startup).
    pub fn with_tts_sink(mut self, sink: TtsSink) -> Self {
        self.tts_sink = Some(sink);
        self
    }

    /// Wire the session-event callback (set once at startup).
    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn outbound_target(&self) -> &str {
        &self.outbound_target
    }

    // ── Incoming call handling ───────────────────────────────────

    /// Resolve or create the session for an ingress handshake. Repeated
    /// handshakes are idempotent: the ingress may retry, and retries get
    /// the existing session back unchanged.
    pub fn on_incoming_call(&self, event: &IncomingCallEvent) -> CallSession {
        if let Some(existing) = self
            .store
            .get_by_external(event.source, &event.external_call_id)
        {
            tracing::info!(
                session_id = %existing.id,
                source = event.source.as_str(),
                external_call_id = %event.external_call_id,
                "Duplicate handshake for known call"
            );
            return existing;
        }

        let created = self
            .store
            .create_from_incoming(event, &self.outbound_target);
        // The started event must trail the pending→active transition.
        let session = self
            .store
            .update_state(&created.id, SessionState::Active)
            .unwrap_or(created);

        tracing::info!(
            session_id = %session.id,
            source = session.source.as_str(),
            from = %session.inbound_caller,
            "Session started"
        );

        self.emit(
            SessionEventKind::Started,
            &session.id,
            event.received_at_ms,
            serde_json::json!({
                "source": session.source.as_str(),
                "inboundCaller": session.inbound_caller,
                "outboundTarget": session.outbound_target,
                "mode": session.mode.as_str(),
                "sourceLanguage": session.source_language.as_str(),
                "targetLanguage": session.target_language.as_str(),
            }),
        );

        session
    }

    // ── Frame pipeline ───────────────────────────────────────────

    /// Run one frame through the pipeline. Within a session the stages run
    /// in sequence; frames for unknown sessions are dropped with a warning.
    pub async fn on_audio_frame(&self, frame: &AudioFrame) {
        let Some(session) = self.store.get(&frame.session_id) else {
            tracing::warn!(session_id = %frame.session_id, "Frame for unknown session dropped");
            return;
        };

        if session.mode == SessionMode::Passthrough {
            self.with_metrics(&frame.session_id, |m| m.passthrough_frames += 1);
            return;
        }

        if !self.admit_frame(frame) {
            self.with_metrics(&frame.session_id, |m| m.dropped_frames += 1);
            return;
        }

        let stt_start = Instant::now();
        let transcript = self.providers.stt.transcribe(frame).await;
        let stt_ms = elapsed_ms(stt_start);
        self.with_metrics(&frame.session_id, |m| m.stt_latency_ms = stt_ms);

        let Some(transcript) = transcript.filter(|t| !t.text.trim().is_empty()) else {
            return;
        };

        self.emit(
            SessionEventKind::Transcript,
            &frame.session_id,
            transcript.timestamp_ms,
            serde_json::json!({
                "text": transcript.text,
                "isFinal": transcript.is_final,
                "language": transcript.language.as_str(),
            }),
        );

        let mt_start = Instant::now();
        let translation = self.providers.translation.translate(&transcript).await;
        let mt_ms = elapsed_ms(mt_start);
        self.with_metrics(&frame.session_id, |m| m.translation_latency_ms = mt_ms);

        let Some(translation) = translation else {
            return;
        };

        self.emit(
            SessionEventKind::Translation,
            &frame.session_id,
            translation.timestamp_ms,
            serde_json::json!({
                "text": translation.text,
                "sourceLanguage": translation.source_language.as_str(),
                "targetLanguage": translation.target_language.as_str(),
            }),
        );

        let tts_start = Instant::now();
        let tts_chunk = self.providers.tts.synthesize(&translation).await;
        let tts_ms = elapsed_ms(tts_start);

        if let (Some(chunk), Some(sink)) = (tts_chunk.as_ref(), self.tts_sink.as_ref()) {
            if let Some(report) = sink(chunk) {
                self.report_egress_stats(&frame.session_id, report);
            }
        }

        self.with_metrics(&frame.session_id, |m| {
            m.tts_latency_ms = tts_ms;
            m.pipeline_latency_ms = stt_ms + mt_ms + tts_ms;
            m.translated_chunks += 1;
        });
    }

    /// Client-timestamp rate limiter. The first frame of a session always
    /// passes; later frames must be at least `min_frame_interval_ms` after
    /// the last *accepted* frame.
    fn admit_frame(&self, frame: &AudioFrame) -> bool {
        if self.min_frame_interval_ms == 0 {
            return true;
        }
        let mut last = self.last_frame_ts.lock();
        if let Some(prev) = last.get(&frame.session_id) {
            if frame.timestamp_ms.saturating_sub(*prev) < self.min_frame_interval_ms {
                return false;
            }
        }
        last.insert(frame.session_id.clone(), frame.timestamp_ms);
        true
    }

    // ── Control operations ───────────────────────────────────────

    /// Apply a control patch and announce it. Ended sessions are left
    /// untouched and no event is emitted for them.
    pub fn update_session_control(
        &self,
        session_id: &str,
        patch: crate::session::ControlPatch,
    ) -> Option<CallSession> {
        let current = self.store.get(session_id)?;
        if current.state.is_terminal() {
            return Some(current);
        }

        let updated = self.store.update_control(session_id, patch)?;
        self.emit(
            SessionEventKind::ControlUpdated,
            session_id,
            now_epoch_ms(),
            serde_json::json!({
                "mode": updated.mode.as_str(),
                "sourceLanguage": updated.source_language.as_str(),
                "targetLanguage": updated.target_language.as_str(),
            }),
        );
        Some(updated)
    }

    /// Transition to `ended`, idempotently. The first transition emits a
    /// `session.ended` event carrying the final metrics snapshot.
    pub fn end_session(&self, session_id: &str) -> Option<CallSession> {
        let current = self.store.get(session_id)?;
        if current.state.is_terminal() {
            return Some(current);
        }

        let ended = self.store.update_state(session_id, SessionState::Ended)?;
        self.last_frame_ts.lock().remove(session_id);

        let metrics = self.metrics_for(session_id).unwrap_or_default();
        tracing::info!(session_id = %session_id, translated = metrics.translated_chunks, "Session ended");
        self.emit(
            SessionEventKind::Ended,
            session_id,
            now_epoch_ms(),
            serde_json::json!({ "metrics": metrics }),
        );
        Some(ended)
    }

    /// Called by the boundary layer after each egress enqueue.
    pub fn report_egress_stats(&self, session_id: &str, report: EgressReport) {
        self.with_metrics(session_id, |m| {
            m.record_egress(report.queue_size, report.dropped_oldest);
        });
    }

    // ── Metric accounting ────────────────────────────────────────

    fn with_metrics(&self, session_id: &str, update: impl FnOnce(&mut SessionMetrics)) {
        let mut metrics = self.metrics.write();
        update(metrics.entry(session_id.to_string()).or_default());
    }

    pub fn metrics_for(&self, session_id: &str) -> Option<SessionMetrics> {
        self.metrics.read().get(session_id).cloned()
    }

    /// Snapshot of every session's metrics, for `GET /metrics`.
    pub fn metrics_snapshot(&self) -> HashMap<String, SessionMetrics> {
        self.metrics.read().clone()
    }

    fn emit(&self, kind: SessionEventKind, session_id: &str, at_ms: u64, payload: serde_json::Value) {
        if let Some(sink) = &self.event_sink {
            sink(SessionEvent {
                kind,
                session_id: session_id.to_string(),
                at_ms,
                payload,
            });
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::providers::{StreamingSttProvider, TranslationProvider, TtsProvider};
    use crate::session::{
        AudioEncoding, ControlPatch, IngressSource, LanguageCode, TranscriptionChunk,
        TranslationChunk, TtsChunk,
    };

    struct CountingStt {
        calls: AtomicUsize,
        reply: Option<String>,
    }

    impl CountingStt {
        fn new(reply: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: reply.map(String::from),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamingSttProvider for CountingStt {
        fn name(&self) -> &str {
            "counting-stt"
        }

        async fn transcribe(&self, frame: &AudioFrame) -> Option<TranscriptionChunk> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self.reply.clone()?;
            Some(TranscriptionChunk {
                session_id: frame.session_id.clone(),
                text,
                is_final: true,
                language: LanguageCode::Es,
                timestamp_ms: frame.timestamp_ms,
            })
        }
    }

    struct EchoTranslate;

    #[async_trait]
    impl TranslationProvider for EchoTranslate {
        fn name(&self) -> &str {
            "echo-translate"
        }

        async fn translate(&self, transcript: &TranscriptionChunk) -> Option<TranslationChunk> {
            Some(TranslationChunk {
                session_id: transcript.session_id.clone(),
                text: transcript.text.clone(),
                source_language: transcript.language,
                target_language: transcript.language.counterpart(),
                timestamp_ms: transcript.timestamp_ms,
            })
        }
    }

    struct TinyTts;

    #[async_trait]
    impl TtsProvider for TinyTts {
        fn name(&self) -> &str {
            "tiny-tts"
        }

        async fn synthesize(&self, translation: &TranslationChunk) -> Option<TtsChunk> {
            Some(TtsChunk {
                session_id: translation.session_id.clone(),
                encoding: AudioEncoding::PcmS16le,
                sample_rate_hz: 16_000,
                payload: vec![0u8; 8],
                timestamp_ms: translation.timestamp_ms,
            })
        }
    }

    struct Harness {
        orchestrator: Arc<VoiceOrchestrator>,
        stt: Arc<CountingStt>,
        events: Arc<Mutex<Vec<SessionEvent>>>,
        enqueued: Arc<Mutex<Vec<TtsChunk>>>,
    }

    fn harness_with(stt_reply: Option<&str>, min_interval_ms: u64) -> Harness {
        let store = Arc::new(SessionStore::new());
        let stt = CountingStt::new(stt_reply);
        let providers = ProviderSet {
            stt: stt.clone(),
            translation: Arc::new(EchoTranslate),
            tts: Arc::new(TinyTts),
        };

        let events: Arc<Mutex<Vec<SessionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let enqueued: Arc<Mutex<Vec<TtsChunk>>> = Arc::new(Mutex::new(Vec::new()));

        let events_sink = events.clone();
        let enqueued_sink = enqueued.clone();
        let orchestrator = VoiceOrchestrator::new(
            store,
            providers,
            "+15555550100".into(),
            min_interval_ms,
        )
        .with_event_sink(Arc::new(move |event| {
            events_sink.lock().push(event);
        }))
        .with_tts_sink(Arc::new(move |chunk: &TtsChunk| {
            enqueued_sink.lock().push(chunk.clone());
            Some(EgressReport {
                queue_size: 1,
                dropped_oldest: false,
            })
        }));

        Harness {
            orchestrator: Arc::new(orchestrator),
            stt,
            events,
            enqueued,
        }
    }

    fn handshake(external: &str) -> IncomingCallEvent {
        IncomingCallEvent {
            source: IngressSource::SipBridge,
            external_call_id: external.into(),
            from: "+15550000001".into(),
            to: "+18005550199".into(),
            received_at_ms: 1_000,
        }
    }

    fn frame(session_id: &str, ts: u64) -> AudioFrame {
        AudioFrame {
            session_id: session_id.into(),
            source: IngressSource::SipBridge,
            sample_rate_hz: 8_000,
            encoding: AudioEncoding::Mulaw,
            timestamp_ms: ts,
            payload: vec![1, 2, 3],
        }
    }

    fn event_kinds(events: &Mutex<Vec<SessionEvent>>) -> Vec<SessionEventKind> {
        events.lock().iter().map(|e| e.kind).collect()
    }

    #[test]
    fn duplicate_handshake_is_idempotent() {
        let h = harness_with(Some("hola"), 0);
        let first = h.orchestrator.on_incoming_call(&handshake("sip-1"));
        let second = h.orchestrator.on_incoming_call(&handshake("sip-1"));

        assert_eq!(first.id, second.id);
        assert_eq!(h.orchestrator.store().count(), 1);
        // Only one started event for the pair of handshakes.
        assert_eq!(
            event_kinds(&h.events),
            vec![SessionEventKind::Started]
        );
    }

    #[test]
    fn started_event_trails_active_transition() {
        let store = Arc::new(SessionStore::new());
        let stt = CountingStt::new(None);
        let providers = ProviderSet {
            stt,
            translation: Arc::new(EchoTranslate),
            tts: Arc::new(TinyTts),
        };

        let observed: Arc<Mutex<Vec<SessionState>>> = Arc::new(Mutex::new(Vec::new()));
        let store_for_sink = store.clone();
        let observed_sink = observed.clone();
        let orchestrator =
            VoiceOrchestrator::new(store, providers, "+15555550100".into(), 0).with_event_sink(
                Arc::new(move |event| {
                    if let Some(session) = store_for_sink.get(&event.session_id) {
                        observed_sink.lock().push(session.state);
                    }
                }),
            );

        let session = orchestrator.on_incoming_call(&handshake("sip-1"));
        assert_eq!(session.state, SessionState::Active);
        // The subscriber saw the session already active when told about it.
        assert_eq!(*observed.lock(), vec![SessionState::Active]);
    }

    #[tokio::test]
    async fn frame_runs_full_pipeline_in_order() {
        let h = harness_with(Some("hola mundo"), 0);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));

        h.orchestrator.on_audio_frame(&frame(&session.id, 0)).await;

        assert_eq!(
            event_kinds(&h.events),
            vec![
                SessionEventKind::Started,
                SessionEventKind::Transcript,
                SessionEventKind::Translation,
            ]
        );
        assert_eq!(h.enqueued.lock().len(), 1);

        let metrics = h.orchestrator.metrics_for(&session.id).unwrap();
        assert_eq!(metrics.translated_chunks, 1);
        assert_eq!(metrics.egress_queue_peak, 1);
    }

    #[tokio::test]
    async fn unknown_session_frame_is_dropped() {
        let h = harness_with(Some("hola"), 0);
        h.orchestrator.on_audio_frame(&frame("ghost", 0)).await;
        assert_eq!(h.stt.call_count(), 0);
        assert!(h.events.lock().is_empty());
    }

    #[tokio::test]
    async fn passthrough_skips_providers_and_counts() {
        let h = harness_with(Some("hola"), 0);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));
        h.orchestrator.update_session_control(
            &session.id,
            ControlPatch {
                mode: Some(SessionMode::Passthrough),
                ..Default::default()
            },
        );

        for ts in 0..3u64 {
            h.orchestrator.on_audio_frame(&frame(&session.id, ts)).await;
        }

        assert_eq!(h.stt.call_count(), 0);
        assert!(h.enqueued.lock().is_empty());
        let metrics = h.orchestrator.metrics_for(&session.id).unwrap();
        assert_eq!(metrics.passthrough_frames, 3);
    }

    #[tokio::test]
    async fn rate_limiter_spacing_on_client_timestamps() {
        // Δ = 100: frames at 0, 50, 150 → exactly two reach the provider.
        let h = harness_with(Some("hola"), 100);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));

        for ts in [0u64, 50, 150] {
            h.orchestrator.on_audio_frame(&frame(&session.id, ts)).await;
        }

        assert_eq!(h.stt.call_count(), 2);
        let metrics = h.orchestrator.metrics_for(&session.id).unwrap();
        assert!(metrics.dropped_frames >= 1);
        assert_eq!(metrics.dropped_frames, 1);
    }

    #[tokio::test]
    async fn silent_stt_stops_after_transcription() {
        let h = harness_with(None, 0);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));
        h.orchestrator.on_audio_frame(&frame(&session.id, 0)).await;

        assert_eq!(h.stt.call_count(), 1);
        assert_eq!(event_kinds(&h.events), vec![SessionEventKind::Started]);
        assert!(h.enqueued.lock().is_empty());
    }

    #[test]
    fn end_session_is_terminal_and_idempotent() {
        let h = harness_with(Some("hola"), 0);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));

        let ended = h.orchestrator.end_session(&session.id).unwrap();
        assert_eq!(ended.state, SessionState::Ended);

        let again = h.orchestrator.end_session(&session.id).unwrap();
        assert_eq!(again.state, SessionState::Ended);

        // Exactly one ended event despite two calls.
        let kinds = event_kinds(&h.events);
        assert_eq!(
            kinds,
            vec![SessionEventKind::Started, SessionEventKind::Ended]
        );
    }

    #[tokio::test]
    async fn ended_event_carries_final_metrics() {
        let h = harness_with(Some("hola"), 0);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));
        h.orchestrator.on_audio_frame(&frame(&session.id, 0)).await;
        h.orchestrator.end_session(&session.id);

        let events = h.events.lock();
        let ended = events
            .iter()
            .find(|e| e.kind == SessionEventKind::Ended)
            .unwrap();
        assert_eq!(ended.payload["metrics"]["translatedChunks"], 1);
    }

    #[test]
    fn control_update_emits_event_with_new_values() {
        let h = harness_with(Some("hola"), 0);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));

        let updated = h
            .orchestrator
            .update_session_control(
                &session.id,
                ControlPatch {
                    source_language: Some(LanguageCode::En),
                    target_language: Some(LanguageCode::Es),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.source_language, LanguageCode::En);

        let events = h.events.lock();
        let control = events
            .iter()
            .find(|e| e.kind == SessionEventKind::ControlUpdated)
            .unwrap();
        assert_eq!(control.payload["sourceLanguage"], "en");
        assert_eq!(control.payload["targetLanguage"], "es");
    }

    #[test]
    fn control_update_on_ended_session_is_a_noop() {
        let h = harness_with(Some("hola"), 0);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));
        h.orchestrator.end_session(&session.id);
        let events_before = h.events.lock().len();

        let after = h
            .orchestrator
            .update_session_control(
                &session.id,
                ControlPatch {
                    mode: Some(SessionMode::Passthrough),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(after.mode, SessionMode::PrivateTranslation);
        assert_eq!(h.events.lock().len(), events_before);
    }

    #[test]
    fn egress_stats_feed_metrics() {
        let h = harness_with(Some("hola"), 0);
        let session = h.orchestrator.on_incoming_call(&handshake("sip-1"));

        h.orchestrator.report_egress_stats(
            &session.id,
            EgressReport {
                queue_size: 5,
                dropped_oldest: true,
            },
        );
        h.orchestrator.report_egress_stats(
            &session.id,
            EgressReport {
                queue_size: 2,
                dropped_oldest: false,
            },
        );

        let metrics = h.orchestrator.metrics_for(&session.id).unwrap();
        assert_eq!(metrics.egress_queue_peak, 5);
        assert_eq!(metrics.egress_drop_count, 1);
    }
}
