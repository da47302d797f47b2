//! Credential-free stub providers for local smoke tests.
//!
//! The stubs keep the full pipeline exercisable without any cloud account:
//! STT emits a configured line of text (or nothing), MT applies the
//! cross-language policy verbatim, TTS emits a short silent PCM payload.

use async_trait::async_trait;

use crate::session::{
    now_epoch_ms, AudioEncoding, AudioFrame, LanguageCode, TranscriptionChunk, TranslationChunk,
    TtsChunk,
};

use super::{StreamingSttProvider, TranslationProvider, TtsProvider};

/// Stateless STT stub. With no configured text it reports silence for every
/// frame, which still exercises the orchestrator's skip path.
pub struct StubSttProvider {
    text: Option<String>,
}

impl StubSttProvider {
    pub fn new(text: Option<String>) -> Self {
        Self {
            text: text.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl StreamingSttProvider for StubSttProvider {
    fn name(&self) -> &str {
        "stub-stt"
    }

    async fn transcribe(&self, frame: &AudioFrame) -> Option<TranscriptionChunk> {
        let text = self.text.clone()?;
        if frame.payload.is_empty() {
            return None;
        }
        Some(TranscriptionChunk {
            session_id: frame.session_id.clone(),
            text,
            is_final: true,
            language: LanguageCode::Es,
            timestamp_ms: frame.timestamp_ms,
        })
    }
}

/// Pass-through translator: returns the transcript text untouched with the
/// target language chosen by the cross-language policy.
pub struct StubTranslationProvider;

impl StubTranslationProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubTranslationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranslationProvider for StubTranslationProvider {
    fn name(&self) -> &str {
        "stub-translate"
    }

    async fn translate(&self, transcript: &TranscriptionChunk) -> Option<TranslationChunk> {
        if transcript.text.trim().is_empty() {
            return None;
        }
        Some(TranslationChunk {
            session_id: transcript.session_id.clone(),
            text: transcript.text.clone(),
            source_language: transcript.language,
            target_language: transcript.language.counterpart(),
            timestamp_ms: transcript.timestamp_ms,
        })
    }
}

/// Silent-payload synthesizer: 20 ms of 16 kHz mono PCM16 zeros.
pub struct StubTtsProvider;

impl StubTtsProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubTtsProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// 16 kHz * 16-bit mono * 20 ms.
const SILENT_PAYLOAD_BYTES: usize = 640;

#[async_trait]
impl TtsProvider for StubTtsProvider {
    fn name(&self) -> &str {
        "stub-tts"
    }

    async fn synthesize(&self, translation: &TranslationChunk) -> Option<TtsChunk> {
        if translation.text.trim().is_empty() {
            return None;
        }
        Some(TtsChunk {
            session_id: translation.session_id.clone(),
            encoding: AudioEncoding::PcmS16le,
            sample_rate_hz: 16_000,
            payload: vec![0u8; SILENT_PAYLOAD_BYTES],
            timestamp_ms: now_epoch_ms(),
        })
    }
}
