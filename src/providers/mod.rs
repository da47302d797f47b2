//! Provider capability interfaces for the three pipeline stages.
//!
//! ## Design
//! - Trait-driven provider abstraction: the orchestrator never knows which
//!   concrete STT/MT/TTS implementation is wired in
//! - `None` is the universal "nothing usable this time" result: silence,
//!   a declined translation, a timeout, a non-2xx response — the pipeline
//!   skips the frame and keeps streaming
//! - Provider selection is a startup-time decision driven by configuration
//!   (credentials present → cloud adapter, absent → stub), never a runtime
//!   capability probe

pub mod deepl;
pub mod stub;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::session::{AudioFrame, TranscriptionChunk, TranslationChunk, TtsChunk};

/// Streaming speech-to-text capability.
///
/// Implementations may buffer audio across calls for the same session;
/// callers must tolerate arbitrarily long runs of `None`.
#[async_trait]
pub trait StreamingSttProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe one frame. `None` means no transcript for this frame
    /// (silence, partial below threshold, provider failure).
    async fn transcribe(&self, frame: &AudioFrame) -> Option<TranscriptionChunk>;
}

/// Machine-translation capability.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Translate a transcript. `None` means the translator declined
    /// (empty input, rate-limited, or failure surfaced as skip).
    async fn translate(&self, transcript: &TranscriptionChunk) -> Option<TranslationChunk>;
}

/// Text-to-speech capability.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, translation: &TranslationChunk) -> Option<TtsChunk>;
}

/// The provider set the orchestrator is constructed with.
#[derive(Clone)]
pub struct ProviderSet {
    pub stt: Arc<dyn StreamingSttProvider>,
    pub translation: Arc<dyn TranslationProvider>,
    pub tts: Arc<dyn TtsProvider>,
}

/// Select providers from configuration. Credentials pick cloud adapters;
/// their absence selects stubs so the gateway can smoke-test end to end
/// without any external account.
pub fn create_providers(config: &Config) -> ProviderSet {
    let stt: Arc<dyn StreamingSttProvider> =
        Arc::new(stub::StubSttProvider::new(config.stub_stt_text.clone()));

    let translation: Arc<dyn TranslationProvider> = match config.deepl_api_key.as_deref() {
        Some(key) => Arc::new(deepl::DeeplTranslationProvider::new(
            key.to_string(),
            deepl::DEFAULT_TIMEOUT,
        )),
        None => Arc::new(stub::StubTranslationProvider::new()),
    };

    let tts: Arc<dyn TtsProvider> = Arc::new(stub::StubTtsProvider::new());

    tracing::info!(
        stt = stt.name(),
        translation = translation.name(),
        tts = tts.name(),
        "Pipeline providers selected"
    );

    ProviderSet {
        stt,
        translation,
        tts,
    }
}
