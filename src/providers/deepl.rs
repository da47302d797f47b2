//! DeepL REST machine-translation adapter.
//!
//! Cloud-backed MT for the configured language pair. Every request carries a
//! deadline; timeouts, quota errors, and bad responses all surface to the
//! pipeline as `None` so a flaky translator can never stall a call.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::session::{LanguageCode, TranscriptionChunk, TranslationChunk};

use super::TranslationProvider;

/// Free-tier endpoint; the pro tier lives at `api.deepl.com`.
const API_BASE_URL: &str = "https://api-free.deepl.com/v2";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_500);

fn deepl_lang_code(lang: LanguageCode) -> &'static str {
    match lang {
        LanguageCode::En => "EN-US",
        LanguageCode::Es => "ES",
    }
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<TranslationEntry>,
}

#[derive(Debug, Deserialize)]
struct TranslationEntry {
    text: String,
}

pub struct DeeplTranslationProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl DeeplTranslationProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self::with_base_url(api_key, timeout, API_BASE_URL.to_string())
    }

    /// Point the adapter at a different endpoint (pro tier, tests).
    pub fn with_base_url(api_key: String, timeout: Duration, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl TranslationProvider for DeeplTranslationProvider {
    fn name(&self) -> &str {
        "deepl"
    }

    async fn translate(&self, transcript: &TranscriptionChunk) -> Option<TranslationChunk> {
        let text = transcript.text.trim();
        if text.is_empty() {
            return None;
        }

        let source = transcript.language;
        let target = source.counterpart();
        let url = format!("{}/translate", self.base_url);
        let body = serde_json::json!({
            "text": [text],
            "source_lang": deepl_lang_code(source),
            "target_lang": deepl_lang_code(target),
        });

        let response = self
            .client
            .post(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("DeepL-Auth-Key {}", self.api_key),
            )
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(session_id = %transcript.session_id, error = %e, "DeepL request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            // 456 is DeepL's quota-exceeded code.
            tracing::warn!(
                session_id = %transcript.session_id,
                status = status.as_u16(),
                "DeepL returned non-success"
            );
            return None;
        }

        let parsed: TranslateResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(session_id = %transcript.session_id, error = %e, "DeepL response decode failed");
                return None;
            }
        };

        let translated = parsed.translations.into_iter().next()?.text;
        if translated.trim().is_empty() {
            return None;
        }

        Some(TranslationChunk {
            session_id: transcript.session_id.clone(),
            text: translated.trim().to_string(),
            source_language: source,
            target_language: target,
            timestamp_ms: transcript.timestamp_ms,
        })
    }
}
