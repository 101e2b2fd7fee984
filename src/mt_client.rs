//! MT Client (C5)
//!
//! Thin wrapper over the cloud machine-translation API: request shaping,
//! glossary selection, and retry policy. Vendor calls are behind the
//! `Translator` trait so the pipeline can be exercised with a mock in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::MtConfig;

/// Glossary resource names, one per direction (spec.md §4.5 "Glossary selection").
const GLOSSARY_RO_EN: &str = "ro-en";
const GLOSSARY_EN_RO: &str = "en-ro";

#[derive(Debug, Clone, Serialize)]
pub struct TranslateRequest {
    pub parent: String,
    pub contents: Vec<String>,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "sourceLangCode")]
    pub source_lang_code: String,
    #[serde(rename = "targetLangCode")]
    pub target_lang_code: String,
    #[serde(rename = "glossaryConfig", skip_serializing_if = "Option::is_none")]
    pub glossary_config: Option<GlossaryConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlossaryConfig {
    pub glossary: String,
    #[serde(rename = "ignoreCase")]
    pub ignore_case: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateResponse {
    pub translation: String,
    #[serde(rename = "glossaryTranslation", default)]
    pub glossary_translation: Option<String>,
}

impl TranslateResponse {
    /// Prefer the glossary-aware field when present (spec.md §4.5).
    pub fn best(&self) -> &str {
        self.glossary_translation.as_deref().unwrap_or(&self.translation)
    }
}

/// Classification used by the retry loop to decide whether to retry, retry
/// without a glossary, or surface the error immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtErrorKind {
    Retryable,
    GlossaryMissing,
    Fatal,
}

#[derive(Debug, thiserror::Error)]
#[error("MT call failed: {message}")]
pub struct MtError {
    pub message: String,
    pub kind: MtErrorKind,
}

impl MtError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: MtErrorKind::Retryable,
        }
    }

    pub fn glossary_missing(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: MtErrorKind::GlossaryMissing,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: MtErrorKind::Fatal,
        }
    }

    /// Classify a raw transport/status signal (spec.md §4.5 "Retry policy").
    pub fn classify(status: Option<u16>, grpc_code: Option<u32>, message: &str) -> MtErrorKind {
        let lower = message.to_lowercase();
        if lower.contains("not found") || lower.contains("glossary") {
            return MtErrorKind::GlossaryMissing;
        }
        if matches!(status, Some(503) | Some(429))
            || matches!(grpc_code, Some(14) | Some(8))
            || lower.contains("econnreset")
            || lower.contains("etimedout")
        {
            return MtErrorKind::Retryable;
        }
        MtErrorKind::Fatal
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate_raw(&self, request: &TranslateRequest) -> Result<TranslateResponse, MtError>;
}

/// Retries a single logical translation call per spec.md §4.5: exponential
/// backoff (base 1s, factor 2, cap 5s), max 3 counted attempts, with a
/// glossary-fallback path that retries without incrementing the counter.
pub struct MtClient<T: Translator> {
    translator: T,
    config: MtConfig,
    parent: String,
}

impl<T: Translator> MtClient<T> {
    pub fn new(translator: T, config: MtConfig, parent: String) -> Self {
        Self {
            translator,
            config,
            parent,
        }
    }

    /// Translate `text` from `source_lang` to `target_lang`, applying
    /// glossary selection and retry/backoff policy.
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, MtError> {
        let mut glossary_enabled = self.config.glossary_enabled && glossary_name(source_lang, target_lang).is_some();
        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(self.config.backoff_base_ms);

        loop {
            let request = self.build_request(text, source_lang, target_lang, glossary_enabled);
            match self.translator.translate_raw(&request).await {
                Ok(response) => return Ok(response.best().to_string()),
                Err(err) => match err.kind {
                    MtErrorKind::GlossaryMissing if glossary_enabled => {
                        // Disable glossary and retry without counting the attempt.
                        glossary_enabled = false;
                        continue;
                    }
                    MtErrorKind::Retryable if attempt + 1 < self.config.max_retry_attempts => {
                        attempt += 1;
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_millis(self.config.backoff_cap_ms));
                        continue;
                    }
                    _ => return Err(err),
                },
            }
        }
    }

    fn build_request(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        glossary_enabled: bool,
    ) -> TranslateRequest {
        let glossary_config = if glossary_enabled {
            glossary_name(source_lang, target_lang).map(|name| GlossaryConfig {
                glossary: name.to_string(),
                ignore_case: true,
            })
        } else {
            None
        };

        TranslateRequest {
            parent: self.parent.clone(),
            contents: vec![text.to_string()],
            mime_type: "text/plain".to_string(),
            source_lang_code: source_lang.to_string(),
            target_lang_code: target_lang.to_string(),
            glossary_config,
        }
    }
}

/// Resolve the named glossary resource for a language pair, if any exists
/// (spec.md §4.5: only `(ro,en)` and `(en,ro)` are glossaried).
fn glossary_name(source_lang: &str, target_lang: &str) -> Option<&'static str> {
    let source_base = source_lang.split('-').next().unwrap_or(source_lang);
    let target_base = target_lang.split('-').next().unwrap_or(target_lang);
    match (source_base, target_base) {
        ("ro", "en") => Some(GLOSSARY_RO_EN),
        ("en", "ro") => Some(GLOSSARY_EN_RO),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyTranslator {
        calls: Arc<AtomicU32>,
        fail_times: u32,
        kind: MtErrorKind,
    }

    #[async_trait]
    impl Translator for FlakyTranslator {
        async fn translate_raw(&self, request: &TranslateRequest) -> Result<TranslateResponse, MtError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return Err(MtError {
                    message: "synthetic failure".to_string(),
                    kind: self.kind,
                });
            }
            Ok(TranslateResponse {
                translation: format!("translated:{}", request.contents[0]),
                glossary_translation: request.glossary_config.as_ref().map(|_| "glossary-translated".to_string()),
            })
        }
    }

    fn config() -> MtConfig {
        MtConfig {
            glossary_enabled: true,
            translation_model: "nmt".to_string(),
            google_cloud_project: Some("proj".to_string()),
            google_cloud_location: Some("global".to_string()),
            max_retry_attempts: 3,
            backoff_base_ms: 1,
            backoff_cap_ms: 2,
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds_within_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let translator = FlakyTranslator {
            calls: calls.clone(),
            fail_times: 2,
            kind: MtErrorKind::Retryable,
        };
        let client = MtClient::new(translator, config(), "projects/p/locations/global".to_string());
        let result = client.translate("hello", "en-US", "ro").await.unwrap();
        assert_eq!(result, "translated:hello");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let translator = FlakyTranslator {
            calls: calls.clone(),
            fail_times: 10,
            kind: MtErrorKind::Retryable,
        };
        let client = MtClient::new(translator, config(), "projects/p/locations/global".to_string());
        let err = client.translate("hello", "en-US", "ro").await.unwrap_err();
        assert_eq!(err.kind, MtErrorKind::Retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn glossary_not_found_disables_and_retries_without_counting() {
        let calls = Arc::new(AtomicU32::new(0));
        let translator = FlakyTranslator {
            calls: calls.clone(),
            fail_times: 1,
            kind: MtErrorKind::GlossaryMissing,
        };
        let client = MtClient::new(translator, config(), "projects/p/locations/global".to_string());
        let result = client.translate("buna", "ro-RO", "en").await.unwrap();
        assert_eq!(result, "translated:buna");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn glossary_only_selected_for_named_pairs() {
        assert_eq!(glossary_name("ro-RO", "en"), Some(GLOSSARY_RO_EN));
        assert_eq!(glossary_name("en-US", "ro"), Some(GLOSSARY_EN_RO));
        assert_eq!(glossary_name("fr-FR", "en"), None);
    }

    #[test]
    fn classify_maps_known_codes() {
        assert_eq!(MtError::classify(Some(503), None, "unavailable"), MtErrorKind::Retryable);
        assert_eq!(MtError::classify(None, Some(8), "resource exhausted"), MtErrorKind::Retryable);
        assert_eq!(MtError::classify(Some(404), None, "glossary not found"), MtErrorKind::GlossaryMissing);
        assert_eq!(MtError::classify(Some(400), None, "bad request"), MtErrorKind::Fatal);
    }
}
