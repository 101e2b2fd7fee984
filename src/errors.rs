//! Error taxonomy for the relay
//!
//! Mirrors the propagation policy: input validation and admission errors
//! are typed so the transport layer can map them onto the `code` field of
//! `connection-error` / `recognition-error` events; everything downstream
//! of an external call (MT, ASR) is wrapped in `anyhow` with context.

use thiserror::Error;

/// Errors surfaced to a client as a structured event code.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid source language tag: {0}")]
    InvalidSourceLanguage(String),

    #[error("invalid target language tag: {0}")]
    InvalidTargetLanguage(String),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("translation interval out of range: {0}ms")]
    InvalidTranslationInterval(u64),

    #[error("audio chunk too large: {got} bytes (max {max})")]
    ChunkTooLarge { got: usize, max: usize },

    #[error("audio rate limit exceeded")]
    RateLimited,

    #[error("translation failed: {0}")]
    TranslationFailed(#[source] anyhow::Error),

    #[error("glossary unavailable for this request")]
    GlossaryUnavailable,

    #[error("ASR stream failed fatally: {0}")]
    AsrFatal(String),

    #[error("maximum ASR restart attempts exceeded")]
    AsrRestartsExceeded,

    #[error("connection refused: {reason}")]
    AdmissionDenied { reason: &'static str },

    #[error("required configuration missing: {0}")]
    ConfigMissing(&'static str),
}

impl RelayError {
    /// Stable machine-readable code for `connection-error` / `recognition-error` payloads.
    pub fn event_code(&self) -> &'static str {
        match self {
            RelayError::InvalidSourceLanguage(_) => "invalid_source_language",
            RelayError::InvalidTargetLanguage(_) => "invalid_target_language",
            RelayError::InvalidMode(_) => "invalid_mode",
            RelayError::InvalidTranslationInterval(_) => "invalid_translation_interval",
            RelayError::ChunkTooLarge { .. } => "chunk_too_large",
            RelayError::RateLimited => "rate_limited",
            RelayError::TranslationFailed(_) => "translation_failed",
            RelayError::GlossaryUnavailable => "glossary_unavailable",
            RelayError::AsrFatal(_) => "asr_fatal",
            RelayError::AsrRestartsExceeded => "asr_restarts_exceeded",
            RelayError::AdmissionDenied { .. } => "admission_denied",
            RelayError::ConfigMissing(_) => "config_missing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_are_stable() {
        assert_eq!(
            RelayError::ChunkTooLarge { got: 10, max: 5 }.event_code(),
            "chunk_too_large"
        );
        assert_eq!(RelayError::RateLimited.event_code(), "rate_limited");
    }
}
