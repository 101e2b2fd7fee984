//! Shared data-model types used across modules
//!
//! Kept here (rather than duplicated per-module) to avoid circular
//! dependencies between the rules engine, pipeline, and coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session mode (spec.md §3 "Mode configuration").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Talks,
    Earbuds,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "talks" => Some(Mode::Talks),
            "earbuds" => Some(Mode::Earbuds),
            _ => None,
        }
    }
}

/// Resolved per-mode tunables (spec.md §3 table).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeConfig {
    pub translation_interval_ms: u64,
    pub pause_detection_ms: u64,
    pub min_words: usize,
    pub enable_tts: bool,
    pub display_visual_cards: bool,
}

impl ModeConfig {
    pub const fn default_for(mode: Mode) -> Self {
        match mode {
            Mode::Talks => Self {
                translation_interval_ms: 15_000,
                pause_detection_ms: 4_000,
                min_words: 6,
                enable_tts: false,
                display_visual_cards: true,
            },
            Mode::Earbuds => Self {
                translation_interval_ms: 15_000,
                pause_detection_ms: 4_000,
                min_words: 6,
                enable_tts: true,
                display_visual_cards: false,
            },
        }
    }
}

/// Trigger that caused a `decide()` call (spec.md §4.1 "Inputs").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Interim,
    Final,
    Pause,
}

/// Reason code attached to every decision and emitted translation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    SentenceEnding,
    MaxInterval,
    FinalResult,
    PauseDetected,
    WaitingForTrigger,
    TooFewWords,
    FillerWordsOnly,
    TooShort,
    EmptyText,
    MaxIntervalPoorQuality,
}

/// A single transcript update fed into the rules engine.
#[derive(Debug, Clone)]
pub struct TranscriptUpdate {
    pub text: String,
    pub is_final: bool,
    pub time_since_last_change_ms: u64,
    pub trigger: Trigger,
    pub client_id: String,
}

/// Output of `RulesEngine::decide`.
#[derive(Debug, Clone)]
pub struct Decision {
    pub should_translate: bool,
    pub reason: Reason,
    pub confidence: f32,
    pub new_text: String,
    pub is_complete: bool,
}

/// A translation event emitted to the client (spec.md §6 `translation-result`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationEvent {
    pub original: String,
    pub translated: String,
    pub accumulated: String,
    pub count: u64,
    pub is_interim: bool,
    pub reason: Reason,
}

/// Session identity (spec.md §3 "Identity").
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub client_id: String,
    pub remote_addr: std::net::IpAddr,
    pub created_at: DateTime<Utc>,
}

/// App version stamped onto persisted rows (spec.md §6 schema).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_config_defaults_match_spec() {
        let talks = ModeConfig::default_for(Mode::Talks);
        assert_eq!(talks.translation_interval_ms, 15_000);
        assert_eq!(talks.pause_detection_ms, 4_000);
        assert_eq!(talks.min_words, 6);
    }

    #[test]
    fn mode_parse_rejects_unknown() {
        assert!(Mode::parse("whisper").is_none());
        assert_eq!(Mode::parse("talks"), Some(Mode::Talks));
    }
}
