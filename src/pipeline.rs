//! Translation Pipeline (C2)
//!
//! Turns an approved decision and the full transcript into exactly one
//! emitted translation event (or none, if deduplicated). Full-context
//! translation plus longest-common-prefix extraction is the quality-critical
//! technique this module exists to protect: see the divergence-cascade
//! note on `commit()` below.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::mt_client::{MtClient, MtError, Translator};
use crate::rules_engine::RulesEngine;
use crate::types::{Reason, TranslationEvent};

/// Ordered case-insensitive term replacements. The exact mapping set is
/// external configuration (spec.md §4.2 step 4); this is the in-process
/// representation `terms.toml` deserializes into.
#[derive(Debug, Clone)]
pub struct TermMapping {
    pub pattern: String,
    pub replacement: String,
    /// Only apply when this substring appears (case-insensitively) in the
    /// source text, for source-aware rules.
    pub source_hint: Option<String>,
}

/// Hard-coded canonical spellings for religious proper nouns, applied only
/// when `targetLang == "ro"` (spec.md §4.2 step 4).
#[derive(Debug, Clone)]
pub struct ProperNounRule {
    pub trigger_in_source: String,
    pub variants: Vec<String>,
    pub canonical: String,
}

/// Per-pipeline-run outcome.
pub enum PipelineOutcome {
    Emitted(TranslationEvent),
    Deduplicated,
    Error(String),
}

/// Persistent pipeline state owned by a single session (spec.md §3).
pub struct Pipeline {
    /// Raw MT output of the full transcript from the most recent call.
    /// Invariant I2: always the latest raw output, never a concatenation
    /// of emitted tails.
    committed_translation: String,
    accumulated_text: String,
    count: u64,
    lcp_threshold: f32,
    term_mappings: Vec<TermMapping>,
    proper_noun_rules: Vec<ProperNounRule>,
}

impl Pipeline {
    pub fn new(lcp_threshold: f32, term_mappings: Vec<TermMapping>, proper_noun_rules: Vec<ProperNounRule>) -> Self {
        Self {
            committed_translation: String::new(),
            accumulated_text: String::new(),
            count: 0,
            lcp_threshold,
            term_mappings,
            proper_noun_rules,
        }
    }

    pub fn committed_translation(&self) -> &str {
        &self.committed_translation
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Reset `committedTranslation` on ASR restart; `accumulatedText` and
    /// `lastTranslatedText` survive elsewhere (spec.md I6, owned by the
    /// coordinator and rules engine respectively).
    pub fn reset_committed_translation(&mut self) {
        self.committed_translation.clear();
    }

    /// Run the full pipeline for one approved decision.
    pub async fn run<T: Translator>(
        &mut self,
        mt: &MtClient<T>,
        rules: &mut RulesEngine,
        full_text: &str,
        new_text: &str,
        source_lang: &str,
        target_lang: &str,
        reason: Reason,
        is_complete: bool,
    ) -> PipelineOutcome {
        let translated_full = match mt.translate(full_text, source_lang, target_lang).await {
            Ok(t) => t,
            Err(MtError { message, .. }) => return PipelineOutcome::Error(message),
        };

        let emitted_raw = self.lcp_extract(&translated_full);

        // Commit is the raw MT output, never `committed + emitted` — doing
        // the latter drifts LCP comparisons away from anything MT actually
        // produced (the divergence-cascade trap).
        self.commit(translated_full);

        let emitted = self.post_process(&emitted_raw, new_text, target_lang);

        if rules.is_duplicate(&emitted) {
            return PipelineOutcome::Deduplicated;
        }
        rules.record_translation(&emitted);

        self.accumulated_text.push(' ');
        self.accumulated_text.push_str(&emitted);
        self.accumulated_text = tail_chars(self.accumulated_text.trim(), 1000);

        self.count += 1;

        PipelineOutcome::Emitted(TranslationEvent {
            original: new_text.to_string(),
            translated: emitted,
            accumulated: self.accumulated_text.clone(),
            count: self.count,
            is_interim: !is_complete,
            reason,
        })
    }

    fn commit(&mut self, translated_full: String) {
        self.committed_translation = translated_full;
    }

    /// Longest-common-prefix word extraction (spec.md §4.2 step 2).
    fn lcp_extract(&self, translated_full: &str) -> String {
        if self.committed_translation.is_empty() {
            return translated_full.to_string();
        }

        let committed_words: Vec<&str> = self.committed_translation.split_whitespace().collect();
        let full_words: Vec<&str> = translated_full.split_whitespace().collect();

        let mut match_count = 0;
        for (a, b) in full_words.iter().zip(committed_words.iter()) {
            if normalize_word(a) == normalize_word(b) {
                match_count += 1;
            } else {
                break;
            }
        }

        let match_ratio = if committed_words.is_empty() {
            0.0
        } else {
            match_count as f32 / committed_words.len() as f32
        };

        if match_ratio >= self.lcp_threshold {
            full_words[match_count..].join(" ")
        } else {
            // Fallback: emit the full translation rather than re-translate
            // the delta alone, which reads as foreign-sounding (spec.md §9
            // Open Question, resolved: threshold 0.60, fallback = emit full).
            translated_full.to_string()
        }
    }

    fn post_process(&self, emitted: &str, new_text: &str, target_lang: &str) -> String {
        let mut text = emitted.to_string();
        text = apply_term_mappings(&text, new_text, &self.term_mappings);
        if target_lang == "ro" {
            text = apply_proper_noun_rules(&text, new_text, &self.proper_noun_rules);
        }
        text = preserve_numbers(&text, new_text);
        text = preserve_dates(&text, new_text);
        text = single_word_fallback(&text, new_text);
        text
    }
}

fn normalize_word(w: &str) -> String {
    w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

fn apply_term_mappings(text: &str, source: &str, mappings: &[TermMapping]) -> String {
    let source_lc = source.to_lowercase();
    let mut result = text.to_string();
    for mapping in mappings {
        if let Some(hint) = &mapping.source_hint {
            if !source_lc.contains(&hint.to_lowercase()) {
                continue;
            }
        }
        if let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&mapping.pattern))) {
            result = re.replace_all(&result, mapping.replacement.as_str()).into_owned();
        }
    }
    result
}

fn apply_proper_noun_rules(text: &str, source: &str, rules: &[ProperNounRule]) -> String {
    let source_lc = source.to_lowercase();
    let mut result = text.to_string();
    for rule in rules {
        if !source_lc.contains(&rule.trigger_in_source.to_lowercase()) {
            continue;
        }
        for variant in &rule.variants {
            if let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(variant))) {
                result = re.replace_all(&result, rule.canonical.as_str()).into_owned();
            }
        }
    }
    result
}

static MULTI_GROUP_THOUSANDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d{3})+").unwrap());
static DECIMAL_OR_THOUSANDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?").unwrap());
static BARE_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static DIGITS_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").unwrap());

/// Preserve source numeric tokens in the translated output (spec.md §4.2
/// step 4). Multi-group-thousands tokens are skipped — MT correctly
/// converts the separator convention for those, so no substitution is
/// needed (scenario 6: `1.234.567` → `1,234,567`).
fn preserve_numbers(text: &str, source: &str) -> String {
    let multi_group_spans: Vec<(usize, usize)> =
        MULTI_GROUP_THOUSANDS.find_iter(source).map(|m| (m.start(), m.end())).collect();
    let source_numbers: Vec<&str> = DECIMAL_OR_THOUSANDS
        .find_iter(source)
        .filter(|m| !multi_group_spans.iter().any(|(start, end)| m.start() >= *start && m.end() <= *end))
        .map(|m| m.as_str())
        .collect();
    let source_numbers: Vec<&str> = if source_numbers.is_empty() {
        BARE_INTEGER.find_iter(source).map(|m| m.as_str()).collect()
    } else {
        source_numbers
    };

    if source_numbers.is_empty() {
        return text.to_string();
    }

    let output_numbers: Vec<&str> = BARE_INTEGER.find_iter(text).map(|m| m.as_str()).collect();

    if output_numbers.len() == source_numbers.len() {
        let mut result = String::new();
        let mut last_end = 0;
        for (idx, m) in BARE_INTEGER.find_iter(text).enumerate() {
            result.push_str(&text[last_end..m.start()]);
            result.push_str(source_numbers[idx]);
            last_end = m.end();
        }
        result.push_str(&text[last_end..]);
        return result;
    }

    // Counts differ: substitute number words whose digits match a
    // contiguous numeric run in the output's digit stream (best-effort;
    // this covers the common "fourteen" → "14" case via a fixed lexicon).
    let mut result = text.to_string();
    for source_number in &source_numbers {
        let digits: String = DIGITS_ONLY.find_iter(source_number).map(|m| m.as_str()).collect();
        if let Some(word) = number_word_for(&digits) {
            if let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))) {
                result = re.replace(&result, source_number.to_string()).into_owned();
            }
        }
    }
    result
}

fn number_word_for(digits: &str) -> Option<&'static str> {
    match digits {
        "1" => Some("one"),
        "2" => Some("two"),
        "3" => Some("three"),
        "4" => Some("four"),
        "5" => Some("five"),
        "6" => Some("six"),
        "7" => Some("seven"),
        "8" => Some("eight"),
        "9" => Some("nine"),
        "10" => Some("ten"),
        "11" => Some("eleven"),
        "12" => Some("twelve"),
        "13" => Some("thirteen"),
        "14" => Some("fourteen"),
        "15" => Some("fifteen"),
        "16" => Some("sixteen"),
        "17" => Some("seventeen"),
        "18" => Some("eighteen"),
        "19" => Some("nineteen"),
        "20" => Some("twenty"),
        _ => None,
    }
}

static DATE_TRIPLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s+(ianuarie|februarie|martie|aprilie|mai|iunie|iulie|august|septembrie|octombrie|noiembrie|decembrie|january|february|march|april|june|july|september|october|november|december)\s+(\d{4})\b").unwrap()
});

/// Preserve `day month year` triples (spec.md §4.2 step 4): if day and year
/// survive in the output but the month name was dropped, inject it back in
/// between.
fn preserve_dates(text: &str, source: &str) -> String {
    let mut result = text.to_string();
    for caps in DATE_TRIPLE.captures_iter(source) {
        let day = &caps[1];
        let month = &caps[2];
        let year = &caps[3];
        let has_month = result.to_lowercase().contains(&month.to_lowercase());
        if has_month {
            continue;
        }
        let bare = format!("{} {}", day, year);
        if result.contains(&bare) {
            let injected = format!("{} {} {}", day, month, year);
            result = result.replacen(&bare, &injected, 1);
        }
    }
    result
}

/// If source and emitted text are equal once Unicode-NFD-decomposed,
/// diacritic-stripped, and lowercased, substitute from a small hard-coded
/// map (spec.md §4.2 step 4, single-word fallback).
fn single_word_fallback(text: &str, source: &str) -> String {
    if source.split_whitespace().count() != 1 {
        return text.to_string();
    }
    if strip_diacritics(text).to_lowercase() == strip_diacritics(source).to_lowercase() {
        if let Some(mapped) = hardcoded_single_word_map(source) {
            return mapped.to_string();
        }
    }
    text.to_string()
}

fn strip_diacritics(s: &str) -> String {
    // NFD decomposition followed by combining-mark removal, approximated
    // without a normalization crate via the common Romanian diacritic set.
    s.chars()
        .map(|c| match c {
            'ă' | 'â' => 'a',
            'Ă' | 'Â' => 'A',
            'î' => 'i',
            'Î' => 'I',
            'ș' | 'ş' => 's',
            'Ș' | 'Ş' => 'S',
            'ț' | 'ţ' => 't',
            'Ț' | 'Ţ' => 'T',
            other => other,
        })
        .collect()
}

/// Single-word proper nouns MT is prone to leave untranslated (the output
/// equals the source once diacritics/case are stripped). Keyed on the
/// diacritic-stripped, lowercased source word.
fn hardcoded_single_word_map(source: &str) -> Option<&'static str> {
    let key = strip_diacritics(source).to_lowercase();
    match key.as_str() {
        "iehova" => Some("Jehovah"),
        "isus" => Some("Jesus"),
        "dumnezeu" => Some("God"),
        "biblia" => Some("Bible"),
        "crestin" | "crestini" => Some("Christian"),
        _ => None,
    }
}

fn tail_chars(s: &str, max: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max {
        s.to_string()
    } else {
        chars[chars.len() - max..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MtConfig, RulesEngineConfig};
    use crate::mt_client::{MtClient, TranslateRequest, TranslateResponse};
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoTranslator {
        canned: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Translator for EchoTranslator {
        async fn translate_raw(&self, _request: &TranslateRequest) -> Result<TranslateResponse, MtError> {
            let mut canned = self.canned.lock().unwrap();
            let next = if canned.is_empty() {
                "translated".to_string()
            } else {
                canned.remove(0)
            };
            Ok(TranslateResponse {
                translation: next,
                glossary_translation: None,
            })
        }
    }

    fn mt_client(canned: Vec<&str>) -> MtClient<EchoTranslator> {
        MtClient::new(
            EchoTranslator {
                canned: std::sync::Mutex::new(canned.into_iter().map(String::from).collect()),
            },
            MtConfig {
                glossary_enabled: false,
                translation_model: "nmt".to_string(),
                google_cloud_project: None,
                google_cloud_location: None,
                max_retry_attempts: 3,
                backoff_base_ms: 1,
                backoff_cap_ms: 2,
            },
            "projects/p/locations/global".to_string(),
        )
    }

    fn rules() -> RulesEngine {
        RulesEngine::new(
            RulesEngineConfig::default(),
            Duration::from_millis(15_000),
            Duration::from_millis(4_000),
            6,
        )
    }

    #[tokio::test]
    async fn lcp_extraction_emits_new_tail_and_commits_raw_output() {
        let mut pipeline = Pipeline::new(0.60, vec![], vec![]);
        pipeline.committed_translation = "The book of Obadiah is".to_string();
        let mt = mt_client(vec!["The book of Obadiah is one of the shortest"]);
        let mut rules = rules();

        let outcome = pipeline
            .run(&mt, &mut rules, "full transcript", "one of the shortest", "ro-RO", "en", Reason::SentenceEnding, true)
            .await;

        match outcome {
            PipelineOutcome::Emitted(event) => {
                assert_eq!(event.translated, "one of the shortest");
            }
            _ => panic!("expected emission"),
        }
        assert_eq!(pipeline.committed_translation(), "The book of Obadiah is one of the shortest");
    }

    #[tokio::test]
    async fn commit_never_concatenates_with_prior_emission() {
        let mut pipeline = Pipeline::new(0.60, vec![], vec![]);
        pipeline.committed_translation = "hello".to_string();
        let mt = mt_client(vec!["hello there friend"]);
        let mut rules = rules();

        let _ = pipeline
            .run(&mt, &mut rules, "full", "there friend", "en-US", "ro", Reason::MaxInterval, false)
            .await;

        // Commit equals the raw MT output, never `committed + emitted`.
        assert_eq!(pipeline.committed_translation(), "hello there friend");
    }

    #[test]
    fn number_preservation_skips_multi_group_thousands() {
        let out = preserve_numbers("it was the year 1,234,567", "era anul 1.234.567");
        assert_eq!(out, "it was the year 1,234,567");
    }

    #[test]
    fn number_preservation_substitutes_digits_for_number_words() {
        let out = preserve_numbers("chapter fourteen verse three", "capitolul 14 versetul 3");
        assert_eq!(out, "chapter 14 verse 3");
    }

    #[test]
    fn number_preservation_is_noop_when_digits_already_match() {
        let out = preserve_numbers("chapter 14 verse 3", "capitolul 14 versetul 3");
        assert_eq!(out, "chapter 14 verse 3");
    }

    #[test]
    fn single_word_fallback_substitutes_untranslated_proper_noun() {
        let out = single_word_fallback("Iehova", "Iehova");
        assert_eq!(out, "Jehovah");
    }

    #[test]
    fn single_word_fallback_is_noop_for_multi_word_source() {
        let out = single_word_fallback("Iehova", "Iehova este bun");
        assert_eq!(out, "Iehova");
    }

    #[tokio::test]
    async fn duplicate_emission_updates_commit_but_not_count() {
        let mut pipeline = Pipeline::new(0.60, vec![], vec![]);
        let mt = mt_client(vec!["same text"]);
        let mut rules = rules();
        rules.record_translation("same text");

        let outcome = pipeline
            .run(&mt, &mut rules, "full", "same text", "en-US", "ro", Reason::FinalResult, true)
            .await;

        assert!(matches!(outcome, PipelineOutcome::Deduplicated));
        assert_eq!(pipeline.committed_translation(), "same text");
        assert_eq!(pipeline.count(), 0);
    }
}
