//! Rules Engine (C1)
//!
//! Decides per transcript update whether to trigger a translation, and
//! extracts the "new text" delta that should actually be sent for
//! translation. Pure and synchronous: no I/O, no async, so the decision
//! logic is exhaustively unit-testable against the literal scenarios in
//! spec.md §8.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::RulesEngineConfig;
use crate::types::{Decision, Reason, Trigger};

/// Fillers stripped before the filler-only quality check (spec.md §4.1).
const FILLERS: &[&str] = &["uh", "um", "ah", "hmm", "eh", "er", "like", "ă", "e", "ei", "păi", "deci", "adică"];

/// Multi-word fillers, stripped as substrings before single-token filtering
/// since `split_whitespace` never produces a token equal to a phrase.
const FILLER_PHRASES: &[&str] = &["you know"];

const SENTENCE_ENDERS: &[char] = &['.', '!', '?', '。', '！', '？'];

/// One recorded translation output, used for post-translation duplicate
/// detection (spec.md §4.1 "Post-translation duplicate detection").
#[derive(Debug, Clone)]
struct RecentTranslation {
    text: String,
    at: Instant,
}

/// Per-session metrics counters (spec.md §3 "Metrics counters").
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub checks: u64,
    pub approvals: u64,
    pub rejections: u64,
    pub rejections_by_reason: HashMap<Reason, u64>,
}

/// Per-session rules-engine state (spec.md §3 "Rules Engine state").
pub struct RulesEngine {
    config: RulesEngineConfig,
    translation_interval: Duration,
    pause_detection: Duration,
    min_words: usize,

    last_translation_time: Option<Instant>,
    last_translated_text: String,
    recent_translations: Vec<RecentTranslation>,
    metrics: Metrics,
}

impl RulesEngine {
    pub fn new(
        config: RulesEngineConfig,
        translation_interval: Duration,
        pause_detection: Duration,
        min_words: usize,
    ) -> Self {
        Self {
            config,
            translation_interval,
            pause_detection,
            min_words,
            last_translation_time: None,
            last_translated_text: String::new(),
            recent_translations: Vec::new(),
            metrics: Metrics::default(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Make a single decision for a transcript update (spec.md §4.1).
    pub fn decide(&mut self, update: &UpdateInput) -> Decision {
        self.metrics.checks += 1;
        let now = Instant::now();
        // `lastTranslationTime` is initialized on first check (spec.md §3).
        let last_translation_time = *self.last_translation_time.get_or_insert(now);

        let trimmed = update.text.trim();
        let quality = quality_check(trimmed, self.min_words);

        let sentence_ending = is_sentence_ending(trimmed);
        let max_interval_reached = now.duration_since(last_translation_time) >= self.translation_interval;

        let decision = if sentence_ending && quality.is_ok() {
            Some(self.approve(trimmed, Reason::SentenceEnding, 1.0, now))
        } else if max_interval_reached {
            if quality.is_ok() {
                Some(self.approve(trimmed, Reason::MaxInterval, 0.9, now))
            } else {
                // Timer is not reset on rejection (spec.md §4.1).
                Some(self.reject(Reason::MaxIntervalPoorQuality))
            }
        } else if update.is_final {
            if quality.is_ok() && quality != QualityResult::FillerOnly {
                Some(self.approve(trimmed, Reason::FinalResult, 0.8, now))
            } else {
                Some(self.reject(quality.reason().unwrap_or(Reason::FillerWordsOnly)))
            }
        } else if update.trigger == Trigger::Pause
            && update.time_since_last_change_ms >= self.pause_detection.as_millis() as u64
            && quality.is_ok()
        {
            Some(self.approve(trimmed, Reason::PauseDetected, 0.7, now))
        } else {
            None
        };

        let decision = decision.unwrap_or_else(|| self.reject(Reason::WaitingForTrigger));

        if decision.should_translate {
            self.metrics.approvals += 1;
        } else {
            self.metrics.rejections += 1;
            *self.metrics.rejections_by_reason.entry(decision.reason).or_insert(0) += 1;
        }

        decision
    }

    fn approve(&mut self, full_text: &str, reason: Reason, confidence: f32, now: Instant) -> Decision {
        let new_text = self.get_new_text(full_text);
        // State mutates only on approval (spec.md §4.1, I5).
        self.last_translation_time = Some(now);
        self.last_translated_text = tail_chars(full_text, 500);
        Decision {
            should_translate: true,
            reason,
            confidence,
            new_text,
            is_complete: true,
        }
    }

    fn reject(&self, reason: Reason) -> Decision {
        Decision {
            should_translate: false,
            reason,
            confidence: 0.0,
            new_text: String::new(),
            is_complete: false,
        }
    }

    /// Compare `full_text` against `lastTranslatedText` to extract the
    /// unseen tail (spec.md §4.1 "New-text extraction").
    pub fn get_new_text(&self, full_text: &str) -> String {
        let last = self.last_translated_text.trim();
        let current = full_text.trim();

        let last_lc = last.to_lowercase();
        let current_lc = current.to_lowercase();

        if (last.is_empty() && current.is_empty()) || last_lc == current_lc {
            return String::new();
        }

        if last_lc.contains(&current_lc) && word_count(current) <= word_count(last) {
            return String::new();
        }

        if let Some(stripped) = strip_prefix_case_insensitive(current, last) {
            return stripped.trim_start().to_string();
        }

        if word_overlap(&current_lc, &last_lc) > self.config.pre_translation_overlap {
            return String::new();
        }

        current.to_string()
    }

    /// Record an emitted translation and evict entries past `dedupWindow`.
    pub fn record_translation(&mut self, text: &str) {
        let now = Instant::now();
        let window = Duration::from_millis(self.config.dedup_window_ms);
        self.recent_translations.retain(|r| now.duration_since(r.at) < window);
        self.recent_translations.push(RecentTranslation {
            text: text.to_string(),
            at: now,
        });
    }

    /// Is `text` a duplicate of any recent translation within the dedup
    /// window (spec.md §4.1 "Post-translation duplicate detection")?
    pub fn is_duplicate(&self, text: &str) -> bool {
        let now = Instant::now();
        let window = Duration::from_millis(self.config.dedup_window_ms);
        let text_lc = text.to_lowercase();

        self.recent_translations
            .iter()
            .filter(|r| now.duration_since(r.at) < window)
            .any(|r| {
                let other_lc = r.text.to_lowercase();
                if other_lc == text_lc {
                    return true;
                }
                let (shorter, longer) = if other_lc.len() <= text_lc.len() {
                    (&other_lc, &text_lc)
                } else {
                    (&text_lc, &other_lc)
                };
                if longer.contains(shorter.as_str()) {
                    let ratio = shorter.len() as f32 / longer.len() as f32;
                    if ratio >= self.config.post_translation_overlap {
                        return true;
                    }
                }
                word_overlap(&text_lc, &other_lc) >= self.config.post_translation_overlap
            })
    }
}

/// Raw input to `decide()` (spec.md §4.1 "Inputs").
pub struct UpdateInput {
    pub text: String,
    pub is_final: bool,
    pub time_since_last_change_ms: u64,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityResult {
    Empty,
    TooFewWords,
    FillerOnly,
    TooShort,
    Ok,
}

impl QualityResult {
    fn is_ok(self) -> bool {
        self == QualityResult::Ok
    }

    fn reason(self) -> Option<Reason> {
        match self {
            QualityResult::Empty => Some(Reason::EmptyText),
            QualityResult::TooFewWords => Some(Reason::TooFewWords),
            QualityResult::FillerOnly => Some(Reason::FillerWordsOnly),
            QualityResult::TooShort => Some(Reason::TooShort),
            QualityResult::Ok => None,
        }
    }
}

/// Ordered quality filter: empty → word count → filler-only → char count
/// (spec.md §4.1 "Quality check", I8 law).
fn quality_check(trimmed: &str, min_words: usize) -> QualityResult {
    if trimmed.is_empty() {
        return QualityResult::Empty;
    }
    if word_count(trimmed) < min_words {
        return QualityResult::TooFewWords;
    }
    if strip_fillers_and_punct(trimmed).is_empty() {
        return QualityResult::FillerOnly;
    }
    if trimmed.chars().count() < 10 {
        return QualityResult::TooShort;
    }
    QualityResult::Ok
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Remove the fixed filler set and trailing punctuation; used only to test
/// whether anything substantive remains (spec.md §4.1 step 3).
fn strip_fillers_and_punct(text: &str) -> String {
    let mut lower = text.to_lowercase();
    for phrase in FILLER_PHRASES {
        lower = lower.replace(phrase, " ");
    }
    let trimmed_punct = lower.trim_end_matches(|c: char| ".,!?;: ".contains(c));
    trimmed_punct
        .split_whitespace()
        .filter(|w| {
            let w = w.trim_matches(|c: char| ".,!?;:".contains(c));
            !FILLERS.contains(&w)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sentence-ending detection: ends with a sentence terminator but not an
/// ellipsis (spec.md §4.1 "Sentence-ending detection").
fn is_sentence_ending(trimmed: &str) -> bool {
    let Some(last) = trimmed.chars().last() else {
        return false;
    };
    if !SENTENCE_ENDERS.contains(&last) {
        return false;
    }
    // Ellipsis guard: two-or-more consecutive terminators at the end is not
    // a sentence ending.
    let tail: Vec<char> = trimmed.chars().rev().take(2).collect();
    !(tail.len() == 2 && SENTENCE_ENDERS.contains(&tail[1]))
}

/// Case-insensitive prefix strip that preserves the original casing of the
/// suffix (spec.md §4.1: "preserves original casing/punctuation in the tail").
fn strip_prefix_case_insensitive<'a>(current: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let current_lc = current.to_lowercase();
    let prefix_lc = prefix.to_lowercase();
    if current_lc.starts_with(&prefix_lc) {
        // `prefix_lc.len()` is a byte length computed from a lowercased
        // copy; lowercasing never changes UTF-8 byte-boundary validity for
        // the scripts this service targets (Latin + Romanian diacritics),
        // so slicing `current` at that offset is safe.
        Some(&current[prefix_lc.len()..])
    } else {
        None
    }
}

/// Multiset word-overlap ratio: intersection over the shorter bag's size,
/// counting repeats (spec.md §8 law: `overlap("the the the cat", "the cat") = 0.5`).
fn word_overlap(a: &str, b: &str) -> f32 {
    let bag_a = word_bag(a);
    let bag_b = word_bag(b);
    let total_a: usize = bag_a.values().sum();
    let total_b: usize = bag_b.values().sum();
    if total_a == 0 || total_b == 0 {
        return 0.0;
    }
    let mut shared = 0usize;
    for (word, count_a) in &bag_a {
        if let Some(count_b) = bag_b.get(word) {
            shared += (*count_a).min(*count_b);
        }
    }
    shared as f32 / total_a.min(total_b) as f32
}

fn word_bag(s: &str) -> HashMap<String, usize> {
    let mut bag = HashMap::new();
    for w in s.split_whitespace() {
        let w = w.trim_matches(|c: char| !c.is_alphanumeric());
        if !w.is_empty() {
            *bag.entry(w.to_string()).or_insert(0) += 1;
        }
    }
    bag
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

    fn engine() -> RulesEngine {
        RulesEngine::new(
            RulesEngineConfig::default(),
            Duration::from_millis(15_000),
            Duration::from_millis(4_000),
            6,
        )
    }

    fn input(text: &str, is_final: bool, trigger: Trigger) -> UpdateInput {
        UpdateInput {
            text: text.to_string(),
            is_final,
            time_since_last_change_ms: 0,
            trigger,
        }
    }

    #[test]
    fn single_word_final_is_blocked() {
        let mut e = engine();
        let d = e.decide(&input("pair", true, Trigger::Final));
        assert!(!d.should_translate);
        assert_eq!(d.reason, Reason::TooFewWords);
    }

    #[test]
    fn max_interval_forces_emission_on_continuous_speech() {
        let mut e = engine();
        // Force lastTranslationTime into the past.
        e.last_translation_time = Some(Instant::now() - Duration::from_millis(16_000));
        let d = e.decide(&input(
            "welcome to JW broadcasting in this program we will see",
            false,
            Trigger::Interim,
        ));
        assert!(d.should_translate);
        assert_eq!(d.reason, Reason::MaxInterval);
        assert!((d.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn sentence_ending_true_for_single_period() {
        assert!(is_sentence_ending("a."));
        assert!(!is_sentence_ending("a.."));
        assert!(!is_sentence_ending("a..."));
        assert!(is_sentence_ending("a.   ".trim()));
    }

    #[test]
    fn case_insensitive_subset_duplicate_yields_empty_new_text() {
        let mut e = engine();
        e.last_translated_text = "hrănește ceea ce suntem în interior".to_string();
        let new_text = e.get_new_text("Hrănește ceea ce suntem");
        assert_eq!(new_text, "");
    }

    #[test]
    fn overlap_uses_multiset_counts() {
        assert!((word_overlap("the the the cat", "the cat") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rejection_does_not_mutate_decision_state() {
        let mut e = engine();
        let before = e.last_translated_text.clone();
        // too_few_words final rejection.
        let _ = e.decide(&input("hi", true, Trigger::Final));
        assert_eq!(e.last_translated_text, before);
    }

    #[test]
    fn approval_updates_last_translated_text() {
        let mut e = engine();
        let d = e.decide(&input(
            "this sentence definitely ends cleanly.",
            false,
            Trigger::Interim,
        ));
        assert!(d.should_translate);
        assert_eq!(d.reason, Reason::SentenceEnding);
        assert!(!e.last_translated_text.is_empty());
    }

    #[test]
    fn quality_order_is_deterministic() {
        assert_eq!(quality_check("", 6), QualityResult::Empty);
        assert_eq!(quality_check("a b", 6), QualityResult::TooFewWords);
        assert_eq!(quality_check("uh um ah hmm eh er", 2), QualityResult::FillerOnly);
        assert_eq!(quality_check("short one.", 1), QualityResult::TooShort);
        assert_eq!(
            quality_check("this is long enough to pass every check.", 2),
            QualityResult::Ok
        );
    }

    #[test]
    fn low_quality_non_final_interim_reports_waiting_for_trigger() {
        let mut e = engine();
        let d = e.decide(&input("hi there", false, Trigger::Interim));
        assert!(!d.should_translate);
        assert_eq!(d.reason, Reason::WaitingForTrigger);
    }

    #[test]
    fn phrase_filler_you_know_is_stripped() {
        assert_eq!(quality_check("you know you know", 1), QualityResult::FillerOnly);
    }

    #[test]
    fn post_translation_duplicate_detection() {
        let mut e = engine();
        e.record_translation("the book of Obadiah is short");
        assert!(e.is_duplicate("The Book Of Obadiah Is Short"));
        assert!(!e.is_duplicate("completely unrelated text about something else"));
    }
}
