//! Session Coordinator (C4)
//!
//! Owns all per-session state: the rules engine, the pipeline, the
//! in-flight/pending-translation rule, and the three session timers. One
//! coordinator per connection, driven entirely from that connection's own
//! task — the message-passing model the design notes call for, so no
//! cross-session lock is ever needed here.

use std::time::{Duration, Instant};

use tracing::info;

use crate::mt_client::{MtClient, Translator};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::rules_engine::{RulesEngine, UpdateInput};
use crate::types::{ModeConfig, Reason, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Terminating,
}

/// A deferred final decision, overwritten by any later final while a
/// translation is in flight (spec.md §4.4 "In-flight concurrency rule").
#[derive(Debug, Clone)]
struct PendingFinal {
    full_text: String,
    new_text: String,
    reason: Reason,
    is_complete: bool,
}

/// What the caller should do in response to `on_update`.
#[derive(Debug, Clone)]
pub enum Action {
    /// Run the pipeline now; caller awaits it and then calls
    /// `pipeline_completed`.
    Run {
        full_text: String,
        new_text: String,
        reason: Reason,
        is_complete: bool,
    },
    /// Stored as the pending final; nothing to do until the in-flight call
    /// completes.
    Queued,
    /// A non-final update arrived while in flight; superseded, no action.
    Dropped,
    /// The rules engine rejected the update outright.
    Rejected(Reason),
}

pub struct TranscriptUpdateInput {
    pub text: String,
    pub is_final: bool,
    pub time_since_last_change_ms: u64,
    pub trigger: Trigger,
}

pub struct SessionCoordinator {
    pub state: SessionState,
    rules: RulesEngine,
    pipeline: Pipeline,
    translation_in_flight: bool,
    pending_final: Option<PendingFinal>,
    last_interim_text: String,
    pause_deadline: Option<Instant>,
    inactivity_deadline: Instant,
    mode_config: ModeConfig,
    inactivity_timeout: Duration,
}

impl SessionCoordinator {
    pub fn new(rules: RulesEngine, pipeline: Pipeline, mode_config: ModeConfig, inactivity_timeout: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            rules,
            pipeline,
            translation_in_flight: false,
            pending_final: None,
            last_interim_text: String::new(),
            pause_deadline: None,
            inactivity_deadline: Instant::now() + inactivity_timeout,
            mode_config,
            inactivity_timeout,
        }
    }

    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RulesEngine {
        &mut self.rules
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Transition to Active. Idempotent: a duplicate `start-session` while
    /// already Active tears down the prior stream state first (spec.md
    /// §4.4 "State machine").
    pub fn start(&mut self) {
        if self.state == SessionState::Active {
            self.reset_transient_state();
        }
        self.state = SessionState::Active;
        self.touch_activity();
    }

    /// Tear down to Idle: cancel timers, discard any pending translation
    /// (spec.md §5 "Cancellation").
    pub fn stop(&mut self) {
        self.state = SessionState::Idle;
        self.reset_transient_state();
    }

    fn reset_transient_state(&mut self) {
        self.pending_final = None;
        self.pause_deadline = None;
        self.last_interim_text.clear();
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn touch_activity(&mut self) {
        self.inactivity_deadline = Instant::now() + self.inactivity_timeout;
    }

    pub fn inactivity_expired(&self) -> bool {
        Instant::now() >= self.inactivity_deadline
    }

    pub fn inactivity_deadline(&self) -> Instant {
        self.inactivity_deadline
    }

    pub fn pause_deadline(&self) -> Option<Instant> {
        self.pause_deadline
    }

    pub fn pause_expired(&self) -> bool {
        self.pause_deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Process one transcript update and decide what the caller should do.
    pub fn on_update(&mut self, update: &TranscriptUpdateInput) -> Action {
        self.touch_activity();

        let decision = self.rules.decide(&UpdateInput {
            text: update.text.clone(),
            is_final: update.is_final,
            time_since_last_change_ms: update.time_since_last_change_ms,
            trigger: update.trigger,
        });

        if !decision.should_translate {
            if update.trigger == Trigger::Interim && update.text != self.last_interim_text {
                // Every text change cancels and re-arms the pause timer,
                // whether or not one was already pending.
                self.last_interim_text = update.text.clone();
                self.pause_deadline = Some(Instant::now() + Duration::from_millis(self.mode_config.pause_detection_ms));
            }
            return Action::Rejected(decision.reason);
        }

        self.pause_deadline = None;

        if self.translation_in_flight {
            if update.is_final {
                self.pending_final = Some(PendingFinal {
                    full_text: update.text.clone(),
                    new_text: decision.new_text,
                    reason: decision.reason,
                    is_complete: decision.is_complete,
                });
                return Action::Queued;
            }
            return Action::Dropped;
        }

        self.translation_in_flight = true;
        Action::Run {
            full_text: update.text.clone(),
            new_text: decision.new_text,
            reason: decision.reason,
            is_complete: decision.is_complete,
        }
    }

    /// Re-run the decision against the latest interim text when the pause
    /// timer fires (spec.md §4.4 "Pause timer").
    pub fn on_pause_fired(&mut self) -> Action {
        self.pause_deadline = None;
        if self.last_interim_text.is_empty() {
            return Action::Rejected(Reason::WaitingForTrigger);
        }
        let update = TranscriptUpdateInput {
            text: self.last_interim_text.clone(),
            is_final: false,
            time_since_last_change_ms: self.mode_config.pause_detection_ms,
            trigger: Trigger::Pause,
        };
        self.on_update(&update)
    }

    /// Called after the caller awaits a `Run` action's pipeline execution.
    /// Returns the next action if a pending final was queued meanwhile.
    pub fn pipeline_completed(&mut self) -> Option<Action> {
        self.translation_in_flight = false;
        if self.state != SessionState::Active {
            self.pending_final = None;
            return None;
        }
        let pending = self.pending_final.take()?;
        self.translation_in_flight = true;
        Some(Action::Run {
            full_text: pending.full_text,
            new_text: pending.new_text,
            reason: pending.reason,
            is_complete: pending.is_complete,
        })
    }

    /// Whether a completed in-flight MT call should still be emitted —
    /// checked by the caller right before emission (spec.md §5
    /// "Cancellation": in-flight calls complete but skip emission once the
    /// session is no longer active).
    pub fn should_emit(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn log_config_once(&self, dedup_window_ms: u64, pre_overlap: f32, post_overlap: f32) {
        info!(dedup_window_ms, pre_overlap, post_overlap, "rules engine thresholds");
    }

    /// Run the pipeline for a `Run` action. Split out as a method (rather
    /// than exposing `pipeline_mut()`/`rules_mut()` to the caller at once)
    /// because `Pipeline::run` needs simultaneous mutable access to both
    /// fields.
    pub async fn run_pipeline<T: Translator>(
        &mut self,
        mt: &MtClient<T>,
        full_text: &str,
        new_text: &str,
        source_lang: &str,
        target_lang: &str,
        reason: Reason,
        is_complete: bool,
    ) -> PipelineOutcome {
        self.pipeline
            .run(mt, &mut self.rules, full_text, new_text, source_lang, target_lang, reason, is_complete)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesEngineConfig;
    use std::time::Duration;

    fn coordinator() -> SessionCoordinator {
        let rules = RulesEngine::new(
            RulesEngineConfig::default(),
            Duration::from_millis(15_000),
            Duration::from_millis(4_000),
            6,
        );
        let pipeline = Pipeline::new(0.60, vec![], vec![]);
        let mode_config = ModeConfig::default_for(crate::types::Mode::Talks);
        let mut coordinator = SessionCoordinator::new(rules, pipeline, mode_config, Duration::from_secs(1800));
        coordinator.start();
        coordinator
    }

    fn update(text: &str, is_final: bool, trigger: Trigger) -> TranscriptUpdateInput {
        TranscriptUpdateInput {
            text: text.to_string(),
            is_final,
            time_since_last_change_ms: 0,
            trigger,
        }
    }

    #[test]
    fn pending_final_overwrites_earlier_final_while_in_flight() {
        let mut coordinator = coordinator();

        let first = coordinator.on_update(&update("this sentence surely qualifies for translation.", true, Trigger::Final));
        assert!(matches!(first, Action::Run { .. }));

        let second = coordinator.on_update(&update("this sentence surely qualifies for translation and more.", true, Trigger::Final));
        assert!(matches!(second, Action::Queued));

        // A non-final arriving while in flight is dropped outright.
        let third = coordinator.on_update(&update("short interim", false, Trigger::Interim));
        assert!(matches!(third, Action::Dropped) || matches!(third, Action::Rejected(_)));

        let next = coordinator.pipeline_completed();
        match next {
            Some(Action::Run { full_text, .. }) => {
                assert_eq!(full_text, "this sentence surely qualifies for translation and more.");
            }
            other => panic!("expected the queued final to run next, got {other:?}"),
        }

        // Nothing else was pending.
        assert!(coordinator.pipeline_completed().is_none());
    }

    #[test]
    fn start_is_idempotent_and_tears_down_prior_state() {
        let mut coordinator = coordinator();
        coordinator.pending_final = Some(PendingFinal {
            full_text: "x".into(),
            new_text: "x".into(),
            reason: Reason::FinalResult,
            is_complete: true,
        });
        coordinator.start();
        assert!(coordinator.pending_final.is_none());
        assert_eq!(coordinator.state, SessionState::Active);
    }

    #[test]
    fn stop_cancels_timers_and_pending_state() {
        let mut coordinator = coordinator();
        coordinator.pause_deadline = Some(Instant::now() + Duration::from_secs(5));
        coordinator.stop();
        assert_eq!(coordinator.state, SessionState::Idle);
        assert!(coordinator.pause_deadline().is_none());
    }

    #[test]
    fn completed_pipeline_after_stop_discards_pending_and_emits_nothing() {
        let mut coordinator = coordinator();
        let _ = coordinator.on_update(&update("this sentence surely qualifies for translation.", true, Trigger::Final));
        let _ = coordinator.on_update(&update("another final arrives here now.", true, Trigger::Final));
        coordinator.stop();
        assert!(coordinator.pipeline_completed().is_none());
    }
}
