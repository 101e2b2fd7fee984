//! WebSocket transport adapter (spec.md §6 "Transport events")
//!
//! One task per connection owns a `SessionCoordinator`, a `RulesEngine`
//! (inside the coordinator), a `Pipeline`, and an `MtClient`. Mirrors the
//! teacher's realtime voice handler: a dedicated outbound-sender task reads
//! from an `mpsc` channel while the main loop owns the receive side, so a
//! slow client never blocks session-internal bookkeeping.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use super::ServerState;
use crate::adapters::{DebugLogRow, DebugLogSink, UsageSink};
use crate::coordinator::{Action, SessionCoordinator, TranscriptUpdateInput};
use crate::mt_client::{MtClient, Translator};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::rules_engine::RulesEngine;
use crate::types::{Mode, ModeConfig, Reason, Trigger};

static SOURCE_LANG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2}-[A-Z]{2}$").unwrap());
static TARGET_LANG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2}(-[A-Z]{2})?$").unwrap());

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "start-session")]
    StartSession {
        #[serde(rename = "sourceLanguage")]
        source_language: String,
        #[serde(rename = "targetLang")]
        target_lang: String,
        mode: String,
    },
    #[serde(rename = "transcript-result")]
    TranscriptResult { text: String, #[serde(rename = "isFinal")] is_final: bool },
    #[serde(rename = "stop-session")]
    StopSession,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "session-started")]
    SessionStarted {
        #[serde(rename = "sourceLanguage")]
        source_language: String,
        #[serde(rename = "targetLanguage")]
        target_language: String,
    },
    #[serde(rename = "interim-result")]
    InterimResult { text: String, #[serde(rename = "isFinal")] is_final: bool },
    #[serde(rename = "translation-result")]
    TranslationResult {
        original: String,
        translated: String,
        accumulated: String,
        count: u64,
        #[serde(rename = "isInterim")]
        is_interim: bool,
        reason: Reason,
    },
    #[serde(rename = "translation-error")]
    TranslationError { message: String },
    #[serde(rename = "session-timeout")]
    SessionTimeout { message: String, #[serde(rename = "inactiveMinutes")] inactive_minutes: u64 },
    #[serde(rename = "session-stopped")]
    SessionStopped {
        #[serde(rename = "translationCount")]
        translation_count: u64,
        #[serde(rename = "accumulatedText")]
        accumulated_text: String,
    },
    #[serde(rename = "connection-error")]
    ConnectionError { message: String, code: &'static str },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: ServerState, addr: SocketAddr) {
    let guard = match state.connections.register(addr.ip()).await {
        Ok(guard) => guard,
        Err(err) => {
            let (mut sender, _receiver) = socket.split();
            let _ = send(&mut sender, &ServerMessage::ConnectionError {
                message: err.to_string(),
                code: "admission_denied",
            })
            .await;
            return;
        }
    };

    let (ws_sender, ws_receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let sender_task = tokio::spawn(outbound_pump(ws_sender, outbound_rx));

    run_session(ws_receiver, outbound_tx, state, addr).await;

    drop(guard);
    let _ = sender_task.await;
}

async fn outbound_pump(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(message) = rx.recv().await {
        if send(&mut sender, &message).await.is_err() {
            break;
        }
    }
}

async fn send(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}

/// Translator implementation used when the session has no concrete MT
/// backend wired in (e.g. the `gcp` feature is disabled). Always fails
/// retryably so the caller sees the same error semantics as a genuine
/// outage, rather than silently fabricating a translation.
struct UnavailableTranslator;

#[async_trait::async_trait]
impl Translator for UnavailableTranslator {
    async fn translate_raw(
        &self,
        _request: &crate::mt_client::TranslateRequest,
    ) -> Result<crate::mt_client::TranslateResponse, crate::mt_client::MtError> {
        Err(crate::mt_client::MtError::fatal("no MT backend configured for this build"))
    }
}

async fn run_session(
    mut ws_receiver: futures_util::stream::SplitStream<WebSocket>,
    outbound_tx: mpsc::UnboundedSender<ServerMessage>,
    state: ServerState,
    addr: SocketAddr,
) {
    let mt_client: MtClient<UnavailableTranslator> = MtClient::new(
        UnavailableTranslator,
        state.config.mt.clone(),
        format!(
            "projects/{}/locations/{}",
            state.config.mt.google_cloud_project.clone().unwrap_or_default(),
            state.config.mt.google_cloud_location.clone().unwrap_or_default(),
        ),
    );

    let mut coordinator: Option<SessionCoordinator> = None;
    let mut source_language = String::new();
    let mut target_language = String::new();
    let mut session_id = String::new();
    let client_id = addr.to_string();

    loop {
        let pause_sleep = coordinator
            .as_ref()
            .and_then(|c| c.pause_deadline())
            .map(|d| tokio::time::sleep_until(tokio::time::Instant::from_std(d)))
            .unwrap_or_else(|| tokio::time::sleep_until(tokio::time::Instant::now() + Duration::from_secs(3600)));
        let inactivity_sleep = coordinator
            .as_ref()
            .map(|c| tokio::time::sleep_until(tokio::time::Instant::from_std(c.inactivity_deadline())))
            .unwrap_or_else(|| tokio::time::sleep_until(tokio::time::Instant::now() + Duration::from_secs(3600)));

        tokio::select! {
            incoming = ws_receiver.next() => {
                let Some(Ok(message)) = incoming else { break; };
                let Message::Text(text) = message else { continue; };
                let Ok(client_message) = serde_json::from_str::<ClientMessage>(&text) else { continue; };

                match client_message {
                    ClientMessage::StartSession { source_language: src, target_lang: tgt, mode } => {
                        if !SOURCE_LANG_RE.is_match(&src) {
                            let _ = outbound_tx.send(ServerMessage::ConnectionError {
                                message: format!("invalid source language tag: {src}"),
                                code: "invalid_source_language",
                            });
                            continue;
                        }
                        if !TARGET_LANG_RE.is_match(&tgt) {
                            let _ = outbound_tx.send(ServerMessage::ConnectionError {
                                message: format!("invalid target language tag: {tgt}"),
                                code: "invalid_target_language",
                            });
                            continue;
                        }
                        let Some(parsed_mode) = Mode::parse(&mode) else {
                            let _ = outbound_tx.send(ServerMessage::ConnectionError {
                                message: format!("invalid mode: {mode}"),
                                code: "invalid_mode",
                            });
                            continue;
                        };

                        let mode_config = ModeConfig::default_for(parsed_mode);
                        let rules = RulesEngine::new(
                            state.config.rules,
                            Duration::from_millis(mode_config.translation_interval_ms),
                            Duration::from_millis(mode_config.pause_detection_ms),
                            mode_config.min_words,
                        );
                        let pipeline = Pipeline::new(state.config.rules.lcp_threshold, vec![], vec![]);
                        let mut new_coordinator = SessionCoordinator::new(
                            rules,
                            pipeline,
                            mode_config,
                            Duration::from_millis(state.config.server.inactivity_timeout_ms),
                        );
                        new_coordinator.start();
                        new_coordinator.log_config_once(
                            state.config.rules.dedup_window_ms,
                            state.config.rules.pre_translation_overlap,
                            state.config.rules.post_translation_overlap,
                        );
                        coordinator = Some(new_coordinator);
                        source_language = src.clone();
                        target_language = tgt.clone();
                        session_id = uuid::Uuid::new_v4().to_string();

                        info!(%addr, source = %src, target = %tgt, "session started");
                        let _ = outbound_tx.send(ServerMessage::SessionStarted {
                            source_language: src,
                            target_language: tgt,
                        });
                    }
                    ClientMessage::TranscriptResult { text, is_final } => {
                        let Some(coord) = coordinator.as_mut() else { continue; };
                        let _ = outbound_tx.send(ServerMessage::InterimResult { text: text.clone(), is_final });
                        state.usage.record_chars(text.chars().count() as u64).await;

                        let trigger = if is_final { Trigger::Final } else { Trigger::Interim };
                        let action = coord.on_update(&TranscriptUpdateInput {
                            text,
                            is_final,
                            time_since_last_change_ms: 0,
                            trigger,
                        });
                        drive_action(
                            coord,
                            &mt_client,
                            &source_language,
                            &target_language,
                            action,
                            &outbound_tx,
                            state.debug_log.as_ref(),
                            &session_id,
                            &client_id,
                        )
                        .await;
                    }
                    ClientMessage::StopSession => {
                        if let Some(coord) = coordinator.as_mut() {
                            let count = coord.pipeline().count();
                            let accumulated = coord.pipeline().committed_translation().to_string();
                            coord.stop();
                            let _ = outbound_tx.send(ServerMessage::SessionStopped {
                                translation_count: count,
                                accumulated_text: accumulated,
                            });
                        }
                        break;
                    }
                }
            }
            _ = pause_sleep, if coordinator.as_ref().map(|c| c.pause_deadline().is_some()).unwrap_or(false) => {
                if let Some(coord) = coordinator.as_mut() {
                    let action = coord.on_pause_fired();
                    drive_action(
                        coord,
                        &mt_client,
                        &source_language,
                        &target_language,
                        action,
                        &outbound_tx,
                        state.debug_log.as_ref(),
                        &session_id,
                        &client_id,
                    )
                    .await;
                }
            }
            _ = inactivity_sleep, if coordinator.as_ref().map(|c| c.is_active()).unwrap_or(false) => {
                if let Some(coord) = coordinator.as_mut() {
                    if coord.inactivity_expired() {
                        let minutes = state.config.server.inactivity_timeout_ms / 60_000;
                        let _ = outbound_tx.send(ServerMessage::SessionTimeout {
                            message: "session timed out due to inactivity".to_string(),
                            inactive_minutes: minutes,
                        });
                        coord.stop();
                        break;
                    }
                }
            }
        }

        if coordinator.as_ref().map(|c| !c.is_active()).unwrap_or(false) {
            break;
        }
    }
}

/// Run a `Run` action to completion, then drain any pending final queued
/// while it was in flight (spec.md §4.4 "In-flight concurrency rule").
#[allow(clippy::too_many_arguments)]
async fn drive_action<T: Translator>(
    coordinator: &mut SessionCoordinator,
    mt_client: &MtClient<T>,
    source_language: &str,
    target_language: &str,
    mut action: Action,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    debug_log: &dyn DebugLogSink,
    session_id: &str,
    client_id: &str,
) {
    loop {
        let Action::Run { full_text, new_text, reason, is_complete } = action else {
            break;
        };

        let outcome = coordinator
            .run_pipeline(mt_client, &full_text, &new_text, source_language, target_language, reason, is_complete)
            .await;

        if coordinator.should_emit() {
            match outcome {
                PipelineOutcome::Emitted(event) => {
                    debug_log
                        .append(DebugLogRow {
                            session_id: session_id.to_string(),
                            client_id: client_id.to_string(),
                            source_text: event.original.clone(),
                            translated_text: event.translated.clone(),
                            source_language: source_language.to_string(),
                            target_language: target_language.to_string(),
                            reason: format!("{:?}", event.reason),
                            created_at: chrono::Utc::now(),
                        })
                        .await;
                    let _ = outbound_tx.send(ServerMessage::TranslationResult {
                        original: event.original,
                        translated: event.translated,
                        accumulated: event.accumulated,
                        count: event.count,
                        is_interim: event.is_interim,
                        reason: event.reason,
                    });
                }
                PipelineOutcome::Error(message) => {
                    let _ = outbound_tx.send(ServerMessage::TranslationError { message });
                }
                PipelineOutcome::Deduplicated => {}
            }
        }

        match coordinator.pipeline_completed() {
            Some(next) => action = next,
            None => break,
        }
    }
}
