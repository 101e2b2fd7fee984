//! ASR Session Controller (C3) — optional path
//!
//! Used when the server ingests raw audio; skipped entirely when the client
//! performs browser-side ASR and sends `transcript-result` events directly.
//! Mirrors the teacher's `voice::coordinator` ownership pattern: one owned
//! stream handle per session, events flowing out through a channel rather
//! than callbacks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::AsrConfig;
use crate::errors::RelayError;

/// A transcript event decoded from the ASR provider.
#[derive(Debug, Clone)]
pub struct AsrEvent {
    pub text: String,
    pub is_final: bool,
}

/// Classification of an ASR stream failure (spec.md §4.3 "Fault recovery").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrFault {
    /// "no audio for ~10s" — not a fault, restart without counting it.
    SilenceTimeout,
    /// `OUT_OF_RANGE`, `DEADLINE_EXCEEDED`, "maximum allowed stream duration".
    DurationTimeout,
    /// Surfaced to the client as-is.
    Other,
}

impl AsrFault {
    /// Classify a raw provider error/status message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("no audio") || lower.contains("silence") {
            AsrFault::SilenceTimeout
        } else if lower.contains("out_of_range")
            || lower.contains("deadline_exceeded")
            || lower.contains("maximum allowed stream duration")
        {
            AsrFault::DurationTimeout
        } else {
            AsrFault::Other
        }
    }
}

#[derive(Debug, Clone)]
pub struct AsrStreamConfig {
    pub source_language: String,
    pub sample_rate_hz: u32,
    /// Domain phrase hints with a moderate boost; the full list is domain
    /// data loaded separately, not part of this struct.
    pub phrase_hints: Vec<String>,
}

/// Abstraction over the provider's streaming recognize call, mockable in
/// tests without a live network connection.
#[async_trait]
pub trait SpeechStream: Send {
    async fn open(cfg: &AsrStreamConfig) -> anyhow::Result<Self>
    where
        Self: Sized;
    async fn write_audio(&mut self, chunk: &[u8]) -> anyhow::Result<()>;
    /// `None` signals the stream ended (either cleanly or with an error
    /// already logged by the implementation).
    async fn next_result(&mut self) -> Option<anyhow::Result<AsrEvent>>;
    async fn close(self) -> anyhow::Result<()>;
}

/// Detected wire format of inbound audio chunks, cached after the first
/// chunk (spec.md §4.3 "Write-path safety").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    ByteBuffer,
    RawBytes,
    TypedArray,
}

fn detect_wire_format(chunk: &[u8]) -> WireFormat {
    // Heuristic matching the teacher's approach of sniffing the first frame
    // once and caching the fast path: a leading RIFF/WAV-like header marks
    // a byte-buffer wrapper; otherwise treat as raw PCM bytes.
    if chunk.len() >= 4 && &chunk[0..4] == b"RIFF" {
        WireFormat::ByteBuffer
    } else if chunk.len() >= 2 && chunk.len() % 2 == 0 {
        WireFormat::TypedArray
    } else {
        WireFormat::RawBytes
    }
}

/// Per-session controller owning exactly one writable stream handle.
pub struct AsrController<S: SpeechStream> {
    config: AsrConfig,
    stream: Option<S>,
    stream_cfg: AsrStreamConfig,
    opened_at: Instant,
    restart_attempts: u32,
    restart_in_flight: bool,
    buffered_audio: Vec<Vec<u8>>,
    wire_format: Option<WireFormat>,
    bytes_written_this_second: usize,
    rate_window_started: Instant,
}

impl<S: SpeechStream> AsrController<S> {
    pub async fn open(config: AsrConfig, stream_cfg: AsrStreamConfig) -> anyhow::Result<Self> {
        let stream = S::open(&stream_cfg).await?;
        Ok(Self {
            config,
            stream: Some(stream),
            stream_cfg,
            opened_at: Instant::now(),
            restart_attempts: 0,
            restart_in_flight: false,
            buffered_audio: Vec::new(),
            wire_format: None,
            bytes_written_this_second: 0,
            rate_window_started: Instant::now(),
        })
    }

    /// Whether a proactive restart is due (spec.md §4.3 "Proactive restart":
    /// 290s after open, ahead of the provider's ~305s hard limit).
    pub fn restart_due(&self) -> bool {
        self.opened_at.elapsed() >= Duration::from_millis(self.config.restart_after_ms)
    }

    /// Validate and forward one audio chunk, buffering it if a restart is
    /// currently in flight (spec.md §4.3 "Write-path safety", "Proactive restart").
    pub async fn write_audio(&mut self, chunk: &[u8]) -> Result<(), RelayError> {
        if chunk.len() > self.config.max_chunk_bytes {
            return Err(RelayError::ChunkTooLarge {
                got: chunk.len(),
                max: self.config.max_chunk_bytes,
            });
        }

        let now = Instant::now();
        if now.duration_since(self.rate_window_started) >= Duration::from_secs(1) {
            self.rate_window_started = now;
            self.bytes_written_this_second = 0;
        }
        self.bytes_written_this_second += chunk.len();
        if self.bytes_written_this_second > self.config.max_bytes_per_sec {
            return Err(RelayError::RateLimited);
        }

        if self.wire_format.is_none() {
            self.wire_format = Some(detect_wire_format(chunk));
        }

        if self.restart_in_flight {
            if self.buffered_audio.len() >= self.config.max_buffered_chunks {
                warn!("ASR restart buffer full, dropping newest audio chunk");
            } else {
                self.buffered_audio.push(chunk.to_vec());
            }
            return Ok(());
        }

        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.write_audio(chunk).await;
        }
        Ok(())
    }

    /// Drain the next decoded transcript event, applying fault
    /// classification and proactive restart scheduling transparently.
    pub async fn next_event(&mut self) -> Option<AsrControllerEvent> {
        let stream = self.stream.as_mut()?;
        match stream.next_result().await {
            Some(Ok(event)) => Some(AsrControllerEvent::Transcript(event)),
            Some(Err(err)) => {
                let fault = AsrFault::classify(&err.to_string());
                Some(AsrControllerEvent::Fault(fault, err.to_string()))
            }
            None => Some(AsrControllerEvent::StreamEnded),
        }
    }

    /// Restart the stream, preserving session identity. Callers are
    /// expected to preserve `accumulatedText`/`lastTranslatedText`
    /// themselves and reset `committedTranslation` (spec.md I6) — this
    /// method only owns the stream lifecycle.
    pub async fn restart(&mut self, silence: bool) -> anyhow::Result<()> {
        // Double-guarded: the underlying stream may emit both `end` and
        // `close`, so a single in-flight flag collapses concurrent triggers.
        if self.restart_in_flight {
            return Ok(());
        }
        self.restart_in_flight = true;

        if !silence {
            self.restart_attempts += 1;
            if self.restart_attempts > self.config.max_restart_attempts {
                self.restart_in_flight = false;
                return Err(RelayError::AsrRestartsExceeded.into());
            }
        }

        if let Some(old) = self.stream.take() {
            let _ = old.close().await;
        }

        let new_stream = S::open(&self.stream_cfg).await?;
        self.stream = Some(new_stream);
        self.opened_at = Instant::now();

        for chunk in self.buffered_audio.drain(..) {
            if let Some(stream) = self.stream.as_mut() {
                let _ = stream.write_audio(&chunk).await;
            }
        }

        self.restart_in_flight = false;
        debug!(attempts = self.restart_attempts, "ASR stream restarted");
        Ok(())
    }
}

pub enum AsrControllerEvent {
    Transcript(AsrEvent),
    Fault(AsrFault, String),
    StreamEnded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockStream {
        opens: Arc<AtomicUsize>,
        writes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SpeechStream for MockStream {
        async fn open(_cfg: &AsrStreamConfig) -> anyhow::Result<Self> {
            Ok(Self {
                opens: Arc::new(AtomicUsize::new(1)),
                writes: Arc::new(AtomicUsize::new(0)),
            })
        }

        async fn write_audio(&mut self, _chunk: &[u8]) -> anyhow::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn next_result(&mut self) -> Option<anyhow::Result<AsrEvent>> {
            None
        }

        async fn close(self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn stream_cfg() -> AsrStreamConfig {
        AsrStreamConfig {
            source_language: "ro-RO".to_string(),
            sample_rate_hz: 16_000,
            phrase_hints: vec![],
        }
    }

    #[tokio::test]
    async fn chunk_over_limit_is_rejected() {
        let config = AsrConfig {
            restart_after_ms: 290_000,
            max_restart_attempts: 10,
            max_buffered_chunks: 50,
            max_chunk_bytes: 4,
            max_bytes_per_sec: 1024,
        };
        let mut controller = AsrController::<MockStream>::open(config, stream_cfg()).await.unwrap();
        let err = controller.write_audio(&[0u8; 10]).await.unwrap_err();
        assert!(matches!(err, RelayError::ChunkTooLarge { .. }));
    }

    #[tokio::test]
    async fn restart_is_idempotent_while_in_flight() {
        let config = AsrConfig {
            restart_after_ms: 0,
            max_restart_attempts: 10,
            max_buffered_chunks: 50,
            max_chunk_bytes: 1024,
            max_bytes_per_sec: 1024 * 1024,
        };
        let mut controller = AsrController::<MockStream>::open(config, stream_cfg()).await.unwrap();
        controller.restart_in_flight = true;
        // A second trigger while already in flight is a no-op, not an error.
        controller.restart(false).await.unwrap();
        assert_eq!(controller.restart_attempts, 0);
    }

    #[tokio::test]
    async fn silence_timeout_does_not_count_toward_restart_budget() {
        let config = AsrConfig {
            restart_after_ms: 0,
            max_restart_attempts: 1,
            max_buffered_chunks: 50,
            max_chunk_bytes: 1024,
            max_bytes_per_sec: 1024 * 1024,
        };
        let mut controller = AsrController::<MockStream>::open(config, stream_cfg()).await.unwrap();
        controller.restart(true).await.unwrap();
        controller.restart(true).await.unwrap();
        controller.restart(true).await.unwrap();
        assert_eq!(controller.restart_attempts, 0);
    }

    #[test]
    fn fault_classification_matches_spec_taxonomy() {
        assert_eq!(AsrFault::classify("no audio for 10s"), AsrFault::SilenceTimeout);
        assert_eq!(AsrFault::classify("OUT_OF_RANGE"), AsrFault::DurationTimeout);
        assert_eq!(AsrFault::classify("maximum allowed stream duration exceeded"), AsrFault::DurationTimeout);
        assert_eq!(AsrFault::classify("permission denied"), AsrFault::Other);
    }
}
