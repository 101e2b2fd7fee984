//! Configuration management
//!
//! Loads the relay's runtime configuration from an optional TOML file
//! (`RELAY_CONFIG`, falling back to the platform config directory) and
//! layers the environment variables named in spec.md §6 on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{Mode, ModeConfig};

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rules: RulesEngineConfig,
    #[serde(default)]
    pub asr: AsrConfig,
    #[serde(default)]
    pub mt: MtConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
}

fn default_port() -> u16 {
    8080
}
fn default_max_connections() -> usize {
    50
}
fn default_max_connections_per_ip() -> usize {
    5
}
fn default_inactivity_timeout_ms() -> u64 {
    30 * 60 * 1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_connections: default_max_connections(),
            max_connections_per_ip: default_max_connections_per_ip(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
        }
    }
}

/// Tunables for the rules engine's duplicate-suppression layer
/// (spec.md §9 Open Question: "should be configurable and logged at session start").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RulesEngineConfig {
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_overlap")]
    pub pre_translation_overlap: f32,
    #[serde(default = "default_overlap")]
    pub post_translation_overlap: f32,
    #[serde(default = "default_lcp_threshold")]
    pub lcp_threshold: f32,
}

fn default_dedup_window_ms() -> u64 {
    20_000
}
fn default_overlap() -> f32 {
    0.65
}
fn default_lcp_threshold() -> f32 {
    0.60
}

impl Default for RulesEngineConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            pre_translation_overlap: default_overlap(),
            post_translation_overlap: default_overlap(),
            lcp_threshold: default_lcp_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    #[serde(default = "default_restart_after_ms")]
    pub restart_after_ms: u64,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_max_buffered_chunks")]
    pub max_buffered_chunks: usize,
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    #[serde(default = "default_max_bytes_per_sec")]
    pub max_bytes_per_sec: usize,
}

fn default_restart_after_ms() -> u64 {
    290_000
}
fn default_max_restart_attempts() -> u32 {
    10
}
fn default_max_buffered_chunks() -> usize {
    50
}
fn default_max_chunk_bytes() -> usize {
    1024 * 1024
}
fn default_max_bytes_per_sec() -> usize {
    2 * 1024 * 1024
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            restart_after_ms: default_restart_after_ms(),
            max_restart_attempts: default_max_restart_attempts(),
            max_buffered_chunks: default_max_buffered_chunks(),
            max_chunk_bytes: default_max_chunk_bytes(),
            max_bytes_per_sec: default_max_bytes_per_sec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtConfig {
    #[serde(default)]
    pub glossary_enabled: bool,
    #[serde(default = "default_translation_model")]
    pub translation_model: String,
    #[serde(default)]
    pub google_cloud_project: Option<String>,
    #[serde(default)]
    pub google_cloud_location: Option<String>,
    #[serde(default = "default_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_translation_model() -> String {
    "nmt".to_string()
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_ms() -> u64 {
    5_000
}

impl Default for MtConfig {
    fn default() -> Self {
        Self {
            glossary_enabled: false,
            translation_model: default_translation_model(),
            google_cloud_project: None,
            google_cloud_location: None,
            max_retry_attempts: default_retry_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rules: RulesEngineConfig::default(),
            asr: AsrConfig::default(),
            mt: MtConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load from `RELAY_CONFIG` (or the platform config dir), then apply
    /// environment variable overrides per spec.md §6.
    pub fn load() -> Result<Self> {
        let mut config = if let Some(path) = std::env::var_os("RELAY_CONFIG") {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file at {:?}", path))?;
            toml::from_str(&contents).context("failed to parse config file")?
        } else {
            let path = config_path()?;
            if path.exists() {
                let contents = std::fs::read_to_string(&path)
                    .context("failed to read default config file")?;
                toml::from_str(&contents).context("failed to parse default config file")?
            } else {
                RelayConfig::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.server.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_CONNECTIONS_PER_IP") {
            if let Ok(n) = v.parse() {
                self.server.max_connections_per_ip = n;
            }
        }
        if let Ok(v) = std::env::var("INACTIVITY_TIMEOUT") {
            if let Ok(ms) = v.parse() {
                self.server.inactivity_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("GLOSSARY_ENABLED") {
            self.mt.glossary_enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("TRANSLATION_MODEL") {
            self.mt.translation_model = v;
        }
        if let Ok(v) = std::env::var("GOOGLE_CLOUD_PROJECT") {
            self.mt.google_cloud_project = Some(v);
        }
        if let Ok(v) = std::env::var("GOOGLE_CLOUD_LOCATION") {
            self.mt.google_cloud_location = Some(v);
        }
    }

    /// Resolve the tunables for a named mode (spec.md §3 table).
    pub fn mode_config(&self, mode: Mode) -> ModeConfig {
        ModeConfig::default_for(mode)
    }

    /// Validate that MT credentials are reachable via one of the three
    /// documented channels; fail fast at startup otherwise (spec.md §6).
    pub fn validate_mt_credentials(&self) -> Result<()> {
        let has_env_json = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS_JSON").is_some();
        let has_file_path = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").is_some();
        let has_default_path = default_credentials_path().exists();

        if !(has_env_json || has_file_path || has_default_path) {
            anyhow::bail!(
                "no MT credentials found via GOOGLE_APPLICATION_CREDENTIALS_JSON, \
                 GOOGLE_APPLICATION_CREDENTIALS, or the default credentials path"
            );
        }
        Ok(())
    }
}

fn default_credentials_path() -> PathBuf {
    dirs_config_dir().join("application_default_credentials.json")
}

fn dirs_config_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "lingua-relay", "lingua-relay")
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path used when `RELAY_CONFIG` is unset.
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "lingua-relay", "lingua-relay")
        .context("failed to resolve project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_bounds() {
        let config = RelayConfig::default();
        assert_eq!(config.server.max_connections, 50);
        assert_eq!(config.server.max_connections_per_ip, 5);
        assert_eq!(config.server.inactivity_timeout_ms, 30 * 60 * 1000);
        assert_eq!(config.rules.dedup_window_ms, 20_000);
        assert!(
            config.rules.dedup_window_ms
                > ModeConfig::default_for(Mode::Talks).translation_interval_ms
        );
        assert_eq!(config.mt.max_retry_attempts, 3);
    }
}
