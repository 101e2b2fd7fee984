//! lingua-relay — real-time speech-translation relay
//!
//! Mediates between a browser client, a cloud ASR provider, and a cloud MT
//! provider: decides when enough new transcript has accumulated to justify
//! a translation call, runs that call with full-context + longest-common-
//! prefix extraction for quality, and streams the result back over a
//! WebSocket.
//!
//! # Example
//!
//! ```ignore
//! use lingua_relay::config::RelayConfig;
//! use lingua_relay::server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     server::start("0.0.0.0", None).await
//! }
//! ```

// Core modules (order matters for cross-module dependencies).
pub mod types;
pub mod errors;
pub mod config;
pub mod rules_engine;
pub mod mt_client;
pub mod pipeline;
pub mod asr_controller;
pub mod connection_registry;
pub mod coordinator;
pub mod adapters;
pub mod server;
pub mod cli;

pub use config::RelayConfig;
pub use coordinator::SessionCoordinator;
pub use errors::RelayError;
pub use server::{start as start_server, ServerState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info.
pub fn info() -> String {
    format!("{} v{} - real-time speech-translation relay", NAME, VERSION)
}
