//! External Adapters (C6)
//!
//! Boundaries the rest of the crate depends on only through traits: debug
//! log persistence and usage accounting. The transport adapter is the
//! WebSocket handler in `server::relay_ws` itself, so it has no separate
//! module here.

pub mod persistence;
pub mod usage;

#[cfg(feature = "gcp")]
pub mod google_translate;

pub use persistence::{DebugLogRow, DebugLogSink, SqliteDebugLogSink};
pub use usage::{CappedUsageSink, UsageSink};

#[cfg(feature = "gcp")]
pub use google_translate::GoogleTranslateV3;
