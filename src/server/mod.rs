//! Web server: axum router, shared state, admission control wiring.

pub mod health;
pub mod relay_ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::adapters::{CappedUsageSink, DebugLogSink, SqliteDebugLogSink, UsageSink};
use crate::config::RelayConfig;
use crate::connection_registry::ConnectionRegistry;

/// Shared, immutable-apart-from-its-Arc-internals server state. No session
/// state lives here — only the connection-count map, the two write-only
/// adapter sinks, and the immutable configuration (spec.md §5 "no state is
/// shared across sessions other than the connection-count map... and the
/// immutable configuration").
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<RelayConfig>,
    pub connections: Arc<ConnectionRegistry>,
    pub debug_log: Arc<dyn DebugLogSink>,
    pub usage: Arc<dyn UsageSink>,
}

pub async fn start(host: &str, port_override: Option<u16>) -> Result<()> {
    let mut config = RelayConfig::load()?;
    if let Some(port) = port_override {
        config.server.port = port;
    }
    config.validate_mt_credentials()?;

    let connections = ConnectionRegistry::new(config.server.max_connections, config.server.max_connections_per_ip);
    let debug_log_path = config_dir_join("debug-log.sqlite")?;
    let debug_log: Arc<dyn DebugLogSink> = Arc::new(SqliteDebugLogSink::new(debug_log_path).await?);
    let usage: Arc<dyn UsageSink> = Arc::new(CappedUsageSink::new(50_000));

    let state = ServerState {
        config: Arc::new(config),
        connections,
        debug_log,
        usage,
    };

    let addr: SocketAddr = format!("{}:{}", host, state.config.server.port).parse()?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/relay-ws", get(relay_ws::ws_handler))
        .route("/healthz", get(health::healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(%addr, "lingua-relay listening");

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Resolve `<platform config dir>/<file_name>`, used for the debug-log
/// sqlite file so it lives alongside `config.toml` (spec.md §6 schema).
fn config_dir_join(file_name: &str) -> Result<std::path::PathBuf> {
    Ok(crate::config::config_path()?.with_file_name(file_name))
}
