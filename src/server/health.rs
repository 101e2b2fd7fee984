//! `GET /healthz` liveness probe.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ServerState;
use crate::types::APP_VERSION;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    max_connections: usize,
}

pub async fn healthz(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: APP_VERSION,
        max_connections: state.config.server.max_connections,
    })
}
