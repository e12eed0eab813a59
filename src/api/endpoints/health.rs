//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Engines that passed the startup probe, in priority order.
    pub engines: Vec<String>,
    pub llm_configured: bool,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
}

/// `GET /api/health`
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    let status = ctx.analyzer.status();
    Json(HealthResponse {
        status: if status.engines.is_empty() { "degraded" } else { "ok" },
        version: crate::config::APP_VERSION,
        engines: status.engines,
        llm_configured: status.llm_configured,
        llm_provider: status.llm_provider,
        llm_model: status.llm_model,
    })
}
