use crate::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": state.routes.load().len(),
    }))
}

/// In-process metrics snapshot. Empty when telemetry goes to an external sink.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(recorder) => Json(recorder.snapshot()),
        None => Json(serde_json::json!({})),
    }
}
