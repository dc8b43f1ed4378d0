//! Queue metrics endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;
use crate::replies::QueueMetrics;

#[derive(Serialize)]
pub struct MetricsResponse {
    pub result: MetricsResult,
}

#[derive(Serialize)]
pub struct MetricsResult {
    pub replies: QueueMetrics,
}

/// `GET /metrics`
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        result: MetricsResult {
            replies: state.dispatcher.metrics().await,
        },
    })
}
