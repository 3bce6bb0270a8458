use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::coordinator::{RunCoordinator, RunRecord, RunStage};
use crate::differ::DiffSummary;
use crate::models::{ListingRecord, SnapshotStats};

pub const SERVICE_NAME: &str = "SpotEye Apartment Monitor";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RunCoordinator>,
    pub interval_enabled: bool,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/monitor", get(trigger).post(trigger))
        .route("/status", get(status))
        .route("/test-email", post(test_email))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    stage: RunStage,
    interval_enabled: bool,
    timestamp: DateTime<Utc>,
}

async fn health(State(state): State<AppState>) -> Json<HealthData> {
    Json(HealthData {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        stage: state.coordinator.stage(),
        interval_enabled: state.interval_enabled,
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    status: &'static str,
    run_id: Option<uuid::Uuid>,
    listings: usize,
    summary: DiffSummary,
    snapshot_updated: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct TriggerError {
    status: &'static str,
    stage: RunStage,
    error: String,
    snapshot_updated: bool,
    timestamp: DateTime<Utc>,
}

async fn trigger(State(state): State<AppState>) -> Response {
    match state.coordinator.trigger().await {
        Ok(report) => Json(TriggerResponse {
            status: report.outcome.as_str(),
            run_id: report.run_id,
            listings: report.listings,
            summary: report.summary,
            snapshot_updated: report.snapshot_updated,
            timestamp: report.finished_at,
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(TriggerError {
                status: "error",
                stage: e.stage,
                error: e.source.to_string(),
                snapshot_updated: e.snapshot_updated,
                timestamp: Utc::now(),
            }),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
struct StatusData {
    stage: RunStage,
    last_run: Option<RunRecord>,
    captured_at: Option<DateTime<Utc>>,
    statistics: Option<SnapshotStats>,
    soon_available: Vec<ListingRecord>,
    timestamp: DateTime<Utc>,
}

async fn status(State(state): State<AppState>) -> Response {
    let snapshot = match state.coordinator.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(error = %e, "failed to load snapshot for status");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let soon_available = snapshot
        .iter()
        .flat_map(|s| s.listings.iter())
        .filter(|r| r.availability.is_open())
        .cloned()
        .collect();

    Json(StatusData {
        stage: state.coordinator.stage(),
        last_run: state.coordinator.last_run().await,
        captured_at: snapshot.as_ref().map(|s| s.captured_at),
        statistics: snapshot.as_ref().map(|s| s.stats()),
        soon_available,
        timestamp: Utc::now(),
    })
    .into_response()
}

async fn test_email(State(state): State<AppState>) -> Response {
    match state.coordinator.send_test_email().await {
        Ok(()) => Json(json!({ "status": "success" })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "test email failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "failed", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
