//! Cron endpoints — `GET /dev/cron` runs one cycle, `/dev/cron/status` is the
//! admin view over status records.
//!
//! Every route requires `Authorization: Bearer <gateway.admin_token>`.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use cronkeep_core::{CronkeepError, Verbosity};
use cronkeep_scheduler::{BufferSink, SchedulerError, StatusRecord};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth::verify_bearer;

type ApiError = (StatusCode, Json<Value>);

#[derive(Debug, Default, Deserialize)]
pub struct CronQuery {
    pub quiet: Option<String>,
    pub debug: Option<String>,
}

impl CronQuery {
    /// Verbosity requested by the caller, or `fallback` when neither flag is set.
    pub fn verbosity(&self, fallback: Verbosity) -> Verbosity {
        let quiet = flag(self.quiet.as_deref());
        let debug = flag(self.debug.as_deref());
        if !quiet && !debug {
            return fallback;
        }
        Verbosity::from_flags(quiet, debug)
    }
}

fn flag(value: Option<&str>) -> bool {
    matches!(value, Some(v) if !matches!(v, "" | "0" | "false"))
}

/// GET /dev/cron?quiet=1|debug=1
///
/// Runs one cycle and answers with the report lines as `text/plain`.
pub async fn run_cycle_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CronQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;

    let verbosity = query.verbosity(state.config.runner.verbosity);
    let sink = BufferSink::new();
    let report = state
        .runner
        .run_cycle(&sink, verbosity)
        .await
        .map_err(scheduler_error)?;
    info!(cycle_id = %report.cycle_id, ran = report.ran(), "cycle triggered over HTTP");

    let mut body = sink.lines().join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body))
}

/// GET /dev/cron/status — every status record, ordered by task id.
pub async fn list_status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<StatusRecord>>, ApiError> {
    authorize(&state, &headers)?;
    state.admin.list().map(Json).map_err(scheduler_error)
}

/// POST /dev/cron/status/{task}/reset — bring a task out of `Error`.
pub async fn reset_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task): Path<String>,
) -> Result<Json<StatusRecord>, ApiError> {
    authorize(&state, &headers)?;
    state
        .admin
        .reset(&task.into())
        .map(Json)
        .map_err(scheduler_error)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    verify_bearer(headers, state.config.gateway.admin_token.as_deref()).map_err(|e| {
        warn!(reason = %e, "cron endpoint authentication failed");
        let status = match e {
            CronkeepError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, Json(json!({"error": e.to_string(), "code": e.code()})))
    })
}

fn scheduler_error(e: SchedulerError) -> ApiError {
    let status = match &e {
        SchedulerError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::InvalidTransition { .. } | SchedulerError::NotEditable { .. } => {
            StatusCode::CONFLICT
        }
        SchedulerError::ScheduleSyntax { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "cron request failed");
    }
    (status, Json(json!({"error": e.to_string(), "code": e.code()})))
}
