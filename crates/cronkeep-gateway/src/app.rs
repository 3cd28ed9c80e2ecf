use axum::{
    routing::{get, post},
    Router,
};
use cronkeep_core::CronkeepConfig;
use cronkeep_scheduler::{StatusAdmin, TaskRunner};
use std::sync::Arc;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CronkeepConfig,
    pub runner: Arc<TaskRunner>,
    pub admin: StatusAdmin,
}

impl AppState {
    pub fn new(config: CronkeepConfig, runner: Arc<TaskRunner>, admin: StatusAdmin) -> Self {
        Self {
            config,
            runner,
            admin,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/dev/cron", get(crate::http::cron::run_cycle_handler))
        .route("/dev/cron/status", get(crate::http::cron::list_status_handler))
        .route(
            "/dev/cron/status/{task}/reset",
            post(crate::http::cron::reset_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
