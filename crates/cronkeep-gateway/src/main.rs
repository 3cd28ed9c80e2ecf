use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cronkeep_core::CronkeepConfig;
use cronkeep_scheduler::{
    Clock, SqliteStatusStore, StatusAdmin, StdoutSink, SystemClock, TaskRunner,
};
use tracing::info;

mod app;
mod auth;
mod cli;
mod http;
mod tasks;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the cycle report.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cronkeep_gateway=info,cronkeep_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > CRONKEEP_CONFIG env > ~/.cronkeep/cronkeep.toml
    let config = CronkeepConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        CronkeepConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening status database");
    let conn = rusqlite::Connection::open(db_path)?;
    cronkeep_scheduler::db::configure_connection(&conn, config.database.busy_timeout_ms)?;
    let store = Arc::new(SqliteStatusStore::new(conn)?);

    let registry = Arc::new(tasks::build_registry(&config, store.clone())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let runner = Arc::new(
        TaskRunner::new(registry.clone(), store.clone(), clock.clone())
            .with_initial_status(config.runner.initial_status.into()),
    );
    let admin = StatusAdmin::new(store, registry, clock);

    match cli.command {
        Commands::Run(args) => {
            let verbosity = args.verbosity(config.runner.verbosity);
            let report = runner.run_cycle(&StdoutSink, verbosity).await?;
            info!(cycle_id = %report.cycle_id, ran = report.ran(), "cycle complete");
        }
        Commands::Status(command) => cli::run_status(&admin, command)?,
        Commands::Serve => serve(config, runner, admin).await?,
    }
    Ok(())
}

async fn serve(
    config: CronkeepConfig,
    runner: Arc<TaskRunner>,
    admin: StatusAdmin,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    if config.gateway.admin_token.is_none() {
        tracing::warn!("no gateway.admin_token configured; /dev/cron rejects every request");
    }

    // optional in-process ticker for hosts without an external trigger
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if let Some(secs) = config.runner.internal_tick_secs.filter(|s| *s > 0) {
        let ticker = Arc::clone(&runner);
        let verbosity = config.runner.verbosity;
        tokio::spawn(async move {
            ticker
                .run_every(Duration::from_secs(secs), verbosity, shutdown_rx)
                .await
        });
    }

    let state = Arc::new(app::AppState::new(config, runner, admin));
    let router = app::build_router(state);

    info!("cronkeep gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // signal the ticker to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Create the database's directory. A failure is logged and left for
/// `Connection::open` to report; returns whether the directory is usable.
fn ensure_parent_dir(path: &str) -> bool {
    let Some(parent) = std::path::Path::new(path).parent() else {
        return true;
    };
    match std::fs::create_dir_all(parent) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path = %parent.display(), "could not create database directory: {e}");
            false
        }
    }
}
