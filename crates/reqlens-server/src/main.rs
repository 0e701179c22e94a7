//! reqlens server
//!
//! - Data plane: `/test`, `/hello`, instrumented per route template
//! - Admin plane: `/metrics`, `/check`, `/health`, `/debug/pprof/*`
//!   (heap counters come from the counting global allocator below)
//! - SIGINT / SIGTERM: stop accepting, drain within the grace period, exit

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use reqlens_core::error::Result;
use reqlens_server::{
    admin::AdminServer,
    app_state::AppState,
    config,
    obs::CountingAlloc,
    router,
    server::DataPlaneServer,
    shutdown::{watch_signals, ShutdownCoordinator, ShutdownOutcome},
};

const DEFAULT_CONFIG_PATH: &str = "reqlens.yaml";

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc::new();

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code().as_str(), error = %e, "reqlens-server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let state = AppState::new(config::load_from_file(&path)?)?;
    let server_cfg = state.cfg().server_config()?;
    let admin_cfg = state.cfg().admin_config()?;
    let grace = state.cfg().grace_period();

    let app = router::build_router(&state);

    let coordinator = ShutdownCoordinator::new(grace);
    let signals = watch_signals(coordinator.clone());

    let admin_shutdown = CancellationToken::new();
    let admin = match admin_cfg {
        Some(admin_cfg) => {
            Some(AdminServer::new(state.admin_state(admin_cfg)).spawn(admin_shutdown.clone()))
        }
        None => {
            tracing::info!("admin server disabled");
            None
        }
    };

    tracing::info!(config = %path, "reqlens-server starting");
    let server = match DataPlaneServer::bind(server_cfg).await {
        Ok(server) => server,
        Err(e) => {
            admin_shutdown.cancel();
            signals.abort();
            return Err(e);
        }
    };

    let outcome = server.serve(app, coordinator).await;

    admin_shutdown.cancel();
    if let Some(admin) = admin {
        if let Err(e) = admin.await {
            tracing::warn!(error = %e, "admin task ended abnormally");
        }
    }
    signals.abort();

    match outcome {
        ShutdownOutcome::Clean => tracing::info!("reqlens-server stopped"),
        ShutdownOutcome::TimedOut { forced } => {
            tracing::info!(forced, "reqlens-server stopped after forcing connections closed")
        }
    }
    Ok(())
}
