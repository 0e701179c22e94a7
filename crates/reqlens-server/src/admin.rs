//! Administrative listener.
//!
//! Runs on its own address with its own router. It shares only the metric
//! registry with the data plane, so a failure here (including a bind error)
//! is logged and never takes the data plane down.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use reqlens_core::error::{ReqlensError, Result};

use crate::ops::{build_admin_router, AdminState};

pub struct AdminServer {
    state: AdminState,
}

impl AdminServer {
    pub fn new(state: AdminState) -> Self {
        Self { state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.state.cfg().addr
    }

    /// Bind the configured address and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ReqlensError::ListenerBind {
                listener: "admin",
                addr,
                source,
            })?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| ReqlensError::Internal(format!("local_addr failed: {e}")))?;
        tracing::info!(addr = %local, "admin server run on");

        let app = build_admin_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| ReqlensError::Internal(format!("admin server failed: {e}")))?;

        tracing::info!("admin server stopped");
        Ok(())
    }

    /// Run in the background. Errors are logged, not propagated.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(shutdown).await {
                tracing::error!(code = e.code().as_str(), error = %e, "admin server unavailable");
            }
        })
    }
}
