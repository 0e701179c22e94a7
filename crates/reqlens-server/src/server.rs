//! Data-plane listener.
//!
//! Own accept loop on top of hyper's HTTP/1 connection driver, so the
//! listener can honor its timeouts and hand every connection to the
//! [`ShutdownCoordinator`]:
//! - read-header timeout and header size limit: hyper connection builder
//! - read timeout: request body timeout layer
//! - write timeout: whole-request timeout layer (answers 408); the deadline
//!   is stamped on the request first so instrumented routes record the 408
//! - idle timeout: per-connection activity check, like a session idle timer

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

use reqlens_core::error::{ReqlensError, Result};

use crate::config::ServerConfig;
use crate::middleware::WriteDeadline;
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome};

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
/// hyper refuses smaller read buffers.
const MIN_BUF_SIZE: usize = 8192;

pub struct DataPlaneServer {
    cfg: ServerConfig,
    listener: TcpListener,
}

impl DataPlaneServer {
    /// Bind the configured address. Failure here is fatal for the process.
    pub async fn bind(cfg: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(cfg.addr)
            .await
            .map_err(|source| ReqlensError::ListenerBind {
                listener: "data-plane",
                addr: cfg.addr,
                source,
            })?;
        Ok(Self { cfg, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ReqlensError::Internal(format!("local_addr failed: {e}")))
    }

    /// Serve `app` until `coordinator` is triggered, then drain.
    pub async fn serve(self, app: Router, coordinator: ShutdownCoordinator) -> ShutdownOutcome {
        let Self { cfg, listener } = self;

        let write_timeout = cfg.write_timeout;
        let svc = ServiceBuilder::new()
            .map_request(move |mut req: Request<Incoming>| {
                // stamped before the timeout starts, so never later than it fires
                req.extensions_mut()
                    .insert(WriteDeadline(Instant::now() + write_timeout));
                req
            })
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                write_timeout,
            ))
            .layer(RequestBodyTimeoutLayer::new(cfg.read_timeout))
            .service(app);

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(cfg.read_header_timeout)
            .max_buf_size(cfg.max_header_bytes.max(MIN_BUF_SIZE))
            .keep_alive(true);
        let builder = Arc::new(builder);

        let idle_timeout = cfg.idle_timeout;
        let drain = coordinator.drain_token();
        let force = coordinator.force_token();

        tracing::info!(addr = %cfg.addr, "data-plane server run on");

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = drain.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        // e.g. EMFILE; keep serving existing connections
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let conn = ConnectionTask {
                peer,
                builder: Arc::clone(&builder),
                idle_timeout,
                drain: drain.clone(),
                force: force.clone(),
            };
            coordinator.tracker().spawn(conn.run(stream, svc.clone()));
        }

        drop(listener);
        tracing::info!(
            in_flight = coordinator.in_flight(),
            "data-plane listener closed; no new connections accepted"
        );

        coordinator.drain().await
    }
}

/// Request activity of one connection.
struct Activity {
    origin: Instant,
    in_flight: AtomicUsize,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            in_flight: AtomicUsize::new(0),
            last_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight(Arc::clone(self))
    }

    /// Time since the last request finished, or zero while one is running.
    fn idle_for(&self) -> Duration {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            return Duration::ZERO;
        }
        let last = self.last_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

struct InFlight(Arc<Activity>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.last_ms.store(self.0.now_ms(), Ordering::Release);
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

struct ConnectionTask {
    peer: SocketAddr,
    builder: Arc<http1::Builder>,
    idle_timeout: Duration,
    drain: CancellationToken,
    force: CancellationToken,
}

impl ConnectionTask {
    async fn run<S>(self, stream: TcpStream, svc: S)
    where
        S: tower::Service<
                Request<Incoming>,
                Response = axum::response::Response,
                Error = std::convert::Infallible,
            > + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let Self {
            peer,
            builder,
            idle_timeout,
            drain,
            force,
        } = self;

        let activity = Arc::new(Activity::new());
        let hyper_svc = {
            let activity = Arc::clone(&activity);
            hyper::service::service_fn(move |req: Request<Incoming>| {
                let guard = activity.begin();
                let call = svc.clone().oneshot(req);
                async move {
                    let res = call.await;
                    drop(guard);
                    res
                }
            })
        };

        let conn = builder.serve_connection(TokioIo::new(stream), hyper_svc);
        tokio::pin!(conn);

        let mut idle_check = tokio::time::interval(
            IDLE_CHECK_INTERVAL
                .min(idle_timeout)
                .max(Duration::from_millis(10)),
        );
        idle_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut closing = false;

        loop {
            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        tracing::debug!(%peer, error = %e, "connection ended with error");
                    }
                    break;
                }
                _ = force.cancelled() => {
                    tracing::warn!(%peer, "connection force-closed after grace period");
                    break;
                }
                _ = drain.cancelled(), if !closing => {
                    conn.as_mut().graceful_shutdown();
                    closing = true;
                }
                _ = idle_check.tick(), if !closing => {
                    if activity.idle_for() >= idle_timeout {
                        tracing::debug!(%peer, "idle timeout");
                        conn.as_mut().graceful_shutdown();
                        closing = true;
                    }
                }
            }
        }
    }
}
