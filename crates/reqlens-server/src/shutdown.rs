//! Shutdown coordination for the data-plane listener.
//!
//! `Running -> Draining -> Stopped`, each transition taken at most once.
//!
//! - `trigger` moves to Draining and cancels the drain token: the accept loop
//!   stops and every connection asks hyper for a graceful close.
//! - `drain` waits for the tracked connection tasks, bounded by the grace
//!   period. On expiry the force token is cancelled, remaining connections
//!   are dropped, and the timeout is reported.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqlens_core::error::ReqlensError;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection finished within the grace period.
    Clean,
    /// Grace period elapsed; `forced` connections were closed.
    TimedOut { forced: usize },
}

struct Inner {
    state: AtomicU8,
    grace: Duration,
    drain: CancellationToken,
    force: CancellationToken,
    tracker: TaskTracker,
    outcome: OnceCell<ShutdownOutcome>,
    timeouts: AtomicU64,
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(RUNNING),
                grace,
                drain: CancellationToken::new(),
                force: CancellationToken::new(),
                tracker: TaskTracker::new(),
                outcome: OnceCell::new(),
                timeouts: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        match self.inner.state.load(Ordering::Acquire) {
            RUNNING => ShutdownState::Running,
            DRAINING => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace
    }

    /// Start draining. Returns `false` (and changes nothing) when a drain is
    /// already in progress or finished.
    pub fn trigger(&self) -> bool {
        let started = self
            .inner
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            tracing::info!(
                grace_ms = self.inner.grace.as_millis() as u64,
                in_flight = self.inner.tracker.len(),
                "shutdown triggered; draining data-plane connections"
            );
            self.inner.drain.cancel();
        }
        started
    }

    /// Cancelled once draining starts.
    pub fn drain_token(&self) -> CancellationToken {
        self.inner.drain.clone()
    }

    /// Cancelled when the grace period ran out.
    pub fn force_token(&self) -> CancellationToken {
        self.inner.force.clone()
    }

    /// Connection tasks must be spawned on this tracker to be waited for.
    pub fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    /// Connection tasks still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Number of times the grace period ran out (0 or 1).
    pub fn timeouts(&self) -> u64 {
        self.inner.timeouts.load(Ordering::Relaxed)
    }

    pub fn outcome(&self) -> Option<ShutdownOutcome> {
        self.inner.outcome.get().copied()
    }

    /// Drain and stop. Triggers first if nobody did. Concurrent and repeated
    /// calls share the single recorded outcome.
    pub async fn drain(&self) -> ShutdownOutcome {
        *self.inner.outcome.get_or_init(|| self.finish()).await
    }

    async fn finish(&self) -> ShutdownOutcome {
        self.trigger();

        let tracker = &self.inner.tracker;
        tracker.close();

        let outcome = match tokio::time::timeout(self.grace_period(), tracker.wait()).await {
            Ok(()) => {
                tracing::info!("all data-plane connections drained");
                ShutdownOutcome::Clean
            }
            Err(_) => {
                let forced = tracker.len();
                self.inner.force.cancel();
                tracker.wait().await;
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);

                let e = ReqlensError::ShutdownTimeout { forced };
                tracing::warn!(
                    code = e.code().as_str(),
                    forced,
                    grace_ms = self.inner.grace.as_millis() as u64,
                    "{e}"
                );
                ShutdownOutcome::TimedOut { forced }
            }
        };

        self.inner.state.store(STOPPED, Ordering::Release);
        outcome
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Trigger `coordinator` on every termination signal. Signals after the
/// first are logged and ignored.
pub fn watch_signals(coordinator: ShutdownCoordinator) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("registered shutdown signal handler");
        loop {
            termination_signal().await;
            if !coordinator.trigger() {
                tracing::info!(
                    state = ?coordinator.state(),
                    "termination signal ignored: shutdown already in progress"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_trigger_is_a_no_op() {
        let c = ShutdownCoordinator::new(Duration::from_millis(100));
        assert_eq!(c.state(), ShutdownState::Running);
        assert!(!c.drain_token().is_cancelled());

        assert!(c.trigger());
        assert_eq!(c.state(), ShutdownState::Draining);
        assert!(c.drain_token().is_cancelled());
        assert!(!c.trigger());
        assert_eq!(c.state(), ShutdownState::Draining);
    }

    #[tokio::test]
    async fn drain_without_connections_is_clean_and_final() {
        let c = ShutdownCoordinator::new(Duration::from_millis(100));
        assert_eq!(c.drain().await, ShutdownOutcome::Clean);
        assert_eq!(c.state(), ShutdownState::Stopped);

        assert!(!c.trigger());
        assert_eq!(c.drain().await, ShutdownOutcome::Clean);
        assert_eq!(c.state(), ShutdownState::Stopped);
        assert_eq!(c.timeouts(), 0);
    }

    #[tokio::test]
    async fn stuck_task_is_forced_exactly_once() {
        let c = ShutdownCoordinator::new(Duration::from_millis(50));
        let force = c.force_token();
        c.tracker().spawn(async move {
            // stands in for a connection that only stops when forced
            force.cancelled().await;
        });

        let (a, b) = tokio::join!(c.drain(), c.drain());
        assert_eq!(a, ShutdownOutcome::TimedOut { forced: 1 });
        assert_eq!(a, b);
        assert_eq!(c.timeouts(), 1);
        assert_eq!(c.in_flight(), 0);
        assert!(c.force_token().is_cancelled());
    }
}
