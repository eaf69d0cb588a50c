//! Cycle deadline and cancellation.
//!
//! A cycle runs inside [`Watchdog::run_bounded`]. The cycle future is dropped
//! when the deadline passes, which abandons every in-flight read and closes
//! the cycle's change-feed subscription. The [`CycleContext`] handed to the
//! cycle carries a cancellation token checked at each stage boundary and the
//! current stage, which is what the timeout report names.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Result, RouteCheckError};
use crate::reconciler::CheckStage;

/// Cancellation and progress state shared with a running cycle
#[derive(Debug, Clone)]
pub struct CycleContext {
    token: CancellationToken,
    stage: Arc<Mutex<CheckStage>>,
    deadline: Instant,
}

impl CycleContext {
    /// Creates a context whose deadline is `timeout` from now.
    pub fn new(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            stage: Arc::new(Mutex::new(CheckStage::Idle)),
            deadline: Instant::now() + timeout,
        }
    }

    /// Records the transition to `stage`, failing if the cycle was cancelled.
    pub fn enter(&self, stage: CheckStage) -> Result<()> {
        self.check()?;
        let mut current = self.stage.lock();
        let previous = *current;
        debug!(from = %previous, to = %stage, "Stage transition");
        *current = stage;
        Ok(())
    }

    /// Fails with `Cancelled` if the cycle was cancelled.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(RouteCheckError::Cancelled {
                stage: self.stage(),
            });
        }
        Ok(())
    }

    pub fn stage(&self) -> CheckStage {
        *self.stage.lock()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Time left before the watchdog fires.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Sleeps for `duration` unless the cycle is cancelled first.
    pub async fn sleep(&self, duration: Duration, stage: CheckStage) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(RouteCheckError::Cancelled { stage }),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Hard deadline around one check cycle
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    timeout: Duration,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs `cycle` with a fresh [`CycleContext`], abandoning it on timeout
    /// or when `shutdown` is cancelled.
    pub async fn run_bounded<T, F, Fut>(&self, shutdown: &CancellationToken, cycle: F) -> Result<T>
    where
        F: FnOnce(CycleContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = CycleContext::new(shutdown.child_token(), self.timeout);
        let watched = ctx.clone();

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let stage = watched.stage();
                warn!(%stage, "Check cycle interrupted by shutdown");
                Err(RouteCheckError::Cancelled { stage })
            }
            outcome = tokio::time::timeout(self.timeout, cycle(ctx)) => match outcome {
                Ok(result) => result,
                Err(_elapsed) => {
                    watched.cancel();
                    let stage = watched.stage();
                    error!(
                        %stage,
                        timeout_secs = self.timeout.as_secs(),
                        "Check cycle exceeded its deadline, abandoning"
                    );
                    Err(RouteCheckError::Timeout {
                        stage,
                        timeout: self.timeout,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enter_tracks_stage() {
        let ctx = CycleContext::new(CancellationToken::new(), Duration::from_secs(5));
        assert_eq!(ctx.stage(), CheckStage::Idle);

        ctx.enter(CheckStage::Snapshotting).unwrap();
        assert_eq!(ctx.stage(), CheckStage::Snapshotting);
    }

    #[tokio::test]
    async fn test_enter_after_cancel_fails() {
        let ctx = CycleContext::new(CancellationToken::new(), Duration::from_secs(5));
        ctx.enter(CheckStage::Diffing).unwrap();
        ctx.cancel();

        let err = ctx.enter(CheckStage::Reconciling).unwrap_err();
        assert!(matches!(
            err,
            RouteCheckError::Cancelled {
                stage: CheckStage::Diffing
            }
        ));
    }

    #[tokio::test]
    async fn test_run_bounded_passes_result_through() {
        let watchdog = Watchdog::new(Duration::from_secs(5));
        let shutdown = CancellationToken::new();

        let value = watchdog
            .run_bounded(&shutdown, |ctx| async move {
                ctx.enter(CheckStage::Snapshotting)?;
                Ok::<_, RouteCheckError>(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_bounded_times_out_with_stage() {
        let watchdog = Watchdog::new(Duration::from_secs(120));
        let shutdown = CancellationToken::new();

        let result: Result<()> = watchdog
            .run_bounded(&shutdown, |ctx| async move {
                ctx.enter(CheckStage::Reconciling)?;
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok::<_, RouteCheckError>(())
            })
            .await;

        match result {
            Err(RouteCheckError::Timeout { stage, timeout }) => {
                assert_eq!(stage, CheckStage::Reconciling);
                assert_eq!(timeout, Duration::from_secs(120));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_cycle() {
        let watchdog = Watchdog::new(Duration::from_secs(120));
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result: Result<()> = watchdog
            .run_bounded(&shutdown, |ctx| async move {
                ctx.enter(CheckStage::Snapshotting)?;
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, RouteCheckError>(())
            })
            .await;
        assert!(matches!(result, Err(RouteCheckError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_cancellable() {
        let token = CancellationToken::new();
        let ctx = CycleContext::new(token.clone(), Duration::from_secs(5));
        assert!(ctx.sleep(Duration::from_secs(1), CheckStage::ControlPlane).await.is_ok());

        token.cancel();
        let start = Instant::now();
        assert!(ctx.sleep(Duration::from_secs(30), CheckStage::ControlPlane).await.is_err());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(ctx.remaining() <= Duration::from_secs(4));
        assert!(ctx.remaining() > Duration::from_secs(3));
    }
}
