//! Runs check cycles once or on a fixed interval.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::Result;
use crate::reconciler::Reconciler;
use crate::report::{CycleReport, Reporter};
use crate::store::KeyValueStore;
use crate::watchdog::{CycleContext, Watchdog};

/// One full check across every configured namespace
#[async_trait]
pub trait CheckCycle: Send {
    async fn run(&mut self, ctx: CycleContext) -> Result<CycleReport>;
}

/// Checks each namespace in turn
pub struct RouteChecker<S: KeyValueStore> {
    reconcilers: Vec<Reconciler<S>>,
}

impl<S: KeyValueStore> RouteChecker<S> {
    pub fn new(reconcilers: Vec<Reconciler<S>>) -> Self {
        Self { reconcilers }
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.reconcilers.iter().map(Reconciler::namespace).collect()
    }
}

#[async_trait]
impl<S: KeyValueStore> CheckCycle for RouteChecker<S> {
    async fn run(&mut self, ctx: CycleContext) -> Result<CycleReport> {
        let mut report = CycleReport::new();
        for reconciler in &mut self.reconcilers {
            let outcome = reconciler.run_cycle(&ctx).await?;
            report.insert(reconciler.namespace(), outcome);
        }
        Ok(report)
    }
}

/// Drives cycles under the watchdog and hands results to the reporter
pub struct Scheduler {
    interval: Option<Duration>,
    watchdog: Watchdog,
    reporter: Reporter,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// `interval` of `None` runs a single cycle.
    pub fn new(
        interval: Option<Duration>,
        watchdog: Watchdog,
        reporter: Reporter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            interval,
            watchdog,
            reporter,
            shutdown,
        }
    }

    /// Runs until done (single-shot) or until shutdown (repeat mode).
    ///
    /// Returns whether the last completed cycle passed.
    pub async fn run<C: CheckCycle>(&self, checker: &mut C) -> bool {
        loop {
            let passed = self.run_once(checker).await;

            let Some(interval) = self.interval else {
                return passed;
            };
            if self.shutdown.is_cancelled() {
                return passed;
            }

            info!(interval_secs = interval.as_secs(), "Next check scheduled");
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping");
                    return passed;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Runs a single watchdog-bounded cycle and reports it.
    #[instrument(skip_all)]
    pub async fn run_once<C: CheckCycle>(&self, checker: &mut C) -> bool {
        let result = self
            .watchdog
            .run_bounded(&self.shutdown, move |ctx| checker.run(ctx))
            .await;

        match result {
            Ok(report) => self.reporter.report(&report),
            Err(e) => {
                self.reporter.report_error(&e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouteCheckError;
    use crate::reconciler::CheckStage;
    use crate::report::{CheckOutcome, ReportingConfig};
    use crate::types::RouteKey;
    use std::collections::VecDeque;

    enum Step {
        Pass,
        Fail,
        Error,
        Hang,
    }

    struct ScriptedCycle {
        steps: VecDeque<Step>,
        runs: u32,
        shutdown_after: Option<(u32, CancellationToken)>,
    }

    impl ScriptedCycle {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                runs: 0,
                shutdown_after: None,
            }
        }
    }

    #[async_trait]
    impl CheckCycle for ScriptedCycle {
        async fn run(&mut self, ctx: CycleContext) -> Result<CycleReport> {
            self.runs += 1;
            ctx.enter(CheckStage::Snapshotting)?;
            let mut report = CycleReport::new();
            match self.steps.pop_front().unwrap_or(Step::Pass) {
                Step::Pass => report.insert("", CheckOutcome::default()),
                Step::Fail => report.insert(
                    "",
                    CheckOutcome::new(
                        vec![RouteKey::parse("10.0.0.0/24").unwrap()],
                        vec![],
                        vec![],
                        vec![],
                    ),
                ),
                Step::Error => return Err(RouteCheckError::store("keys", "connection refused")),
                Step::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
            }

            if let Some((after, token)) = &self.shutdown_after {
                if self.runs >= *after {
                    token.cancel();
                }
            }
            Ok(report)
        }
    }

    fn scheduler(interval: Option<Duration>, shutdown: CancellationToken) -> Scheduler {
        Scheduler::new(
            interval,
            Watchdog::new(Duration::from_secs(120)),
            Reporter::new(ReportingConfig::default()),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_single_shot() {
        let shutdown = CancellationToken::new();

        let mut pass = ScriptedCycle::new(vec![Step::Pass]);
        assert!(scheduler(None, shutdown.clone()).run(&mut pass).await);
        assert_eq!(pass.runs, 1);

        let mut fail = ScriptedCycle::new(vec![Step::Fail]);
        assert!(!scheduler(None, shutdown.clone()).run(&mut fail).await);

        let mut error = ScriptedCycle::new(vec![Step::Error]);
        assert!(!scheduler(None, shutdown).run(&mut error).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_cycle() {
        let mut hang = ScriptedCycle::new(vec![Step::Hang]);
        assert!(!scheduler(None, CancellationToken::new()).run(&mut hang).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_mode_continues_after_failures() {
        let shutdown = CancellationToken::new();
        let mut cycle = ScriptedCycle::new(vec![Step::Error, Step::Hang, Step::Fail, Step::Pass]);
        cycle.shutdown_after = Some((4, shutdown.clone()));

        let passed = scheduler(Some(Duration::from_secs(10)), shutdown.clone())
            .run(&mut cycle)
            .await;

        assert_eq!(cycle.runs, 4);
        assert!(passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_mode_stops_on_shutdown_during_sleep() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            trigger.cancel();
        });

        let mut cycle = ScriptedCycle::new(vec![]);
        let passed = scheduler(Some(Duration::from_secs(10)), shutdown)
            .run(&mut cycle)
            .await;

        assert!(passed);
        assert_eq!(cycle.runs, 3);
    }
}
