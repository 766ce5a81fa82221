//! Asynchronous sweep driver.
//!
//! Implements:
//! - Enumeration of every combination of a [`ChangeSet`] on a dedicated worker task
//! - Pruning through an [`Assessor`]
//! - Back-off and retry when the action reports [`ActionOutcome::TryAgain`]
//! - Early stop on the first hard failure, reporting the failing parameters
//!
//! A new sweep request first drains the running one. There is no
//! mid-combination cancellation: [`Sweeper::stop`] takes effect between
//! combinations.

use crate::action::{Action, ActionOutcome};
use crate::assessor::Assessor;
use crate::changeset::{ChangeSet, Snapshot};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sweep worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// First back-off after a `TryAgain`.
    pub backoff: Duration,
    /// Back-off ceiling; the delay doubles up to this.
    pub max_backoff: Duration,
    /// Retries of one combination before the sweep fails.
    pub max_retries: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(64),
            max_retries: 1000,
        }
    }
}

/// How a sweep ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every combination ran.
    Completed,
    /// Stopped on request before the last combination.
    Stopped,
    /// An action failed.
    Failed {
        /// Index of the failing combination.
        combination: u64,
        /// Parameter values of the failing combination.
        params: Snapshot,
        /// Failure reported by the action.
        reason: String,
    },
}

/// Summary of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Combinations visited, including skipped ones.
    pub enumerated: u64,
    /// Combinations the action completed.
    pub executed: u64,
    /// Combinations excluded by the assessor.
    pub skipped: u64,
    /// `TryAgain` retries across the sweep.
    pub retries: u64,
    /// Wall time of the sweep.
    pub elapsed: Duration,
    /// Final state.
    pub outcome: SweepOutcome,
}

impl SweepReport {
    /// Whether the sweep ran to completion.
    pub fn is_success(&self) -> bool {
        self.outcome == SweepOutcome::Completed
    }
}

struct Plan {
    changeset: ChangeSet,
    assessor: Assessor,
    action: Option<Arc<dyn Action>>,
}

/// Clears the busy flag when the worker ends, even by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sweep driver with one worker task.
pub struct Sweeper {
    config: SweeperConfig,
    plan: Mutex<Plan>,
    busy: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<SweepReport>>>,
    last: Mutex<Option<SweepReport>>,
}

impl core::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sweeper")
            .field("config", &self.config)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl Sweeper {
    /// Idle sweeper with an empty plan.
    pub fn new(config: SweeperConfig) -> Self {
        Self {
            config,
            plan: Mutex::new(Plan {
                changeset: ChangeSet::new(),
                assessor: Assessor::new(),
                action: None,
            }),
            busy: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: tokio::sync::Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    /// Set the action at construction.
    pub fn with_action(self, action: Arc<dyn Action>) -> Self {
        self.plan().action = Some(action);
        self
    }

    fn plan(&self) -> MutexGuard<'_, Plan> {
        self.plan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn editable_plan(&self) -> Result<MutexGuard<'_, Plan>> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        Ok(self.plan())
    }

    /// Replace the change set.
    pub fn set_changeset(&self, changeset: ChangeSet) -> Result<()> {
        self.editable_plan()?.changeset = changeset;
        Ok(())
    }

    /// Replace the assessor.
    pub fn set_assessor(&self, assessor: Assessor) -> Result<()> {
        self.editable_plan()?.assessor = assessor;
        Ok(())
    }

    /// Replace the action.
    pub fn set_action(&self, action: Arc<dyn Action>) -> Result<()> {
        self.editable_plan()?.action = Some(action);
        Ok(())
    }

    /// Whether a sweep is running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Ask the running sweep to stop after the current combination.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Start a sweep, first draining any sweep still running.
    ///
    /// # Errors
    /// - `Error::EmptyChangeSet` if there is nothing to sweep
    /// - `Error::Config` if no action is set
    pub async fn sweep(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.take() {
            debug!("Draining previous sweep");
            self.finish(handle).await?;
        }

        let (changeset, assessor, action) = {
            let plan = self.plan();
            if plan.changeset.is_empty() {
                return Err(Error::EmptyChangeSet);
            }
            let action = plan
                .action
                .clone()
                .ok_or_else(|| Error::Config("no sweep action".into()))?;
            (plan.changeset.clone(), plan.assessor.clone(), action)
        };

        self.stop.store(false, Ordering::Release);
        self.busy.store(true, Ordering::Release);
        let guard = BusyGuard(self.busy.clone());
        let stop = self.stop.clone();
        let config = self.config.clone();
        *worker = Some(tokio::spawn(async move {
            let _guard = guard;
            run(config, changeset, assessor, action, stop).await
        }));
        Ok(())
    }

    /// Wait for the running sweep and return its report.
    ///
    /// Returns `None` if no sweep was started since the last wait.
    pub async fn wait(&self) -> Result<Option<SweepReport>> {
        let handle = self.worker.lock().await.take();
        match handle {
            Some(handle) => self.finish(handle).await.map(Some),
            None => Ok(None),
        }
    }

    async fn finish(&self, handle: JoinHandle<SweepReport>) -> Result<SweepReport> {
        let report = handle.await.map_err(|e| Error::Worker(e.to_string()))?;
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(report)
    }

    /// Report of the most recently collected sweep.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn describe(params: &Snapshot) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn run(
    config: SweeperConfig,
    mut cs: ChangeSet,
    assessor: Assessor,
    action: Arc<dyn Action>,
    stop: Arc<AtomicBool>,
) -> SweepReport {
    let started = Instant::now();
    let mut report = SweepReport {
        enumerated: 0,
        executed: 0,
        skipped: 0,
        retries: 0,
        elapsed: Duration::ZERO,
        outcome: SweepOutcome::Completed,
    };
    info!(combinations = cs.combinations(), "Sweep started");

    let mut more = cs.init();
    'sweep: while more {
        if stop.load(Ordering::Acquire) {
            info!(combination = cs.curidx(), "Sweep stopped");
            report.outcome = SweepOutcome::Stopped;
            break;
        }
        report.enumerated += 1;

        if !assessor.assess(&cs) {
            report.skipped += 1;
            more = cs.iter();
            continue;
        }
        debug!(combination = cs.curidx(), params = %describe(&cs.snapshot()), "Running combination");

        let mut delay = config.backoff;
        let mut attempts = 0u32;
        loop {
            let reason = match action.act(&cs).await {
                ActionOutcome::Done => break,
                ActionOutcome::TryAgain if attempts < config.max_retries => {
                    attempts += 1;
                    report.retries += 1;
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(config.max_backoff);
                    continue;
                }
                ActionOutcome::TryAgain => {
                    warn!(combination = cs.curidx(), attempts, "Retries exhausted");
                    format!("retries exhausted after {attempts} attempts")
                }
                ActionOutcome::Failed(reason) => reason,
            };

            let params = cs.snapshot();
            error!(
                combination = cs.curidx(),
                params = %describe(&params),
                %reason,
                "Sweep failed"
            );
            report.outcome = SweepOutcome::Failed {
                combination: cs.curidx(),
                params,
                reason,
            };
            break 'sweep;
        }

        report.executed += 1;
        more = cs.iter();
    }

    report.elapsed = started.elapsed();
    info!(
        enumerated = report.enumerated,
        executed = report.executed,
        skipped = report.skipped,
        retries = report.retries,
        "Sweep finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Snapshot>>,
        fail_at: Option<(i32, i32)>,
        busy_first: u32,
        busy_left: AtomicU32,
        delay: Option<Duration>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<(i32, i32)> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|s| (s[0].1, s[1].1))
                .collect()
        }
    }

    #[async_trait]
    impl Action for Recorder {
        async fn act(&self, cs: &ChangeSet) -> ActionOutcome {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.busy_left.load(Ordering::Relaxed) > 0 {
                self.busy_left.fetch_sub(1, Ordering::Relaxed);
                return ActionOutcome::TryAgain;
            }
            self.busy_left.store(self.busy_first, Ordering::Relaxed);
            self.seen.lock().unwrap().push(cs.snapshot());
            let here = (cs.value("power").unwrap(), cs.value("channel").unwrap());
            if Some(here) == self.fail_at {
                return ActionOutcome::Failed("link down".into());
            }
            ActionOutcome::Done
        }
    }

    fn grid() -> ChangeSet {
        let mut cs = ChangeSet::new();
        cs.add("power", 0, 2, 1);
        cs.add("channel", 1, 3, 1);
        cs
    }

    fn sweeper(action: Arc<Recorder>) -> Sweeper {
        let sweeper = Sweeper::new(SweeperConfig::default());
        sweeper.set_changeset(grid()).unwrap();
        sweeper.set_action(action).unwrap();
        sweeper
    }

    #[tokio::test]
    async fn test_sweep_visits_grid_in_order() {
        let action = Arc::new(Recorder::default());
        let sweeper = sweeper(action.clone());
        sweeper.sweep().await.unwrap();
        let report = sweeper.wait().await.unwrap().unwrap();

        assert!(report.is_success());
        assert_eq!(report.executed, 9);
        assert_eq!(
            action.seen(),
            vec![(0, 1), (1, 1), (2, 1), (0, 2), (1, 2), (2, 2), (0, 3), (1, 3), (2, 3)]
        );
        assert!(!sweeper.is_busy());
        assert_eq!(sweeper.last_report(), Some(report));
    }

    #[tokio::test]
    async fn test_sweep_stops_on_first_failure() {
        let action = Arc::new(Recorder {
            fail_at: Some((1, 2)),
            ..Default::default()
        });
        let sweeper = sweeper(action.clone());
        sweeper.sweep().await.unwrap();
        let report = sweeper.wait().await.unwrap().unwrap();

        assert_eq!(action.seen().len(), 5);
        assert_eq!(report.executed, 4);
        match report.outcome {
            SweepOutcome::Failed {
                combination,
                params,
                reason,
            } => {
                assert_eq!(combination, 4);
                assert_eq!(params, vec![("power".into(), 1), ("channel".into(), 2)]);
                assert_eq!(reason, "link down");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_excluded_combinations_not_run() {
        let action = Arc::new(Recorder::default());
        let sweeper = sweeper(action.clone());
        let mut ex = ChangeSet::new();
        ex.add_range("channel", 2, Some(2));
        let mut assessor = Assessor::new();
        assessor.exclude(ex);
        sweeper.set_assessor(assessor).unwrap();

        sweeper.sweep().await.unwrap();
        let report = sweeper.wait().await.unwrap().unwrap();
        assert_eq!(report.enumerated, 9);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.executed, 6);
        assert!(action.seen().iter().all(|&(_, channel)| channel != 2));
    }

    #[tokio::test]
    async fn test_try_again_backs_off_and_retries() {
        let action = Arc::new(Recorder {
            busy_first: 2,
            busy_left: AtomicU32::new(2),
            ..Default::default()
        });
        let sweeper = sweeper(action.clone());
        sweeper.sweep().await.unwrap();
        let report = sweeper.wait().await.unwrap().unwrap();

        assert!(report.is_success());
        assert_eq!(report.retries, 18);
        assert_eq!(action.seen().len(), 9);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_sweep() {
        let action = Arc::new(Recorder {
            busy_first: 10,
            busy_left: AtomicU32::new(10),
            ..Default::default()
        });
        let sweeper = Sweeper::new(SweeperConfig {
            max_retries: 3,
            ..Default::default()
        });
        sweeper.set_changeset(grid()).unwrap();
        sweeper.set_action(action.clone()).unwrap();
        sweeper.sweep().await.unwrap();
        let report = sweeper.wait().await.unwrap().unwrap();

        assert_eq!(report.retries, 3);
        assert!(matches!(report.outcome, SweepOutcome::Failed { combination: 0, .. }));
        assert!(action.seen().is_empty());
    }

    #[tokio::test]
    async fn test_new_sweep_drains_running_one() {
        let action = Arc::new(Recorder {
            delay: Some(Duration::from_millis(2)),
            ..Default::default()
        });
        let sweeper = sweeper(action.clone());
        sweeper.sweep().await.unwrap();
        assert!(sweeper.is_busy());
        assert!(matches!(
            sweeper.set_changeset(ChangeSet::new()),
            Err(Error::Busy)
        ));

        sweeper.sweep().await.unwrap();
        let first = sweeper.last_report().unwrap();
        assert!(first.is_success());
        sweeper.wait().await.unwrap().unwrap();

        let seen = action.seen();
        assert_eq!(seen.len(), 18);
        assert_eq!(seen[..9], seen[9..]);
    }

    #[tokio::test]
    async fn test_stop_between_combinations() {
        let action = Arc::new(Recorder {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let sweeper = sweeper(action.clone());
        sweeper.sweep().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        sweeper.stop();
        let report = sweeper.wait().await.unwrap().unwrap();

        assert_eq!(report.outcome, SweepOutcome::Stopped);
        assert!(report.executed >= 1 && report.executed < 9);
        assert_eq!(action.seen().len() as u64, report.executed);
    }

    #[tokio::test]
    async fn test_empty_changeset_rejected() {
        let sweeper = Sweeper::new(SweeperConfig::default());
        sweeper.set_action(Arc::new(Recorder::default())).unwrap();
        assert!(matches!(sweeper.sweep().await, Err(Error::EmptyChangeSet)));
        assert!(!sweeper.is_busy());
        assert!(sweeper.wait().await.unwrap().is_none());
    }
}
