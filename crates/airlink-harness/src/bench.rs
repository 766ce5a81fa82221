//! Transmit bench: change set, assessor, transmit action and sweeper.
//!
//! Implements:
//! - Change-set editing, refused while a sweep runs
//! - `start(repeat)`: reset counters and launch the sweep
//! - `stop()`: end the current combination early and drain the worker

use crate::assessor::Assessor;
use crate::changeset::ChangeSet;
use crate::sweeper::{SweepReport, Sweeper, SweeperConfig};
use crate::transmit_action::TransmitAction;
use crate::{Error, Result};
use airlink_core::transmitter::TxStatsSnapshot;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

/// How long `stop` waits for the worker to drain.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transmit side of a parameter sweep.
pub struct TxBench {
    changeset: Mutex<ChangeSet>,
    assessor: Mutex<Assessor>,
    action: Arc<TransmitAction>,
    sweeper: Sweeper,
    stop_timeout: Duration,
}

impl core::fmt::Debug for TxBench {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxBench")
            .field("action", &self.action)
            .field("sweeper", &self.sweeper)
            .finish_non_exhaustive()
    }
}

impl TxBench {
    /// Bench driving `action`.
    pub fn new(action: Arc<TransmitAction>, config: SweeperConfig) -> Self {
        let sweeper = Sweeper::new(config).with_action(action.clone());
        Self {
            changeset: Mutex::new(ChangeSet::new()),
            assessor: Mutex::new(Assessor::new()),
            action,
            sweeper,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Override how long `stop` waits.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The transmit action.
    pub fn action(&self) -> &Arc<TransmitAction> {
        &self.action
    }

    /// Whether a sweep is running.
    pub fn is_busy(&self) -> bool {
        self.sweeper.is_busy()
    }

    fn idle(&self) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Add a swept axis.
    pub fn add_item(&self, name: &str, start: i32, end: i32, step: i32) -> Result<()> {
        self.idle()?;
        lock(&self.changeset).add(name, start, end, step);
        Ok(())
    }

    /// Remove every axis.
    pub fn clear_items(&self) -> Result<()> {
        self.idle()?;
        lock(&self.changeset).clear();
        Ok(())
    }

    /// Rewind every axis to its start.
    pub fn init_items(&self) -> Result<()> {
        self.idle()?;
        lock(&self.changeset).init();
        Ok(())
    }

    /// Replace the change set.
    pub fn set_changeset(&self, changeset: ChangeSet) -> Result<()> {
        self.idle()?;
        *lock(&self.changeset) = changeset;
        Ok(())
    }

    /// Add an excluded range group.
    pub fn exclude(&self, ranges: ChangeSet) -> Result<()> {
        self.idle()?;
        lock(&self.assessor).exclude(ranges);
        Ok(())
    }

    /// Replace the assessor.
    pub fn set_assessor(&self, assessor: Assessor) -> Result<()> {
        self.idle()?;
        *lock(&self.assessor) = assessor;
        Ok(())
    }

    /// Copy of the configured change set.
    pub fn changeset(&self) -> ChangeSet {
        lock(&self.changeset).clone()
    }

    /// Append an XXH64 checksum to every probe.
    pub fn set_checksum(&self, enable: bool) {
        self.action.set_checksum(enable);
    }

    /// Transmit counters.
    pub fn stats(&self) -> TxStatsSnapshot {
        self.action.stats()
    }

    /// Reset counters and launch a sweep sending `repeat` probes per
    /// combination.
    ///
    /// # Errors
    /// - `Error::Busy` if a sweep is running
    /// - `Error::EmptyChangeSet` if no axis is configured
    pub async fn start(&self, repeat: u32) -> Result<()> {
        self.idle()?;
        let changeset = self.changeset();
        if changeset.is_empty() {
            return Err(Error::EmptyChangeSet);
        }
        let assessor = lock(&self.assessor).clone();
        info!(
            repeat,
            combinations = changeset.combinations(),
            exclusions = assessor.len(),
            "Starting transmit sweep"
        );

        self.action.set_repeat(repeat);
        self.action.clear_stats();
        self.sweeper.set_changeset(changeset)?;
        self.sweeper.set_assessor(assessor)?;
        self.sweeper.sweep().await
    }

    /// Cut the current combination short and end the sweep after it,
    /// without waiting.
    pub fn request_stop(&self) {
        self.action.set_repeat(0);
        self.sweeper.stop();
    }

    /// Stop the running sweep and wait for it to drain.
    ///
    /// # Errors
    /// - `Error::NotRunning` if no sweep is running
    /// - `Error::StopTimeout` if the worker does not drain in time
    pub async fn stop(&self) -> Result<SweepReport> {
        if !self.is_busy() {
            return Err(Error::NotRunning);
        }
        self.request_stop();
        match tokio::time::timeout(self.stop_timeout, self.sweeper.wait()).await {
            Ok(report) => report?.ok_or(Error::NotRunning),
            Err(_) => Err(Error::StopTimeout(self.stop_timeout)),
        }
    }

    /// Wait for the sweep to finish.
    pub async fn wait(&self) -> Result<Option<SweepReport>> {
        self.sweeper.wait().await
    }

    /// Report of the most recently collected sweep.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.sweeper.last_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweeper::SweepOutcome;
    use airlink_core::{
        FailReason, Interface, InterfaceConfig, MacAddr, Radio, TxDescriptor, TxStatus,
    };
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    const TX: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const RX: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);

    /// Reports a full queue until opened.
    #[derive(Default)]
    struct Gate {
        closed: AtomicBool,
        frames: AtomicU64,
    }

    impl Radio for Gate {
        fn submit(&self, _tx: TxDescriptor) -> TxStatus {
            if self.closed.load(Ordering::Relaxed) {
                return TxStatus::Failed(FailReason::QueueFull);
            }
            self.frames.fetch_add(1, Ordering::Relaxed);
            TxStatus::Acked
        }
    }

    fn bench(radio: Arc<Gate>) -> TxBench {
        let iface = Interface::new(InterfaceConfig {
            address: TX,
            ..Default::default()
        });
        iface.associate(RX).unwrap();
        let action = Arc::new(TransmitAction::new(iface, radio, RX));
        TxBench::new(
            action,
            SweeperConfig {
                backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                max_retries: u32::MAX,
            },
        )
    }

    #[tokio::test]
    async fn test_full_sweep() {
        let radio = Arc::new(Gate::default());
        let bench = bench(radio.clone());
        bench.add_item("power", 0, 2, 1).unwrap();
        bench.add_item("mcs", 0, 2, 1).unwrap();

        bench.start(3).await.unwrap();
        let report = bench.wait().await.unwrap().unwrap();
        assert!(report.is_success());
        assert_eq!(report.executed, 9);
        assert_eq!(radio.frames.load(Ordering::Relaxed), 27);

        let stats = bench.stats();
        assert_eq!(stats.sent, 27);
        assert_eq!(stats.acked, 27);
        assert_eq!(stats.total_failures(), 0);
    }

    #[tokio::test]
    async fn test_start_resets_stats() {
        let radio = Arc::new(Gate::default());
        let bench = bench(radio);
        bench.add_item("power", 0, 1, 1).unwrap();

        bench.start(2).await.unwrap();
        bench.wait().await.unwrap();
        bench.start(1).await.unwrap();
        bench.wait().await.unwrap();
        assert_eq!(bench.stats().sent, 2);
    }

    #[tokio::test]
    async fn test_edits_refused_while_busy() {
        let radio = Arc::new(Gate::default());
        radio.closed.store(true, Ordering::Relaxed);
        let bench = bench(radio.clone());
        bench.add_item("power", 0, 3, 1).unwrap();

        bench.start(4).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bench.is_busy());
        assert!(matches!(bench.add_item("mcs", 0, 1, 1), Err(Error::Busy)));
        assert!(matches!(bench.clear_items(), Err(Error::Busy)));
        assert!(matches!(bench.init_items(), Err(Error::Busy)));
        assert!(matches!(bench.exclude(ChangeSet::new()), Err(Error::Busy)));
        assert!(matches!(bench.start(1).await, Err(Error::Busy)));

        let report = bench.stop().await.unwrap();
        assert_eq!(report.outcome, SweepOutcome::Stopped);
        assert!(report.retries > 0);
        assert!(!bench.is_busy());
        assert_eq!(radio.frames.load(Ordering::Relaxed), 0);

        bench.add_item("mcs", 0, 1, 1).unwrap();
        assert_eq!(bench.changeset().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let bench = bench(Arc::new(Gate::default()));
        assert!(matches!(bench.stop().await, Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn test_start_without_items() {
        let bench = bench(Arc::new(Gate::default()));
        assert!(matches!(bench.start(1).await, Err(Error::EmptyChangeSet)));
    }

    #[tokio::test]
    async fn test_exclusions_skip_combinations() {
        let radio = Arc::new(Gate::default());
        let bench = bench(radio.clone());
        bench.add_item("power", 0, 2, 1).unwrap();
        let mut excluded = ChangeSet::new();
        excluded.add_range("power", 1, None);
        bench.exclude(excluded).unwrap();

        bench.start(1).await.unwrap();
        let report = bench.wait().await.unwrap().unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(radio.frames.load(Ordering::Relaxed), 1);
    }
}
