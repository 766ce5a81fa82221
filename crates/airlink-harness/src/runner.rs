//! End-to-end sweep over a loopback link.
//!
//! A [`Rig`] builds two interfaces from a [`PlanConfig`], keys them,
//! joins them with a [`LoopbackRadio`] and mirrors the plan into an
//! [`RxMonitor`] so every probe the bench sends is scored on arrival.

use crate::bench::TxBench;
use crate::changeset::Snapshot;
use crate::config::PlanConfig;
use crate::loopback::{LoopbackRadio, LoopbackStats};
use crate::monitor::{PacketSink, RxMonitor};
use crate::sweeper::SweepReport;
use crate::transmit_action::TransmitAction;
use crate::{Error, Result};
use airlink_core::transmitter::TxStatsSnapshot;
use airlink_core::{Interface, InterfaceConfig, RxFilter};
use std::sync::Arc;
use tracing::{info, warn};

/// Missed probes listed in a summary.
pub const MAX_REPORTED_MISSES: usize = 16;

/// Outcome of a loopback run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Sweeper report.
    pub report: SweepReport,
    /// Transmit counters.
    pub tx: TxStatsSnapshot,
    /// Loopback radio counters.
    pub radio: LoopbackStats,
    /// Probes the monitor expected.
    pub expected: u64,
    /// Probes scored.
    pub received: u64,
    /// Probes never scored.
    pub missed: u64,
    /// Probes with a bad checksum.
    pub errors: u64,
    /// Payloads that were not expected probes.
    pub unexpected: u64,
    /// Parameters of the first missed probes.
    pub missed_params: Vec<Snapshot>,
}

impl RunSummary {
    /// Sweep completed and every expected probe arrived intact.
    pub fn is_clean(&self) -> bool {
        self.report.is_success() && self.missed == 0 && self.errors == 0 && self.unexpected == 0
    }
}

/// Transmitter, receiver and monitor joined by a loopback radio.
#[derive(Debug)]
pub struct Rig {
    bench: TxBench,
    monitor: Arc<RxMonitor>,
    radio: Arc<LoopbackRadio>,
    repeat: u32,
}

impl Rig {
    /// Build the rig described by `plan`.
    pub fn build(plan: &PlanConfig) -> Result<Self> {
        let tx_addr = plan.link.transmitter()?;
        let rx_addr = plan.link.receiver()?;
        let params = plan.link.params()?;
        let endpoint = |address| {
            Interface::new(InterfaceConfig {
                address,
                params,
                require_protection: plan.link.require_protection,
                ..Default::default()
            })
        };
        let tx_iface = endpoint(tx_addr);
        let rx_iface = endpoint(rx_addr);
        tx_iface.associate(rx_addr)?;
        rx_iface.associate(tx_addr)?;
        if let Some((suite, key)) = plan.link.cipher()? {
            tx_iface.keys().key_set(rx_addr, 0, false, suite, &key)?;
            rx_iface.keys().key_set(tx_addr, 0, false, suite, &key)?;
        }

        let monitor = Arc::new(RxMonitor::new());
        monitor.set_changeset(plan.changeset())?;
        monitor.set_assessor(plan.assessor())?;
        monitor.set_checksum(plan.checksum);

        let sink: Arc<dyn PacketSink> = monitor.clone();
        let radio = Arc::new(LoopbackRadio::new(
            rx_iface.receiver(RxFilter::ACCEPT_DATA),
            Some(sink),
            plan.fault_policy(),
        ));

        let action = Arc::new(TransmitAction::new(tx_iface, radio.clone(), rx_addr));
        action.set_checksum(plan.checksum);
        action.set_payload_len(plan.payload_len);

        let bench =
            TxBench::new(action, plan.sweeper_config()).with_stop_timeout(plan.stop_timeout());
        bench.set_changeset(plan.changeset())?;
        bench.set_assessor(plan.assessor())?;

        info!(
            transmitter = %tx_addr,
            receiver = %rx_addr,
            frequency_mhz = params.frequency_mhz,
            encrypted = plan.link.suite.is_some(),
            "Loopback rig ready"
        );
        Ok(Self {
            bench,
            monitor,
            radio,
            repeat: plan.repeat,
        })
    }

    /// The transmit bench.
    pub fn bench(&self) -> &TxBench {
        &self.bench
    }

    /// The receive monitor.
    pub fn monitor(&self) -> &RxMonitor {
        &self.monitor
    }

    /// The loopback radio.
    pub fn radio(&self) -> &LoopbackRadio {
        &self.radio
    }

    /// Arm the monitor and start the sweep.
    pub async fn start(&self) -> Result<()> {
        self.monitor.start(self.repeat)?;
        if let Err(e) = self.bench.start(self.repeat).await {
            self.monitor.stop();
            return Err(e);
        }
        Ok(())
    }

    /// Ask the sweep to stop; [`Rig::finish`] still collects the result.
    pub fn request_stop(&self) {
        self.bench.request_stop();
    }

    /// Wait for the sweep and gather the results.
    pub async fn finish(&self) -> Result<RunSummary> {
        let report = self.bench.wait().await?.ok_or(Error::NotRunning)?;
        self.monitor.stop();

        let missed = self.monitor.missed();
        let missed_params = (0..missed.min(MAX_REPORTED_MISSES as u64))
            .filter_map(|index| self.monitor.query(false, index))
            .collect();
        let summary = RunSummary {
            report,
            tx: self.bench.stats(),
            radio: self.radio.stats(),
            expected: self.monitor.expected_total(),
            received: self.monitor.received(),
            missed,
            errors: self.monitor.errors(),
            unexpected: self.monitor.unexpected(),
            missed_params,
        };
        if summary.missed > 0 {
            warn!(missed = summary.missed, expected = summary.expected, "Probes missing");
        }
        info!(
            sent = summary.tx.sent,
            acked = summary.tx.acked,
            received = summary.received,
            missed = summary.missed,
            errors = summary.errors,
            "Run finished"
        );
        Ok(summary)
    }
}

/// Run `plan` to completion over a loopback link.
pub async fn run(plan: &PlanConfig) -> Result<RunSummary> {
    let rig = Rig::build(plan)?;
    rig.start().await?;
    rig.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweeper::SweepOutcome;

    const OPEN: &str = r#"
repeat = 2

[[items]]
name = "power"
start = 0
end = 2

[[items]]
name = "mcs"
start = 0
end = 1
"#;

    #[tokio::test]
    async fn test_clean_open_run() {
        let plan = PlanConfig::parse(OPEN).unwrap();
        let summary = run(&plan).await.unwrap();
        assert!(summary.is_clean(), "{summary:?}");
        assert_eq!(summary.expected, 12);
        assert_eq!(summary.received, 12);
        assert_eq!(summary.tx.sent, 12);
        assert_eq!(summary.tx.acked, 12);
        assert!(summary.missed_params.is_empty());
    }

    #[tokio::test]
    async fn test_losses_are_reported() {
        let plan = PlanConfig::parse(&format!("{OPEN}\n[faults]\ndrop_every = 4\n")).unwrap();
        let summary = run(&plan).await.unwrap();
        assert!(summary.report.is_success());
        assert!(!summary.is_clean());
        assert_eq!(summary.radio.lost, 3);
        assert_eq!(summary.missed, 3);
        assert_eq!(summary.received, 9);
        assert_eq!(summary.missed_params.len(), 3);
        // Frames 4, 8 and 12 are lost: combination 1, 3 and 5, second repetition.
        assert_eq!(
            summary.missed_params[0],
            vec![("power".to_string(), 1), ("mcs".to_string(), 0)]
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_busy() {
        let plan = PlanConfig::parse(
            "repeat = 1000\n[[items]]\nname = \"power\"\nstart = 0\nend = 20\n",
        )
        .unwrap();
        let rig = Rig::build(&plan).unwrap();
        rig.start().await.unwrap();
        assert!(matches!(rig.bench().start(1).await, Err(Error::Busy)));
        rig.request_stop();
        let summary = rig.finish().await.unwrap();
        assert_eq!(summary.report.outcome, SweepOutcome::Stopped);
        assert!(!rig.monitor().is_running());
    }
}
