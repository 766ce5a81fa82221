//! Parametrized test-sweep harness for the airlink data plane.
//!
//! Implements:
//! - [`ChangeItem`] / [`ChangeSet`]: odometer enumeration of parameter axes
//! - [`Assessor`]: exclusion of combinations by value ranges
//! - [`Sweeper`]: asynchronous sweep driver with back-off and early stop
//! - [`TransmitAction`]: per-combination link setup and probe transmission
//! - [`TxBench`] / [`RxMonitor`]: transmit and receive sides of a test run
//! - [`LoopbackRadio`]: in-process radio with fault injection
//! - [`PlanConfig`]: TOML sweep plans, run end to end by [`runner::run`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod action;
pub mod assessor;
pub mod bench;
pub mod changeset;
pub mod config;
pub mod error;
pub mod logging;
pub mod loopback;
pub mod monitor;
pub mod probe;
pub mod runner;
pub mod sweeper;
pub mod transmit_action;

pub use action::{Action, ActionOutcome};
pub use assessor::Assessor;
pub use bench::TxBench;
pub use changeset::{ChangeItem, ChangeSet, Snapshot};
pub use config::PlanConfig;
pub use error::{Error, Result};
pub use loopback::{FaultPolicy, LoopbackRadio};
pub use monitor::{PacketSink, RxMonitor};
pub use runner::{Rig, RunSummary};
pub use sweeper::{SweepOutcome, SweepReport, Sweeper, SweeperConfig};
pub use transmit_action::TransmitAction;
