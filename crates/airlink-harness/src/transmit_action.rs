//! Sweep action that transmits probe frames.
//!
//! Each combination applies its link parameters to the interface, then
//! sends `repeat` probes to the destination. Recognised axes:
//!
//! | axis                   | effect                                  |
//! |------------------------|-----------------------------------------|
//! | `channel`              | primary channel (frequency)             |
//! | `bandwidth`            | operating bandwidth in MHz              |
//! | `streams`              | spatial streams (MIMO mode)             |
//! | `mcs`                  | modulation and coding scheme            |
//! | `power`                | transmit power in dBm                   |
//! | `length`               | total probe payload length              |
//! | `tid`                  | QoS traffic id; unset sends non-QoS     |
//!
//! Other axes are carried in the change set but ignored here.

use crate::action::{Action, ActionOutcome};
use crate::changeset::ChangeSet;
use crate::probe::{Probe, CHECKSUM_LEN, HEADER_LEN};
use airlink_core::interface::{channel_to_frequency, Bandwidth, MimoMode};
use airlink_core::transmitter::TxStatsSnapshot;
use airlink_core::{FailReason, Interface, MacAddr, Radio, Transmitter, TxStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Default probe payload length.
pub const DEFAULT_PAYLOAD_LEN: usize = 64;

/// Per-combination transmit settings derived from the change set.
struct Setup {
    length: usize,
    tid: Option<u8>,
}

/// Transmits `repeat` probes per combination.
pub struct TransmitAction {
    iface: Interface,
    transmitter: Transmitter,
    dest: MacAddr,
    repeat: AtomicU32,
    checksum: AtomicBool,
    payload_len: AtomicUsize,
    /// Combination index and next repetition to send after a `TryAgain`.
    cursor: Mutex<Option<(u64, u32)>>,
}

impl core::fmt::Debug for TransmitAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransmitAction")
            .field("dest", &self.dest)
            .field("repeat", &self.repeat())
            .field("checksum", &self.is_checksum_enabled())
            .finish_non_exhaustive()
    }
}

impl TransmitAction {
    /// Action sending from `iface` to `dest` through `radio`.
    pub fn new(iface: Interface, radio: Arc<dyn Radio>, dest: MacAddr) -> Self {
        let transmitter = iface.transmitter(radio);
        Self {
            iface,
            transmitter,
            dest,
            repeat: AtomicU32::new(1),
            checksum: AtomicBool::new(false),
            payload_len: AtomicUsize::new(DEFAULT_PAYLOAD_LEN),
            cursor: Mutex::new(None),
        }
    }

    /// Probes per combination. Zero ends the current combination early.
    pub fn set_repeat(&self, repeat: u32) {
        self.repeat.store(repeat, Ordering::Release);
    }

    /// Probes per combination.
    pub fn repeat(&self) -> u32 {
        self.repeat.load(Ordering::Acquire)
    }

    /// Append an XXH64 checksum to every probe.
    pub fn set_checksum(&self, enable: bool) {
        self.checksum.store(enable, Ordering::Relaxed);
    }

    /// Whether probes carry a checksum.
    pub fn is_checksum_enabled(&self) -> bool {
        self.checksum.load(Ordering::Relaxed)
    }

    /// Probe length used when the change set has no `length` axis.
    pub fn set_payload_len(&self, len: usize) {
        self.payload_len.store(len, Ordering::Relaxed);
    }

    /// Transmit counters.
    pub fn stats(&self) -> TxStatsSnapshot {
        self.transmitter.stats().snapshot()
    }

    /// Zero the counters and forget any interrupted combination.
    pub fn clear_stats(&self) {
        self.transmitter.stats().reset();
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn configure(&self, cs: &ChangeSet) -> Result<Setup, String> {
        fn narrow<T: TryFrom<i32>>(name: &str, value: i32) -> Result<T, String> {
            T::try_from(value).map_err(|_| format!("{name} {value} out of range"))
        }

        let mut params = self.iface.params();
        let mut setup = Setup {
            length: self.payload_len.load(Ordering::Relaxed),
            tid: None,
        };
        for item in cs.items() {
            let value = item.current();
            match item.name() {
                "channel" => {
                    let channel: u8 = narrow("channel", value)?;
                    params.frequency_mhz = channel_to_frequency(channel)
                        .ok_or_else(|| format!("no frequency for channel {channel}"))?;
                }
                "bandwidth" => {
                    params.bandwidth = Bandwidth::from_mhz(narrow("bandwidth", value)?)
                        .ok_or_else(|| format!("unsupported bandwidth {value} MHz"))?;
                }
                "streams" => params.mimo = MimoMode::from_streams(narrow("streams", value)?),
                "mcs" => params.mcs = narrow("mcs", value)?,
                "power" => params.tx_power_dbm = narrow("power", value)?,
                "length" => setup.length = narrow("length", value)?,
                "tid" => setup.tid = Some(narrow::<u8>("tid", value)? & 0x0f),
                _ => {}
            }
        }
        if params != self.iface.params() {
            debug!(?params, "Switching link parameters");
            self.iface.switch_channel(params);
        }
        Ok(setup)
    }

    fn resume_point(&self, combination: u64) -> u32 {
        match *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) {
            Some((index, next)) if index == combination => next,
            _ => 0,
        }
    }

    fn save_cursor(&self, cursor: Option<(u64, u32)>) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = cursor;
    }
}

#[async_trait]
impl Action for TransmitAction {
    async fn act(&self, cs: &ChangeSet) -> ActionOutcome {
        let combination = cs.curidx();
        let setup = match self.configure(cs) {
            Ok(setup) => setup,
            Err(reason) => return ActionOutcome::Failed(reason),
        };
        let checksum = self.is_checksum_enabled();
        let trailer = if checksum { CHECKSUM_LEN } else { 0 };
        let filler = setup.length.saturating_sub(HEADER_LEN + trailer);

        let mut next = self.resume_point(combination);
        // Re-read each time: a stop request lowers the repeat count.
        while next < self.repeat() {
            let payload = Probe {
                combination,
                repeat: next,
            }
            .encode(filler, checksum);
            let status = match setup.tid {
                Some(tid) => self.transmitter.transmit_qos(self.dest, tid, &payload),
                None => self.transmitter.transmit(self.dest, &payload),
            };
            match status {
                TxStatus::Acked | TxStatus::Sent => {}
                TxStatus::Failed(reason) if reason.is_transient() => {
                    trace!(combination, repeat = next, %reason, "Transmit deferred");
                    self.save_cursor(Some((combination, next)));
                    return ActionOutcome::TryAgain;
                }
                // Lost on air: counted, not fatal.
                TxStatus::Failed(
                    FailReason::RetryExhausted
                    | FailReason::NoAckTimeout
                    | FailReason::Lifetime
                    | FailReason::Dropped,
                ) => {}
                TxStatus::Failed(reason) => {
                    self.save_cursor(None);
                    return ActionOutcome::Failed(format!(
                        "transmit to {} failed: {reason}",
                        self.dest
                    ));
                }
            }
            next += 1;
        }
        self.save_cursor(None);
        ActionOutcome::Done
    }
}
