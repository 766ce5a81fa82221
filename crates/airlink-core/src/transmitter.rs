//! Transmit path.
//!
//! Implements:
//! - Key selection (pairwise for unicast, group transmit key for group destinations)
//! - Encapsulation and encryption of outbound payloads
//! - Tagging with the destination's link parameters and submission to the radio
//! - Sent / acked counters and per-cause failure counters

use crate::addr::MacAddr;
use crate::frame::{FcFlags, Frame, FrameControl, MacHeader, SecurityHeader};
use crate::interface::Interface;
use crate::radio::{FailReason, Radio, TxDescriptor, TxStatus, FAIL_REASON_COUNT};
use airlink_crypto::Error as CryptoError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Largest MSDU accepted for transmission.
pub const MAX_MSDU_LEN: usize = 2304;

/// Transmit counters.
#[derive(Debug, Default)]
pub struct TxStats {
    sent: AtomicU64,
    acked: AtomicU64,
    fail_reason: [AtomicU64; FAIL_REASON_COUNT],
}

/// Point-in-time copy of [`TxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStatsSnapshot {
    /// Frames handed to the radio.
    pub sent: u64,
    /// Frames acknowledged by the peer.
    pub acked: u64,
    /// Failures indexed by [`FailReason`] code.
    pub fail_reason: [u64; FAIL_REASON_COUNT],
}

impl TxStatsSnapshot {
    /// Failures for one cause.
    pub fn failures(&self, reason: FailReason) -> u64 {
        self.fail_reason[reason.to_u8() as usize]
    }

    /// Failures across all causes.
    pub fn total_failures(&self) -> u64 {
        self.fail_reason.iter().sum()
    }
}

impl TxStats {
    /// Snapshot all counters.
    pub fn snapshot(&self) -> TxStatsSnapshot {
        let mut fail_reason = [0u64; FAIL_REASON_COUNT];
        for (out, counter) in fail_reason.iter_mut().zip(&self.fail_reason) {
            *out = counter.load(Ordering::Relaxed);
        }
        TxStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            fail_reason,
        }
    }

    /// Zero all counters.
    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.acked.store(0, Ordering::Relaxed);
        for counter in &self.fail_reason {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn record(&self, status: TxStatus) {
        match status {
            TxStatus::Acked => {
                self.acked.fetch_add(1, Ordering::Relaxed);
            }
            TxStatus::Sent => {}
            TxStatus::Failed(reason) => {
                self.fail_reason[reason.to_u8() as usize].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Per-interface transmitter.
pub struct Transmitter {
    iface: Interface,
    radio: Arc<dyn Radio>,
    stats: TxStats,
}

impl core::fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transmitter")
            .field("iface", &self.iface)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Transmitter {
    pub(crate) fn new(iface: Interface, radio: Arc<dyn Radio>) -> Self {
        Self {
            iface,
            radio,
            stats: TxStats::default(),
        }
    }

    /// Counters.
    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    /// Send `payload` to `dest` as a best-effort data frame.
    pub fn transmit(&self, dest: MacAddr, payload: &[u8]) -> TxStatus {
        self.send(dest, None, payload)
    }

    /// Send `payload` to `dest` as a QoS data frame with traffic id `tid`.
    pub fn transmit_qos(&self, dest: MacAddr, tid: u8, payload: &[u8]) -> TxStatus {
        self.send(dest, Some(tid & 0x0f), payload)
    }

    fn send(&self, dest: MacAddr, tid: Option<u8>, payload: &[u8]) -> TxStatus {
        let status = match self.build(dest, tid, payload) {
            Ok(tx) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                self.radio.submit(tx)
            }
            Err(reason) => TxStatus::Failed(reason),
        };
        if let TxStatus::Failed(reason) = status {
            trace!(dest = %dest, %reason, "Transmit failed");
        }
        self.stats.record(status);
        status
    }

    fn build(
        &self,
        dest: MacAddr,
        tid: Option<u8>,
        payload: &[u8],
    ) -> core::result::Result<TxDescriptor, FailReason> {
        if payload.len() > MAX_MSDU_LEN {
            return Err(FailReason::TooLong);
        }

        let local = self.iface.address();
        let (params, key) = if dest.is_group() {
            (self.iface.params(), self.iface.keys().group_tx_key())
        } else {
            let session = self.iface.peer(&dest).map_err(|_| FailReason::NoPeer)?;
            let key = session.tx_key().map_err(|e| {
                warn!(dest = %dest, "{e}");
                FailReason::RekeyRequired
            })?;
            (session.params(), key)
        };

        let mut header = MacHeader::data(dest, local, local, self.iface.next_seq());
        if let Some(tid) = tid {
            header.fc.subtype = FrameControl::SUBTYPE_QOS_DATA;
            header.qos = Some(tid as u16);
        }
        let priority = header.priority();
        let mut frame = Frame {
            header,
            body: Vec::new(),
        };

        let no_ack = match key {
            Some(key) => {
                frame.header.fc.flags.insert(FcFlags::PROTECTED);
                let sealed = key
                    .encrypt(local.octets(), priority, payload, &frame.header.aad())
                    .map_err(|e| match e {
                        CryptoError::CounterExhausted => {
                            warn!(dest = %dest, key_index = key.index(), "Transmit key exhausted, rekey required");
                            FailReason::RekeyRequired
                        }
                        _ => FailReason::Encryption,
                    })?;
                frame.seal_body(
                    SecurityHeader {
                        pn: sealed.pn,
                        key_id: key.index(),
                    },
                    &sealed.ciphertext,
                    &sealed.mic,
                );
                key.no_ack()
            }
            None if self.iface.config().require_protection => return Err(FailReason::NoKey),
            None => {
                frame.body = payload.to_vec();
                false
            }
        };

        Ok(TxDescriptor {
            dest,
            frame: frame.serialize(),
            params,
            no_ack: no_ack || dest.is_group(),
        })
    }
}
