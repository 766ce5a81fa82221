//! In-process radio joining a transmitter to a receiver.
//!
//! Frames submitted on one interface are handed straight to a peer
//! [`Receiver`]; decapsulated data goes to a [`PacketSink`]. A
//! deterministic fault policy injects queue-full back-pressure and
//! over-the-air loss so retry and miss accounting can be exercised
//! without hardware.

use crate::monitor::PacketSink;
use airlink_core::{FailReason, Radio, Receiver, RxOutcome, TxDescriptor, TxStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Deterministic fault injection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPolicy {
    /// Refuse every n-th submission with `QueueFull`.
    pub queue_full_every: Option<u64>,
    /// Lose every n-th frame on air.
    pub drop_every: Option<u64>,
}

fn hits(every: Option<u64>, n: u64) -> bool {
    every.is_some_and(|every| every != 0 && n % every == 0)
}

/// Loopback radio counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Submissions seen.
    pub submitted: u64,
    /// Submissions refused as queue-full.
    pub refused: u64,
    /// Frames lost on air.
    pub lost: u64,
    /// Frames the receiver passed upward.
    pub delivered: u64,
    /// Frames the receiver dropped or filtered.
    pub rejected: u64,
}

/// Radio that loops frames into a local receiver.
pub struct LoopbackRadio {
    receiver: Receiver,
    sink: Option<Arc<dyn PacketSink>>,
    faults: FaultPolicy,
    submitted: AtomicU64,
    accepted: AtomicU64,
    refused: AtomicU64,
    lost: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
}

impl core::fmt::Debug for LoopbackRadio {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoopbackRadio")
            .field("faults", &self.faults)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl LoopbackRadio {
    /// Loop frames into `receiver`, handing data to `sink`.
    pub fn new(receiver: Receiver, sink: Option<Arc<dyn PacketSink>>, faults: FaultPolicy) -> Self {
        Self {
            receiver,
            sink,
            faults,
            submitted: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// The receiving end.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Counters.
    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Radio for LoopbackRadio {
    fn submit(&self, tx: TxDescriptor) -> TxStatus {
        let n = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        if hits(self.faults.queue_full_every, n) {
            self.refused.fetch_add(1, Ordering::Relaxed);
            return TxStatus::Failed(FailReason::QueueFull);
        }

        // Loss is counted over frames that made it into the queue.
        let queued = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        let no_ack_status = if tx.no_ack {
            TxStatus::Sent
        } else {
            TxStatus::Failed(FailReason::NoAckTimeout)
        };
        if hits(self.faults.drop_every, queued) {
            self.lost.fetch_add(1, Ordering::Relaxed);
            trace!(dest = %tx.dest, "Frame lost on air");
            return no_ack_status;
        }

        match self.receiver.receive(&tx.frame) {
            RxOutcome::Data(packet) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                if let Some(sink) = &self.sink {
                    sink.deliver(&packet);
                }
                if tx.no_ack {
                    TxStatus::Sent
                } else {
                    TxStatus::Acked
                }
            }
            RxOutcome::Management(_) | RxOutcome::Control(_) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                if tx.no_ack {
                    TxStatus::Sent
                } else {
                    TxStatus::Acked
                }
            }
            outcome => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                trace!(?outcome, "Frame rejected by receiver");
                no_ack_status
            }
        }
    }
}
