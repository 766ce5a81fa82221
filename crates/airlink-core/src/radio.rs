//! Lower radio layer seam.
//!
//! The transmitter hands finished frames to a [`Radio`] together with the
//! link parameters they must go out with; the radio reports back a
//! [`TxStatus`]. Failures are classified into a fixed taxonomy of
//! [`FAIL_REASON_COUNT`] causes so counters can be indexed by cause code.

use crate::addr::MacAddr;
use crate::interface::LinkParams;
use core::fmt;

/// Number of failure cause codes.
pub const FAIL_REASON_COUNT: usize = 16;

/// Link-layer transmit failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FailReason {
    /// Hardware retry limit reached without an ACK.
    RetryExhausted = 0,
    /// No ACK within the response timeout.
    NoAckTimeout = 1,
    /// Transmit queue full; caller may retry later.
    QueueFull = 2,
    /// No key available for a protected destination.
    NoKey = 3,
    /// Transmit key ran out of packet numbers.
    RekeyRequired = 4,
    /// Cipher failed to seal the frame.
    Encryption = 5,
    /// Frame exceeds the maximum MPDU length.
    TooLong = 6,
    /// Destination is not associated.
    NoPeer = 7,
    /// Clear channel assessment never succeeded.
    ChannelBusy = 8,
    /// Frame sat in the queue past its lifetime.
    Lifetime = 9,
    /// Transmission aborted by a channel switch or reset.
    Aborted = 10,
    /// Peer is dozing and the frame was not buffered.
    PowerSave = 11,
    /// Rate or MCS not supported by the radio.
    RateUnsupported = 12,
    /// Dropped by the radio without a specific cause.
    Dropped = 13,
    /// Radio disabled.
    Disabled = 14,
    /// Anything else.
    Other = 15,
}

impl FailReason {
    /// All causes in code order.
    pub const ALL: [FailReason; FAIL_REASON_COUNT] = [
        Self::RetryExhausted,
        Self::NoAckTimeout,
        Self::QueueFull,
        Self::NoKey,
        Self::RekeyRequired,
        Self::Encryption,
        Self::TooLong,
        Self::NoPeer,
        Self::ChannelBusy,
        Self::Lifetime,
        Self::Aborted,
        Self::PowerSave,
        Self::RateUnsupported,
        Self::Dropped,
        Self::Disabled,
        Self::Other,
    ];

    /// Cause code used as the counter index.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Cause from its code.
    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Transient causes worth retrying after a back-off.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::QueueFull | Self::ChannelBusy)
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Delivered and acknowledged.
    Acked,
    /// Sent without requesting an acknowledgement.
    Sent,
    /// Not delivered.
    Failed(FailReason),
}

impl TxStatus {
    /// Frame left the radio.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// A frame ready for the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDescriptor {
    /// Destination (A1).
    pub dest: MacAddr,
    /// Serialized MPDU without FCS.
    pub frame: Vec<u8>,
    /// Channel, bandwidth and MIMO settings for this frame.
    pub params: LinkParams,
    /// Do not wait for an ACK.
    pub no_ack: bool,
}

/// Radio transmit path.
pub trait Radio: Send + Sync {
    /// Submit one frame and report what happened to it.
    fn submit(&self, tx: TxDescriptor) -> TxStatus;
}
