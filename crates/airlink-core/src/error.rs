//! Error types for data-plane operations.

use crate::addr::MacAddr;
use thiserror::Error;

/// Result type alias for data-plane operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Data-plane errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No key installed for the requested slot.
    #[error("No key for {peer} (index {index}, group {group})")]
    KeyNotFound {
        /// Peer address the lookup was made for.
        peer: MacAddr,
        /// Key index requested.
        index: u8,
        /// Whether a group key was requested.
        group: bool,
    },

    /// Key index out of range for the slot kind.
    #[error("Invalid key index {0}")]
    InvalidKeyIndex(u8),

    /// Peer is not associated with the interface.
    #[error("Unknown peer {0}")]
    UnknownPeer(MacAddr),

    /// Peer table is full.
    #[error("Peer limit {0} reached")]
    TooManyPeers(usize),

    /// Transmit key exhausted its packet numbers.
    #[error("Rekey required for {0}")]
    RekeyRequired(MacAddr),

    /// Invalid frame format.
    #[error("Invalid frame format: {0}")]
    InvalidFrame(String),

    /// Insufficient data.
    #[error("Insufficient data: need {0} bytes")]
    InsufficientData(usize),

    /// Channel number with no known frequency.
    #[error("Invalid channel {0}")]
    InvalidChannel(u8),

    /// Invalid address literal.
    #[error("Invalid MAC address: {0}")]
    InvalidAddress(String),

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] airlink_crypto::Error),
}
