//! Error types for the sweep harness.

use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Harness errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A sweep is running; the change set cannot be touched.
    #[error("Sweep in progress")]
    Busy,

    /// No sweep is running.
    #[error("No sweep running")]
    NotRunning,

    /// The change set has no items to sweep.
    #[error("Change set is empty")]
    EmptyChangeSet,

    /// The worker did not drain in time after a stop request.
    #[error("Sweep did not stop within {0:?}")]
    StopTimeout(std::time::Duration),

    /// The sweep worker task died.
    #[error("Sweep worker failed: {0}")]
    Worker(String),

    /// Malformed probe payload.
    #[error("Invalid probe: {0}")]
    InvalidProbe(String),

    /// Plan file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data-plane error.
    #[error("Data plane error: {0}")]
    Core(#[from] airlink_core::Error),

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] airlink_crypto::Error),
}
