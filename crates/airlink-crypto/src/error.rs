//! Error types for cryptographic operations.

use thiserror::Error;

/// Result type alias for cryptographic operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Cryptographic operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Cipher suite identifier is not supported.
    #[error("Unsupported cipher suite: {0}")]
    UnsupportedCipher(u8),

    /// Key length does not match the cipher suite.
    #[error("Bad key length for {suite}: expected {expected}, got {actual}")]
    BadKeyLength {
        /// Suite the key was installed for.
        suite: &'static str,
        /// Expected length in bytes.
        expected: usize,
        /// Actual length received in bytes.
        actual: usize,
    },

    /// Invalid input length (nonce, tag).
    #[error("Invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length received in bytes.
        actual: usize,
    },

    /// MIC verification failed.
    #[error("MIC mismatch")]
    MicMismatch,

    /// Packet number replayed or out of order.
    #[error("Replayed packet number {pn} (last accepted {last})")]
    Replay {
        /// Packet number carried by the frame.
        pn: u64,
        /// Highest packet number accepted so far.
        last: u64,
    },

    /// Transmit packet number space exhausted; the key must be replaced.
    #[error("Packet number space exhausted, rekey required")]
    CounterExhausted,

    /// AEAD encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),
}
