//! Error types for session operations.

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Session errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Session is not active.
    #[error("Session not active")]
    InvalidState,

    /// Previous message not yet consumed.
    #[error("Receive buffer busy")]
    Busy,

    /// Message or fragment exceeds a buffer limit.
    #[error("Length {len} exceeds limit {max}")]
    Length {
        /// Offending length.
        len: usize,
        /// Limit in force.
        max: usize,
    },

    /// No session or buffer could be allocated.
    #[error("Allocation failed: {0}")]
    Alloc(String),

    /// Fragment offset does not continue the message being reassembled.
    #[error("Fragment offset {actual} does not match expected {expected}")]
    InvalidOffset {
        /// Bytes reassembled so far.
        expected: usize,
        /// Offset carried by the fragment.
        actual: usize,
    },

    /// Lower layer refused the operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No connection with this handle.
    #[error("Unknown connection {0}")]
    UnknownConnection(u16),
}

/// Status codes handed back across the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Success.
    Ok = 0,
    /// Unspecified failure.
    Err = 1,
    /// Session not active.
    InvalidState = 2,
    /// Receiver busy, retry later.
    Busy = 3,
    /// Length out of range.
    Length = 4,
    /// Out of resources.
    Alloc = 5,
    /// Fragment offset mismatch.
    InvalidOffset = 6,
}

impl ErrorCode {
    /// Convert from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Err),
            2 => Some(Self::InvalidState),
            3 => Some(Self::Busy),
            4 => Some(Self::Length),
            5 => Some(Self::Alloc),
            6 => Some(Self::InvalidOffset),
            _ => None,
        }
    }

    /// Convert to u8.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Code for the outcome of an operation.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => e.code(),
        }
    }
}

impl Error {
    /// Status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidState => ErrorCode::InvalidState,
            Self::Busy => ErrorCode::Busy,
            Self::Length { .. } => ErrorCode::Length,
            Self::Alloc(_) => ErrorCode::Alloc,
            Self::InvalidOffset { .. } => ErrorCode::InvalidOffset,
            Self::Transport(_) | Self::UnknownConnection(_) => ErrorCode::Err,
        }
    }
}
