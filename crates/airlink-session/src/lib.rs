//! Generic session framing for the airlink control plane.
//!
//! This crate implements the message layer that sits above a byte-oriented
//! link (a BLE characteristic, a socket):
//! - [`GenericSession`]: lifecycle, defragmentation and MTU-bounded transmit
//! - [`SessionTransport`]: the lower-layer hooks a session calls into
//! - [`SessionHandler`]: the higher-layer protocol that owns sessions
//! - [`Mailbox`]: a per-connection mailbox service feeding sessions
//! - [`LocalControl`]: a bounded-table handler with one inbox per session

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod local_control;
pub mod mailbox;
pub mod session;

pub use error::{Error, ErrorCode, Result};
pub use local_control::LocalControl;
pub use mailbox::Mailbox;
pub use session::{
    Delivery, FragmentMode, GenericSession, SessionConfig, SessionHandler, SessionState,
    SessionTransport, SharedSession,
};
