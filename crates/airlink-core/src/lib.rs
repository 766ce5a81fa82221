//! Data-plane engine for the airlink 802.11 MAC.
//!
//! This crate implements the per-interface packet pipeline:
//! - 802.11 MAC header and CCMP/GCMP header parsing and serialization
//! - Session key table with per-peer locking and deferred key release
//! - Receiver: frame classification, key lookup, decryption, counters
//! - Transmitter: key selection, encryption, link tagging, failure taxonomy
//! - Interface context owning keys, link parameters and peer sessions
//!
//! Radio I/O is abstracted behind the [`radio::Radio`] trait.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod addr;
pub mod error;
pub mod frame;
pub mod interface;
pub mod keytable;
pub mod radio;
pub mod receiver;
pub mod transmitter;

pub use addr::MacAddr;
pub use error::{Error, Result};
pub use frame::Frame;
pub use interface::{Interface, InterfaceConfig, LinkParams, PeerSession};
pub use keytable::KeyTable;
pub use radio::{FailReason, Radio, TxDescriptor, TxStatus};
pub use receiver::{Receiver, RxFilter, RxOutcome, RxPacket};
pub use transmitter::Transmitter;
