//! Keyed cipher engine for 802.11 data frame protection.
//!
//! This crate implements the per-key cryptographic layer used by the
//! airlink data plane:
//! - Cipher suites (CCMP-128, CCMP-256, GCMP-128, GCMP-256)
//! - AEAD seal/open with detached MIC (AES-CCM, AES-GCM)
//! - Per-key 48-bit packet number counters and nonce construction
//! - Receive replay detection
//!
//! Security requirements:
//! - Key material is held in `Zeroizing` buffers and wiped on last release
//! - MIC comparison is constant time (delegated to the RustCrypto AEADs)
//! - Key material is never logged or formatted

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod key;
pub mod suite;

pub use error::{Error, Result};
pub use key::{CipherKey, Sealed};
pub use suite::CipherSuite;
