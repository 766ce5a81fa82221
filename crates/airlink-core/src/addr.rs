//! IEEE 802 MAC addresses.

use crate::{Error, Result};
use core::fmt;
use core::str::FromStr;

/// A 48-bit MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The broadcast address `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// The all-zero address.
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Build an address from raw octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Read an address from the first six bytes of `data`.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let octets: [u8; 6] = data
            .get(..6)
            .and_then(|s| s.try_into().ok())
            .ok_or(Error::InsufficientData(6))?;
        Ok(Self(octets))
    }

    /// Raw octets.
    pub fn octets(&self) -> &[u8; 6] {
        &self.0
    }

    /// Group (multicast or broadcast) address: I/G bit set.
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
            if part.len() != 2 {
                return Err(Error::InvalidAddress(s.to_string()));
            }
            *octet =
                u8::from_str_radix(part, 16).map_err(|_| Error::InvalidAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(Error::InvalidAddress(s.to_string()));
        }
        Ok(Self(octets))
    }
}
