//! Probe payloads carried by sweep traffic.
//!
//! Wire format (little-endian):
//! ```text
//! magic "AP" (2) | flags (1) | combination (8) | repeat (4) | filler (n) | xxh64 (8, optional)
//! ```
//! Flag bit 0 marks a trailing XXH64 checksum over everything before it.
//! The filler is a deterministic byte ramp so corruption anywhere in the
//! payload changes the checksum.

use crate::{Error, Result};
use core::hash::Hasher;
use twox_hash::XxHash64;

/// Probe magic.
pub const MAGIC: [u8; 2] = *b"AP";

/// Fixed header length.
pub const HEADER_LEN: usize = 15;

/// Checksum trailer length.
pub const CHECKSUM_LEN: usize = 8;

const FLAG_CHECKSUM: u8 = 0x01;

/// Identity of one transmitted probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Probe {
    /// Combination index in the transmitter's change set.
    pub combination: u64,
    /// Repetition within the combination.
    pub repeat: u32,
}

/// Checksum verdict of a decoded probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// Sent without a checksum.
    Absent,
    /// Checksum verified.
    Valid,
    /// Checksum mismatch.
    Invalid,
}

fn xxh64(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

impl Probe {
    /// Encode with `filler` bytes of padding.
    pub fn encode(&self, filler: usize, checksum: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + filler + CHECKSUM_LEN);
        out.extend_from_slice(&MAGIC);
        out.push(if checksum { FLAG_CHECKSUM } else { 0 });
        out.extend_from_slice(&self.combination.to_le_bytes());
        out.extend_from_slice(&self.repeat.to_le_bytes());
        let seed = self.combination as u8 ^ self.repeat as u8;
        out.extend((0..filler).map(|i| seed.wrapping_add(i as u8)));
        if checksum {
            let sum = xxh64(&out);
            out.extend_from_slice(&sum.to_le_bytes());
        }
        out
    }

    /// Decode a probe and check its trailer.
    pub fn decode(data: &[u8]) -> Result<(Probe, Checksum)> {
        if data.len() < HEADER_LEN {
            return Err(Error::InvalidProbe(format!("{} bytes", data.len())));
        }
        if data[..2] != MAGIC {
            return Err(Error::InvalidProbe("bad magic".into()));
        }
        let flags = data[2];
        let mut combination = [0u8; 8];
        combination.copy_from_slice(&data[3..11]);
        let mut repeat = [0u8; 4];
        repeat.copy_from_slice(&data[11..15]);
        let probe = Probe {
            combination: u64::from_le_bytes(combination),
            repeat: u32::from_le_bytes(repeat),
        };

        if flags & FLAG_CHECKSUM == 0 {
            return Ok((probe, Checksum::Absent));
        }
        let Some(split) = data.len().checked_sub(CHECKSUM_LEN).filter(|&s| s >= HEADER_LEN) else {
            return Ok((probe, Checksum::Invalid));
        };
        let mut trailer = [0u8; CHECKSUM_LEN];
        trailer.copy_from_slice(&data[split..]);
        let verdict = if xxh64(&data[..split]) == u64::from_le_bytes(trailer) {
            Checksum::Valid
        } else {
            Checksum::Invalid
        };
        Ok((probe, verdict))
    }
}
