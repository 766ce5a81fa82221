//! AEAD (Authenticated Encryption with Associated Data) primitives.
//!
//! Implements detached-tag seal/open for:
//! - AES-CCM (RFC 3610) backing CCMP-128 and CCMP-256
//! - AES-GCM (NIST SP 800-38D) backing GCMP-128 and GCMP-256
//!
//! The AES block cipher itself comes from the `aes` crate; both modes are
//! built on it. Tag verification is constant time.

use crate::suite::CipherSuite;
use crate::{Error, Result};
use aes::{Aes128, Aes256};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use ccm::consts::{U13, U16, U8};
use ccm::Ccm;
use zeroize::Zeroizing;

type Aes128Ccm8 = Ccm<Aes128, U8, U13>;
type Aes256Ccm16 = Ccm<Aes256, U16, U13>;

/// Largest nonce used by any suite (CCM).
pub const MAX_NONCE_LEN: usize = 13;

/// Packet numbers are 48 bits wide.
pub const PN_MAX: u64 = (1 << 48) - 1;

/// Construct a GCMP nonce: `A2 || PN` with PN in big-endian order.
///
/// # Example
/// ```
/// use airlink_crypto::aead::gcm_nonce;
///
/// let nonce = gcm_nonce(&[0x02, 0, 0, 0, 0, 0x01], 0x0102);
/// assert_eq!(&nonce[..6], &[0x02, 0, 0, 0, 0, 0x01]);
/// assert_eq!(&nonce[6..], &[0, 0, 0, 0, 0x01, 0x02]);
/// ```
pub fn gcm_nonce(transmitter: &[u8; 6], pn: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..6].copy_from_slice(transmitter);
    nonce[6..].copy_from_slice(&pn_bytes(pn));
    nonce
}

/// Construct a CCMP nonce: `flags || A2 || PN`.
///
/// The flags octet carries the QoS priority in its low nibble.
pub fn ccm_nonce(transmitter: &[u8; 6], pn: u64, priority: u8) -> [u8; 13] {
    let mut nonce = [0u8; 13];
    nonce[0] = priority & 0x0f;
    nonce[1..7].copy_from_slice(transmitter);
    nonce[7..].copy_from_slice(&pn_bytes(pn));
    nonce
}

/// Construct the nonce for `suite`, returning the buffer and its used length.
pub fn construct_nonce(
    suite: CipherSuite,
    transmitter: &[u8; 6],
    pn: u64,
    priority: u8,
) -> ([u8; MAX_NONCE_LEN], usize) {
    let mut out = [0u8; MAX_NONCE_LEN];
    match suite.mode() {
        crate::suite::AeadMode::Gcm => {
            out[..12].copy_from_slice(&gcm_nonce(transmitter, pn));
            (out, 12)
        }
        crate::suite::AeadMode::Ccm => (ccm_nonce(transmitter, pn, priority), 13),
    }
}

fn pn_bytes(pn: u64) -> [u8; 6] {
    let be = pn.to_be_bytes();
    [be[2], be[3], be[4], be[5], be[6], be[7]]
}

/// Encrypt `plaintext` under `key`, returning `(ciphertext, mic)`.
///
/// # Errors
/// - `Error::BadKeyLength` if `key` does not fit `suite`
/// - `Error::InvalidLength` if `nonce` does not fit `suite`
pub fn seal(
    suite: CipherSuite,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    check_lengths(suite, key, nonce)?;
    match suite {
        CipherSuite::Ccmp128 => seal_with::<Aes128Ccm8>(key, nonce, aad, plaintext),
        CipherSuite::Ccmp256 => seal_with::<Aes256Ccm16>(key, nonce, aad, plaintext),
        CipherSuite::Gcmp128 => seal_with::<Aes128Gcm>(key, nonce, aad, plaintext),
        CipherSuite::Gcmp256 => seal_with::<Aes256Gcm>(key, nonce, aad, plaintext),
    }
}

/// Verify `mic` and decrypt `ciphertext`.
///
/// The MIC is compared in constant time; on mismatch no plaintext is
/// returned.
///
/// # Errors
/// - `Error::MicMismatch` if authentication fails
/// - `Error::InvalidLength` if `mic` or `nonce` has the wrong length
pub fn open(
    suite: CipherSuite,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    mic: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    check_lengths(suite, key, nonce)?;
    if mic.len() != suite.mic_len() {
        return Err(Error::InvalidLength {
            expected: suite.mic_len(),
            actual: mic.len(),
        });
    }
    match suite {
        CipherSuite::Ccmp128 => open_with::<Aes128Ccm8>(key, nonce, aad, ciphertext, mic),
        CipherSuite::Ccmp256 => open_with::<Aes256Ccm16>(key, nonce, aad, ciphertext, mic),
        CipherSuite::Gcmp128 => open_with::<Aes128Gcm>(key, nonce, aad, ciphertext, mic),
        CipherSuite::Gcmp256 => open_with::<Aes256Gcm>(key, nonce, aad, ciphertext, mic),
    }
}

fn check_lengths(suite: CipherSuite, key: &[u8], nonce: &[u8]) -> Result<()> {
    if key.len() != suite.key_len() {
        return Err(Error::BadKeyLength {
            suite: suite.name(),
            expected: suite.key_len(),
            actual: key.len(),
        });
    }
    if nonce.len() != suite.nonce_len() {
        return Err(Error::InvalidLength {
            expected: suite.nonce_len(),
            actual: nonce.len(),
        });
    }
    Ok(())
}

fn seal_with<A: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher =
        A::new_from_slice(key).map_err(|_| Error::Encryption("cipher init failed".into()))?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buffer)
        .map_err(|_| Error::Encryption("AEAD seal failed".into()))?;

    Ok((buffer, tag.to_vec()))
}

fn open_with<A: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    mic: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = A::new_from_slice(key).map_err(|_| Error::MicMismatch)?;

    // Wrapped before decryption so a rejected buffer is wiped too
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            buffer.as_mut_slice(),
            GenericArray::from_slice(mic),
        )
        .map_err(|_| Error::MicMismatch)?;

    Ok(buffer)
}
