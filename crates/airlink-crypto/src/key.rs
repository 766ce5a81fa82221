//! Installed cipher keys.
//!
//! A [`CipherKey`] bundles the key material with its suite, key index,
//! group flag and the per-direction packet number state. Keys are shared
//! between the key table and in-flight operations through `Arc`; the
//! material is zeroed when the last handle is dropped, so a key that is
//! replaced while a decrypt is running is never observed half-wiped.

use crate::aead::{self, PN_MAX};
use crate::suite::CipherSuite;
use crate::{Error, Result};
use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use zeroize::Zeroizing;

/// Output of [`CipherKey::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Packet number consumed by this frame.
    pub pn: u64,
    /// Encrypted body.
    pub ciphertext: Vec<u8>,
    /// Message integrity code.
    pub mic: Vec<u8>,
}

/// A key installed for one pairwise link or for group traffic.
pub struct CipherKey {
    suite: CipherSuite,
    index: u8,
    group: bool,
    no_ack: AtomicBool,
    material: Zeroizing<Vec<u8>>,
    /// Next packet number to issue on transmit.
    tx_pn: AtomicU64,
    /// Highest packet number accepted on receive; `u64::MAX` until the first frame.
    rx_pn: AtomicU64,
}

const RX_PN_NONE: u64 = u64::MAX;

impl CipherKey {
    /// Install a key, validating its length against `suite`.
    ///
    /// # Errors
    /// Returns `Error::BadKeyLength` if `key` does not match the suite.
    pub fn install(suite: CipherSuite, key: &[u8], index: u8, group: bool) -> Result<Self> {
        if key.len() != suite.key_len() {
            return Err(Error::BadKeyLength {
                suite: suite.name(),
                expected: suite.key_len(),
                actual: key.len(),
            });
        }
        Ok(Self {
            suite,
            index,
            group,
            no_ack: AtomicBool::new(false),
            material: Zeroizing::new(key.to_vec()),
            tx_pn: AtomicU64::new(1),
            rx_pn: AtomicU64::new(RX_PN_NONE),
        })
    }

    /// Install a key from a raw suite selector.
    ///
    /// # Errors
    /// Returns `Error::UnsupportedCipher` for unknown selectors.
    pub fn install_raw(suite_id: u8, key: &[u8], index: u8, group: bool) -> Result<Self> {
        let suite = CipherSuite::from_u8(suite_id).ok_or(Error::UnsupportedCipher(suite_id))?;
        Self::install(suite, key, index, group)
    }

    /// Cipher suite.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Key index (key id carried in the security header).
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Whether this is a group key.
    pub fn is_group(&self) -> bool {
        self.group
    }

    /// Whether frames under this key are sent without requesting an ACK.
    pub fn no_ack(&self) -> bool {
        self.no_ack.load(Ordering::Relaxed)
    }

    /// Set the no-ack flag.
    pub fn set_no_ack(&self, no_ack: bool) {
        self.no_ack.store(no_ack, Ordering::Relaxed);
    }

    /// Set the transmit packet number; used when restoring a key with a known sequence.
    pub fn set_tx_pn(&self, pn: u64) {
        self.tx_pn.store(pn.min(PN_MAX + 1), Ordering::SeqCst);
    }

    /// Whether every transmit packet number has been used.
    pub fn is_exhausted(&self) -> bool {
        self.tx_pn.load(Ordering::SeqCst) > PN_MAX
    }

    /// Highest packet number accepted so far, if any.
    pub fn last_rx_pn(&self) -> Option<u64> {
        match self.rx_pn.load(Ordering::Acquire) {
            RX_PN_NONE => None,
            pn => Some(pn),
        }
    }

    /// Reserve the next transmit packet number.
    ///
    /// Every call returns a distinct value, so nonces are never reused
    /// under this key.
    ///
    /// # Errors
    /// Returns `Error::CounterExhausted` once the 48-bit space is used up.
    pub fn next_pn(&self) -> Result<u64> {
        self.tx_pn
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pn| {
                (pn <= PN_MAX).then_some(pn + 1)
            })
            .map_err(|_| Error::CounterExhausted)
    }

    /// Encrypt a frame body.
    ///
    /// Consumes one packet number; `transmitter` is the frame's A2 and
    /// `priority` its TID (CCM only).
    pub fn encrypt(
        &self,
        transmitter: &[u8; 6],
        priority: u8,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Sealed> {
        let pn = self.next_pn()?;
        let (nonce, len) = aead::construct_nonce(self.suite, transmitter, pn, priority);
        let (ciphertext, mic) = aead::seal(self.suite, &self.material, &nonce[..len], aad, plaintext)?;
        Ok(Sealed {
            pn,
            ciphertext,
            mic,
        })
    }

    /// Verify and decrypt a frame body carrying packet number `pn`.
    ///
    /// The replay window is consulted before decryption and advanced only
    /// after the MIC has verified.
    ///
    /// # Errors
    /// - `Error::Replay` if `pn` is not above the last accepted value
    /// - `Error::MicMismatch` if authentication fails
    pub fn decrypt(
        &self,
        transmitter: &[u8; 6],
        priority: u8,
        pn: u64,
        ciphertext: &[u8],
        aad: &[u8],
        mic: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if let Some(last) = self.last_rx_pn() {
            if pn <= last {
                return Err(Error::Replay { pn, last });
            }
        }

        let (nonce, len) = aead::construct_nonce(self.suite, transmitter, pn, priority);
        let plaintext = aead::open(self.suite, &self.material, &nonce[..len], aad, ciphertext, mic)?;

        self.accept_pn(pn)?;
        Ok(plaintext)
    }

    fn accept_pn(&self, pn: u64) -> Result<()> {
        self.rx_pn
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (last == RX_PN_NONE || pn > last).then_some(pn)
            })
            .map(|_| ())
            .map_err(|last| Error::Replay { pn, last })
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKey")
            .field("suite", &self.suite)
            .field("index", &self.index)
            .field("group", &self.group)
            .field("tx_pn", &self.tx_pn.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TA: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];

    fn key(suite: CipherSuite) -> CipherKey {
        CipherKey::install(suite, &vec![0x42; suite.key_len()], 0, false).unwrap()
    }

    #[test]
    fn test_install_rejects_bad_length() {
        let err = CipherKey::install(CipherSuite::Ccmp128, &[0u8; 32], 0, false).unwrap_err();
        assert!(matches!(err, Error::BadKeyLength { expected: 16, actual: 32, .. }));
    }

    #[test]
    fn test_install_raw_unknown_suite() {
        let err = CipherKey::install_raw(2, &[0u8; 16], 1, true).unwrap_err();
        assert_eq!(err, Error::UnsupportedCipher(2));
    }

    #[test]
    fn test_pn_monotonic() {
        let k = key(CipherSuite::Gcmp128);
        let a = k.encrypt(&TA, 0, b"one", b"").unwrap();
        let b = k.encrypt(&TA, 0, b"two", b"").unwrap();
        assert_eq!(a.pn, 1);
        assert_eq!(b.pn, 2);
    }

    #[test]
    fn test_counter_exhaustion() {
        let k = key(CipherSuite::Gcmp256);
        k.set_tx_pn(PN_MAX);
        assert!(!k.is_exhausted());
        assert_eq!(k.next_pn().unwrap(), PN_MAX);
        assert!(k.is_exhausted());
        assert_eq!(k.next_pn().unwrap_err(), Error::CounterExhausted);
        assert_eq!(
            k.encrypt(&TA, 0, b"x", b"").unwrap_err(),
            Error::CounterExhausted
        );
    }

    #[test]
    fn test_replay_rejected() {
        let tx = key(CipherSuite::Ccmp128);
        let rx = key(CipherSuite::Ccmp128);
        let sealed = tx.encrypt(&TA, 0, b"frame", b"aad").unwrap();

        rx.decrypt(&TA, 0, sealed.pn, &sealed.ciphertext, b"aad", &sealed.mic)
            .unwrap();
        let err = rx
            .decrypt(&TA, 0, sealed.pn, &sealed.ciphertext, b"aad", &sealed.mic)
            .unwrap_err();
        assert_eq!(err, Error::Replay { pn: 1, last: 1 });
    }

    #[test]
    fn test_failed_mic_does_not_advance_window() {
        let tx = key(CipherSuite::Gcmp128);
        let rx = key(CipherSuite::Gcmp128);
        let sealed = tx.encrypt(&TA, 0, b"frame", b"").unwrap();

        let mut bad = sealed.mic.clone();
        bad[0] ^= 1;
        assert_eq!(
            rx.decrypt(&TA, 0, sealed.pn, &sealed.ciphertext, b"", &bad)
                .unwrap_err(),
            Error::MicMismatch
        );
        assert_eq!(rx.last_rx_pn(), None);

        rx.decrypt(&TA, 0, sealed.pn, &sealed.ciphertext, b"", &sealed.mic)
            .unwrap();
        assert_eq!(rx.last_rx_pn(), Some(sealed.pn));
    }

    #[test]
    fn test_debug_hides_material() {
        let k = key(CipherSuite::Gcmp128);
        let shown = format!("{k:?}");
        assert!(!shown.contains("66")); // 0x42 as decimal
        assert!(shown.contains("Gcmp128"));
    }

    fn suite_strategy() -> impl Strategy<Value = CipherSuite> {
        prop::sample::select(CipherSuite::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_encrypt_decrypt_roundtrip(
            suite in suite_strategy(),
            material in prop::collection::vec(any::<u8>(), 32),
            plaintext in prop::collection::vec(any::<u8>(), 0..512),
            aad in prop::collection::vec(any::<u8>(), 0..32),
            priority in 0u8..16,
        ) {
            let material = &material[..suite.key_len()];
            let tx = CipherKey::install(suite, material, 0, false).unwrap();
            let rx = CipherKey::install(suite, material, 0, false).unwrap();

            let sealed = tx.encrypt(&TA, priority, &plaintext, &aad).unwrap();
            let opened = rx
                .decrypt(&TA, priority, sealed.pn, &sealed.ciphertext, &aad, &sealed.mic)
                .unwrap();
            prop_assert_eq!(&*opened, &plaintext);
        }

        #[test]
        fn prop_any_tag_bit_flip_fails(
            suite in suite_strategy(),
            plaintext in prop::collection::vec(any::<u8>(), 0..128),
            bit in 0usize..128,
        ) {
            let tx = key(suite);
            let rx = key(suite);
            let sealed = tx.encrypt(&TA, 0, &plaintext, b"hdr").unwrap();

            let mut mic = sealed.mic.clone();
            let bit = bit % (mic.len() * 8);
            mic[bit / 8] ^= 1 << (bit % 8);

            let result = rx.decrypt(&TA, 0, sealed.pn, &sealed.ciphertext, b"hdr", &mic);
            prop_assert_eq!(result.unwrap_err(), Error::MicMismatch);
        }
    }
}
