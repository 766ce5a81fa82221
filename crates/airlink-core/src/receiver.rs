//! Receive path.
//!
//! Implements:
//! - Frame classification against the receive filter mask and blacklist
//! - Key resolution for unicast and group data frames
//! - Decryption and replay checking through the installed cipher key
//! - Receive counters
//!
//! Integrity and replay failures are counted and the frame dropped; they
//! never surface as errors, so one bad frame cannot stall the receive loop.

use crate::addr::MacAddr;
use crate::frame::{Frame, FrameType};
use crate::interface::Interface;
use airlink_crypto::Error as CryptoError;
use bitflags::bitflags;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, trace, warn};

bitflags! {
    /// Which frame types the receiver passes up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RxFilter: u8 {
        /// Management frames.
        const ACCEPT_MGMT = 0x01;
        /// Control frames.
        const ACCEPT_CTRL = 0x02;
        /// Data frames.
        const ACCEPT_DATA = 0x04;
        /// Accept frames addressed to other stations.
        const PROMISCUOUS = 0x08;
    }
}

impl Default for RxFilter {
    fn default() -> Self {
        Self::ACCEPT_MGMT | Self::ACCEPT_DATA
    }
}

/// Excluded transmitters and frame kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
    addresses: HashSet<MacAddr>,
    kinds: HashSet<(FrameType, u8)>,
}

impl Blacklist {
    /// Drop everything sent by `addr`.
    pub fn add_address(&mut self, addr: MacAddr) -> bool {
        self.addresses.insert(addr)
    }

    /// Stop dropping frames from `addr`.
    pub fn remove_address(&mut self, addr: &MacAddr) -> bool {
        self.addresses.remove(addr)
    }

    /// Drop every frame of this type and subtype.
    pub fn add_kind(&mut self, frame_type: FrameType, subtype: u8) -> bool {
        self.kinds.insert((frame_type, subtype & 0x0f))
    }

    /// Stop dropping a frame kind.
    pub fn remove_kind(&mut self, frame_type: FrameType, subtype: u8) -> bool {
        self.kinds.remove(&(frame_type, subtype & 0x0f))
    }

    /// Empty the blacklist.
    pub fn clear(&mut self) {
        self.addresses.clear();
        self.kinds.clear();
    }

    fn check(&self, frame: &Frame) -> Option<FilterReason> {
        let fc = frame.header.fc;
        if self.kinds.contains(&(fc.frame_type, fc.subtype)) {
            return Some(FilterReason::BlacklistedKind);
        }
        if self.addresses.contains(&frame.header.addr2) {
            return Some(FilterReason::BlacklistedAddress);
        }
        None
    }
}

/// Why a frame was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// Frame type disabled in the filter mask.
    TypeMasked,
    /// Addressed to another station.
    NotForUs,
    /// Transmitter is blacklisted.
    BlacklistedAddress,
    /// Frame kind is blacklisted.
    BlacklistedKind,
}

/// Classification of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Data addressed to this station.
    UnicastData,
    /// Data addressed to a group.
    GroupData,
    /// Management frame.
    Management,
    /// Control frame.
    Control,
    /// Not passed up.
    Filtered(FilterReason),
}

/// Why an accepted frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Could not be parsed.
    Malformed,
    /// No key installed for the frame.
    NoKey,
    /// Integrity check failed.
    MicFailure,
    /// Packet number already seen.
    Replay,
    /// Unprotected data where protection is expected.
    Unprotected,
}

/// Decapsulated data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    /// Transmitter address.
    pub source: MacAddr,
    /// Receiver address.
    pub dest: MacAddr,
    /// Key index and packet number when the frame was protected.
    pub protection: Option<(u8, u64)>,
    /// Traffic identifier.
    pub priority: u8,
    /// Plaintext body.
    pub payload: Vec<u8>,
}

/// Result of handing one frame to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxOutcome {
    /// Data delivered upward.
    Data(RxPacket),
    /// Management frame passed through.
    Management(Frame),
    /// Control frame passed through.
    Control(Frame),
    /// Filtered out before any processing.
    Filtered(FilterReason),
    /// Accepted but dropped.
    Dropped(DropReason),
}

/// Receive counters.
#[derive(Debug, Default)]
pub struct RxStats {
    frames: AtomicU64,
    delivered: AtomicU64,
    filtered: AtomicU64,
    malformed: AtomicU64,
    no_key: AtomicU64,
    mic_errors: AtomicU64,
    replays: AtomicU64,
    unprotected: AtomicU64,
}

/// Point-in-time copy of [`RxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStatsSnapshot {
    /// Frames handed to the receiver.
    pub frames: u64,
    /// Frames passed upward.
    pub delivered: u64,
    /// Frames filtered by mask or blacklist.
    pub filtered: u64,
    /// Unparseable frames.
    pub malformed: u64,
    /// Protected frames with no matching key.
    pub no_key: u64,
    /// Integrity failures.
    pub mic_errors: u64,
    /// Replayed packet numbers.
    pub replays: u64,
    /// Unprotected data rejected.
    pub unprotected: u64,
}

impl RxStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters.
    pub fn snapshot(&self) -> RxStatsSnapshot {
        RxStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            no_key: self.no_key.load(Ordering::Relaxed),
            mic_errors: self.mic_errors.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            unprotected: self.unprotected.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters.
    pub fn reset(&self) {
        for counter in [
            &self.frames,
            &self.delivered,
            &self.filtered,
            &self.malformed,
            &self.no_key,
            &self.mic_errors,
            &self.replays,
            &self.unprotected,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Per-interface receiver.
#[derive(Debug)]
pub struct Receiver {
    iface: Interface,
    filter: AtomicU8,
    blacklist: RwLock<Blacklist>,
    stats: RxStats,
}

impl Receiver {
    pub(crate) fn new(iface: Interface, filter: RxFilter) -> Self {
        Self {
            iface,
            filter: AtomicU8::new(filter.bits()),
            blacklist: RwLock::new(Blacklist::default()),
            stats: RxStats::default(),
        }
    }

    /// Current filter mask.
    pub fn filter(&self) -> RxFilter {
        RxFilter::from_bits_truncate(self.filter.load(Ordering::Relaxed))
    }

    /// Replace the filter mask.
    pub fn set_filter(&self, filter: RxFilter) {
        self.filter.store(filter.bits(), Ordering::Relaxed);
    }

    /// Edit the blacklist.
    pub fn update_blacklist<F: FnOnce(&mut Blacklist)>(&self, f: F) {
        f(&mut self.blacklist.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Counters.
    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    /// Classify a parsed frame.
    pub fn classify(&self, frame: &Frame) -> FrameClass {
        let filter = self.filter();
        let header = &frame.header;

        let (wanted, class) = match header.fc.frame_type {
            FrameType::Management => (RxFilter::ACCEPT_MGMT, FrameClass::Management),
            FrameType::Control => (RxFilter::ACCEPT_CTRL, FrameClass::Control),
            FrameType::Data if header.addr1.is_group() => {
                (RxFilter::ACCEPT_DATA, FrameClass::GroupData)
            }
            FrameType::Data => (RxFilter::ACCEPT_DATA, FrameClass::UnicastData),
            FrameType::Extension => return FrameClass::Filtered(FilterReason::TypeMasked),
        };
        if !filter.contains(wanted) {
            return FrameClass::Filtered(FilterReason::TypeMasked);
        }

        if let Some(reason) = self
            .blacklist
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .check(frame)
        {
            return FrameClass::Filtered(reason);
        }

        let for_us = header.addr1 == self.iface.address() || header.addr1.is_group();
        if !for_us && !filter.contains(RxFilter::PROMISCUOUS) {
            return FrameClass::Filtered(FilterReason::NotForUs);
        }
        class
    }

    /// Process one frame from the air.
    pub fn receive(&self, bytes: &[u8]) -> RxOutcome {
        RxStats::bump(&self.stats.frames);
        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(error = %e, len = bytes.len(), "Malformed frame");
                return self.drop_frame(DropReason::Malformed);
            }
        };

        match self.classify(&frame) {
            FrameClass::Filtered(reason) => {
                RxStats::bump(&self.stats.filtered);
                trace!(?reason, from = %frame.header.addr2, "Frame filtered");
                RxOutcome::Filtered(reason)
            }
            FrameClass::Management => {
                RxStats::bump(&self.stats.delivered);
                RxOutcome::Management(frame)
            }
            FrameClass::Control => {
                RxStats::bump(&self.stats.delivered);
                RxOutcome::Control(frame)
            }
            FrameClass::UnicastData => self.receive_data(frame, false),
            FrameClass::GroupData => self.receive_data(frame, true),
        }
    }

    fn receive_data(&self, frame: Frame, group: bool) -> RxOutcome {
        let header = &frame.header;
        let source = header.addr2;
        let priority = header.priority();

        if !header.is_protected() {
            let keys = self.iface.keys();
            let keyed = if group {
                keys.group_count() > 0
            } else {
                keys.pairwise(&source).is_some()
            };
            if keyed || self.iface.config().require_protection {
                debug!(from = %source, "Unprotected data frame rejected");
                return self.drop_frame(DropReason::Unprotected);
            }
            RxStats::bump(&self.stats.delivered);
            return RxOutcome::Data(RxPacket {
                source,
                dest: header.addr1,
                protection: None,
                priority,
                payload: frame.body,
            });
        }

        let security = match frame.security_header() {
            Ok(security) => security,
            Err(_) => return self.drop_frame(DropReason::Malformed),
        };

        // Held for the whole decrypt; a concurrent key replace cannot zero it.
        let key = match self.iface.keys().key_lookup(source, security.key_id, group) {
            Ok(key) => key,
            Err(_) => {
                debug!(from = %source, key_id = security.key_id, group, "No key for frame");
                return self.drop_frame(DropReason::NoKey);
            }
        };

        let body = match frame.protected_body(key.suite().mic_len()) {
            Ok(body) => body,
            Err(_) => return self.drop_frame(DropReason::Malformed),
        };

        let aad = header.aad();
        match key.decrypt(
            source.octets(),
            priority,
            body.security.pn,
            body.ciphertext,
            &aad,
            body.mic,
        ) {
            Ok(mut plaintext) => {
                RxStats::bump(&self.stats.delivered);
                trace!(from = %source, pn = body.security.pn, len = plaintext.len(), "Data frame decrypted");
                RxOutcome::Data(RxPacket {
                    source,
                    dest: header.addr1,
                    protection: Some((key.index(), body.security.pn)),
                    priority,
                    payload: std::mem::take(&mut *plaintext),
                })
            }
            Err(CryptoError::Replay { pn, last }) => {
                debug!(from = %source, pn, last, "Replayed frame dropped");
                self.drop_frame(DropReason::Replay)
            }
            Err(e) => {
                warn!(from = %source, pn = body.security.pn, error = %e, "Frame failed integrity check");
                self.drop_frame(DropReason::MicFailure)
            }
        }
    }

    fn drop_frame(&self, reason: DropReason) -> RxOutcome {
        let counter = match reason {
            DropReason::Malformed => &self.stats.malformed,
            DropReason::NoKey => &self.stats.no_key,
            DropReason::MicFailure => &self.stats.mic_errors,
            DropReason::Replay => &self.stats.replays,
            DropReason::Unprotected => &self.stats.unprotected,
        };
        RxStats::bump(counter);
        RxOutcome::Dropped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FcFlags, FrameControl, MacHeader, SecurityHeader};
    use crate::interface::InterfaceConfig;
    use airlink_crypto::{CipherKey, CipherSuite};

    const LOCAL: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const PEER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);
    const KEY: [u8; 16] = [0x5a; 16];

    fn iface() -> Interface {
        Interface::new(InterfaceConfig {
            address: LOCAL,
            ..Default::default()
        })
    }

    fn sealed_frame(sender: &CipherKey, dest: MacAddr, payload: &[u8]) -> Vec<u8> {
        let mut frame = Frame {
            header: MacHeader::data(dest, PEER, PEER, 1),
            body: Vec::new(),
        };
        frame.header.fc.flags.insert(FcFlags::PROTECTED);
        let sealed = sender
            .encrypt(PEER.octets(), 0, payload, &frame.header.aad())
            .unwrap();
        frame.seal_body(
            SecurityHeader {
                pn: sealed.pn,
                key_id: sender.index(),
            },
            &sealed.ciphertext,
            &sealed.mic,
        );
        frame.serialize()
    }

    #[test]
    fn test_classify() {
        let rx = iface().receiver(RxFilter::default());
        let data = Frame {
            header: MacHeader::data(LOCAL, PEER, PEER, 0),
            body: vec![],
        };
        assert_eq!(rx.classify(&data), FrameClass::UnicastData);

        let mut group = data.clone();
        group.header.addr1 = MacAddr::BROADCAST;
        assert_eq!(rx.classify(&group), FrameClass::GroupData);

        let mut other = data.clone();
        other.header.addr1 = MacAddr::new([0x02, 9, 9, 9, 9, 9]);
        assert_eq!(rx.classify(&other), FrameClass::Filtered(FilterReason::NotForUs));
        rx.set_filter(RxFilter::default() | RxFilter::PROMISCUOUS);
        assert_eq!(rx.classify(&other), FrameClass::UnicastData);

        let mut ctrl = data.clone();
        ctrl.header.fc = FrameControl::from_u16(0x00d4);
        assert_eq!(rx.classify(&ctrl), FrameClass::Filtered(FilterReason::TypeMasked));
    }

    #[test]
    fn test_blacklist() {
        let rx = iface().receiver(RxFilter::default());
        let data = Frame {
            header: MacHeader::data(LOCAL, PEER, PEER, 0),
            body: vec![],
        };
        rx.update_blacklist(|b| {
            b.add_address(PEER);
        });
        assert_eq!(
            rx.classify(&data),
            FrameClass::Filtered(FilterReason::BlacklistedAddress)
        );
        rx.update_blacklist(|b| {
            b.clear();
            b.add_kind(FrameType::Data, 0);
        });
        assert_eq!(
            rx.classify(&data),
            FrameClass::Filtered(FilterReason::BlacklistedKind)
        );
    }

    #[test]
    fn test_decrypt_and_deliver() {
        let iface = iface();
        iface
            .keys()
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &KEY)
            .unwrap();
        let rx = iface.receiver(RxFilter::default());
        let sender = CipherKey::install(CipherSuite::Ccmp128, &KEY, 0, false).unwrap();

        match rx.receive(&sealed_frame(&sender, LOCAL, b"hello")) {
            RxOutcome::Data(packet) => {
                assert_eq!(packet.payload, b"hello");
                assert_eq!(packet.source, PEER);
                assert_eq!(packet.protection, Some((0, 1)));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(rx.stats().snapshot().delivered, 1);
    }

    #[test]
    fn test_mic_failure_counted_not_fatal() {
        let iface = iface();
        iface
            .keys()
            .key_set(PEER, 0, false, CipherSuite::Gcmp128, &KEY)
            .unwrap();
        let rx = iface.receiver(RxFilter::default());
        let sender = CipherKey::install(CipherSuite::Gcmp128, &[0x11; 16], 0, false).unwrap();

        let frame = sealed_frame(&sender, LOCAL, b"bad");
        assert_eq!(rx.receive(&frame), RxOutcome::Dropped(DropReason::MicFailure));
        assert_eq!(rx.receive(&frame), RxOutcome::Dropped(DropReason::MicFailure));

        let good = CipherKey::install(CipherSuite::Gcmp128, &KEY, 0, false).unwrap();
        assert!(matches!(
            rx.receive(&sealed_frame(&good, LOCAL, b"ok")),
            RxOutcome::Data(_)
        ));
        let stats = rx.stats().snapshot();
        assert_eq!(stats.mic_errors, 2);
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn test_replay_dropped() {
        let iface = iface();
        iface
            .keys()
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &KEY)
            .unwrap();
        let rx = iface.receiver(RxFilter::default());
        let sender = CipherKey::install(CipherSuite::Ccmp128, &KEY, 0, false).unwrap();

        let frame = sealed_frame(&sender, LOCAL, b"once");
        assert!(matches!(rx.receive(&frame), RxOutcome::Data(_)));
        assert_eq!(rx.receive(&frame), RxOutcome::Dropped(DropReason::Replay));
    }

    #[test]
    fn test_group_frame_uses_group_key() {
        let iface = iface();
        iface
            .keys()
            .key_set(PEER, 1, true, CipherSuite::Gcmp256, &[0x33; 32])
            .unwrap();
        let rx = iface.receiver(RxFilter::default());
        let sender = CipherKey::install(CipherSuite::Gcmp256, &[0x33; 32], 1, true).unwrap();

        let outcome = rx.receive(&sealed_frame(&sender, MacAddr::BROADCAST, b"all"));
        assert!(matches!(outcome, RxOutcome::Data(ref p) if p.payload == b"all"));
    }

    #[test]
    fn test_missing_key_and_unprotected() {
        let iface = iface();
        let rx = iface.receiver(RxFilter::default());
        let sender = CipherKey::install(CipherSuite::Ccmp128, &KEY, 0, false).unwrap();
        assert_eq!(
            rx.receive(&sealed_frame(&sender, LOCAL, b"x")),
            RxOutcome::Dropped(DropReason::NoKey)
        );

        let plain = Frame {
            header: MacHeader::data(LOCAL, PEER, PEER, 0),
            body: b"plain".to_vec(),
        }
        .serialize();
        assert!(matches!(rx.receive(&plain), RxOutcome::Data(_)));

        iface
            .keys()
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &KEY)
            .unwrap();
        assert_eq!(rx.receive(&plain), RxOutcome::Dropped(DropReason::Unprotected));
        assert_eq!(rx.receive(&[0u8; 3]), RxOutcome::Dropped(DropReason::Malformed));
    }
}
