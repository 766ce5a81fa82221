//! Receive-side scoreboard for sweep traffic.
//!
//! The monitor mirrors the transmitter's change set and assessor so it
//! knows which probes to expect: `repeat` probes for every combination
//! the assessor passes. Each expected probe owns one bit, indexed by
//! `ordinal * repeat + repetition` where `ordinal` counts assessed
//! combinations in enumeration order.

use crate::assessor::Assessor;
use crate::changeset::{ChangeSet, Snapshot};
use crate::probe::{Checksum, Probe};
use crate::{Error, Result};
use airlink_core::RxPacket;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// Consumer of decapsulated packets.
pub trait PacketSink: Send + Sync {
    /// One packet passed the receiver.
    fn deliver(&self, packet: &RxPacket);
}

struct Scoreboard {
    repeat: u32,
    /// Transmitter combination index to assessed ordinal.
    slots: HashMap<u64, u64>,
    /// Parameters of each assessed combination, by ordinal.
    combos: Vec<Snapshot>,
    bits: Vec<u64>,
    total: u64,
}

impl Scoreboard {
    fn build(cs: &mut ChangeSet, assessor: &Assessor, repeat: u32) -> Self {
        let mut slots = HashMap::new();
        let mut combos = Vec::new();
        let mut more = cs.init();
        while more {
            if assessor.assess(cs) {
                slots.insert(cs.curidx(), combos.len() as u64);
                combos.push(cs.snapshot());
            }
            more = cs.iter();
        }
        let total = combos.len() as u64 * u64::from(repeat);
        Self {
            repeat,
            slots,
            combos,
            bits: vec![0; total.div_ceil(64) as usize],
            total,
        }
    }

    fn is_set(&self, bit: u64) -> bool {
        self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0
    }

    /// Set the bit for `probe`; false if it is not expected.
    fn mark(&mut self, probe: Probe) -> bool {
        let Some(&ordinal) = self.slots.get(&probe.combination) else {
            return false;
        };
        if probe.repeat >= self.repeat {
            return false;
        }
        let bit = ordinal * u64::from(self.repeat) + u64::from(probe.repeat);
        self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        true
    }

    fn count(&self, ok: bool) -> u64 {
        (0..self.total).filter(|&bit| self.is_set(bit) == ok).count() as u64
    }

    /// Bit position of the `index`-th probe in state `ok`.
    fn nth(&self, ok: bool, index: u64) -> Option<u64> {
        (0..self.total)
            .filter(|&bit| self.is_set(bit) == ok)
            .nth(usize::try_from(index).ok()?)
    }
}

/// Receive monitor with probe scoreboard.
pub struct RxMonitor {
    changeset: Mutex<ChangeSet>,
    assessor: Mutex<Assessor>,
    checksum: AtomicBool,
    running: AtomicBool,
    board: Mutex<Option<Scoreboard>>,
    checksum_errors: AtomicU64,
    unexpected: AtomicU64,
}

impl core::fmt::Debug for RxMonitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RxMonitor")
            .field("running", &self.is_running())
            .field("received", &self.received())
            .field("missed", &self.missed())
            .field("errors", &self.errors())
            .finish_non_exhaustive()
    }
}

impl Default for RxMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RxMonitor {
    /// Idle monitor with no axes.
    pub fn new() -> Self {
        Self {
            changeset: Mutex::new(ChangeSet::new()),
            assessor: Mutex::new(Assessor::new()),
            checksum: AtomicBool::new(false),
            running: AtomicBool::new(false),
            board: Mutex::new(None),
            checksum_errors: AtomicU64::new(0),
            unexpected: AtomicU64::new(0),
        }
    }

    fn idle(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Append an axis to the mirrored change set.
    pub fn add_item(&self, name: &str, start: i32, end: i32, step: i32) -> Result<()> {
        self.idle()?;
        lock(&self.changeset).add(name, start, end, step);
        Ok(())
    }

    /// Drop every axis.
    pub fn clear_items(&self) -> Result<()> {
        self.idle()?;
        lock(&self.changeset).clear();
        Ok(())
    }

    /// Rewind the mirrored change set.
    pub fn init_items(&self) -> Result<()> {
        self.idle()?;
        lock(&self.changeset).init();
        Ok(())
    }

    /// Replace the mirrored change set.
    pub fn set_changeset(&self, changeset: ChangeSet) -> Result<()> {
        self.idle()?;
        *lock(&self.changeset) = changeset;
        Ok(())
    }

    /// Replace the mirrored assessor.
    pub fn set_assessor(&self, assessor: Assessor) -> Result<()> {
        self.idle()?;
        *lock(&self.assessor) = assessor;
        Ok(())
    }

    /// Require a valid checksum on every probe.
    pub fn set_checksum(&self, enable: bool) {
        self.checksum.store(enable, Ordering::Relaxed);
    }

    /// Whether probes must carry a valid checksum.
    pub fn is_checksum_enabled(&self) -> bool {
        self.checksum.load(Ordering::Relaxed)
    }

    /// Arm the scoreboard for `repeat` probes per assessed combination.
    pub fn start(&self, repeat: u32) -> Result<()> {
        let board = {
            let mut cs = lock(&self.changeset);
            if cs.is_empty() {
                return Err(Error::EmptyChangeSet);
            }
            let assessor = lock(&self.assessor);
            Scoreboard::build(&mut cs, &assessor, repeat)
        };
        info!(expected = board.total, repeat, "Monitor started");
        *lock(&self.board) = Some(board);
        self.checksum_errors.store(0, Ordering::Relaxed);
        self.unexpected.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop recording. Results stay available.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!(received = self.received(), missed = self.missed(), "Monitor stopped");
        }
    }

    /// Whether probes are being recorded.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Probes expected in the armed run.
    pub fn expected_total(&self) -> u64 {
        lock(&self.board).as_ref().map_or(0, |board| board.total)
    }

    /// Record one received payload. Returns whether it scored.
    pub fn record(&self, payload: &[u8]) -> bool {
        if !self.is_running() {
            return false;
        }
        let probe = match Probe::decode(payload) {
            Ok((probe, verdict)) => {
                if self.is_checksum_enabled() && verdict != Checksum::Valid {
                    self.checksum_errors.fetch_add(1, Ordering::Relaxed);
                    trace!(?probe, ?verdict, "Probe checksum error");
                    return false;
                }
                probe
            }
            Err(_) => {
                self.unexpected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let scored = lock(&self.board)
            .as_mut()
            .is_some_and(|board| board.mark(probe));
        if !scored {
            self.unexpected.fetch_add(1, Ordering::Relaxed);
            trace!(?probe, "Unexpected probe");
        }
        scored
    }

    /// Probes received.
    pub fn received(&self) -> u64 {
        lock(&self.board).as_ref().map_or(0, |board| board.count(true))
    }

    /// Probes not (yet) received.
    pub fn missed(&self) -> u64 {
        lock(&self.board).as_ref().map_or(0, |board| board.count(false))
    }

    /// Probes rejected for a bad or missing checksum.
    pub fn errors(&self) -> u64 {
        self.checksum_errors.load(Ordering::Relaxed)
    }

    /// Payloads that were not expected probes.
    pub fn unexpected(&self) -> u64 {
        self.unexpected.load(Ordering::Relaxed)
    }

    /// Parameters of the `index`-th received (`ok`) or missed probe.
    pub fn query(&self, ok: bool, index: u64) -> Option<Snapshot> {
        let board = lock(&self.board);
        let board = board.as_ref()?;
        let bit = board.nth(ok, index)?;
        board
            .combos
            .get((bit / u64::from(board.repeat)) as usize)
            .cloned()
    }
}

impl PacketSink for RxMonitor {
    fn deliver(&self, packet: &RxPacket) {
        self.record(&packet.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> RxMonitor {
        let m = RxMonitor::new();
        m.add_item("power", 0, 2, 1).unwrap();
        m.add_item("channel", 1, 2, 1).unwrap();
        m
    }

    fn probe(combination: u64, repeat: u32) -> Vec<u8> {
        Probe {
            combination,
            repeat,
        }
        .encode(8, true)
    }

    #[test]
    fn test_expected_total() {
        let m = monitor();
        assert_eq!(m.expected_total(), 0);
        m.start(3).unwrap();
        assert_eq!(m.expected_total(), 18);
        assert_eq!(m.missed(), 18);
        assert_eq!(m.received(), 0);
    }

    #[test]
    fn test_scoreboard_and_query() {
        let m = monitor();
        m.start(2).unwrap();
        assert!(m.record(&probe(0, 0)));
        assert!(m.record(&probe(0, 1)));
        assert!(m.record(&probe(4, 1)));
        // Duplicate
        assert!(m.record(&probe(4, 1)));

        assert_eq!(m.received(), 3);
        assert_eq!(m.missed(), 9);
        assert_eq!(
            m.query(true, 2),
            Some(vec![("power".into(), 1), ("channel".into(), 2)])
        );
        assert_eq!(
            m.query(false, 0),
            Some(vec![("power".into(), 1), ("channel".into(), 1)])
        );
        assert_eq!(m.query(true, 3), None);
    }

    #[test]
    fn test_excluded_combinations_not_expected() {
        let m = monitor();
        let mut ex = ChangeSet::new();
        ex.add_range("power", 1, Some(1));
        let mut assessor = Assessor::new();
        assessor.exclude(ex);
        m.set_assessor(assessor).unwrap();
        m.start(1).unwrap();

        assert_eq!(m.expected_total(), 4);
        // Combination 1 is power=1, excluded on both sides.
        assert!(!m.record(&probe(1, 0)));
        assert!(m.record(&probe(2, 0)));
        assert_eq!(
            m.query(true, 0),
            Some(vec![("power".into(), 2), ("channel".into(), 1)])
        );
        assert_eq!(m.unexpected(), 1);
    }

    #[test]
    fn test_checksum_errors() {
        let m = monitor();
        m.set_checksum(true);
        m.start(1).unwrap();

        let mut bad = probe(0, 0);
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert!(!m.record(&bad));
        let unsummed = Probe {
            combination: 0,
            repeat: 0,
        }
        .encode(8, false);
        assert!(!m.record(&unsummed));
        assert_eq!(m.errors(), 2);
        assert_eq!(m.received(), 0);

        m.set_checksum(false);
        assert!(m.record(&unsummed));
    }

    #[test]
    fn test_out_of_range_and_foreign() {
        let m = monitor();
        m.start(1).unwrap();
        assert!(!m.record(&probe(0, 1)));
        assert!(!m.record(&probe(99, 0)));
        assert!(!m.record(b"not a probe"));
        assert_eq!(m.unexpected(), 3);
    }

    #[test]
    fn test_idle_until_started_and_locked_while_running() {
        let m = monitor();
        assert!(!m.record(&probe(0, 0)));
        m.start(1).unwrap();
        assert!(matches!(m.add_item("mcs", 0, 1, 1), Err(Error::Busy)));
        m.stop();
        m.add_item("mcs", 0, 1, 1).unwrap();
        assert!(!m.record(&probe(0, 0)));
    }

    #[test]
    fn test_start_requires_items() {
        let m = RxMonitor::new();
        assert!(matches!(m.start(1), Err(Error::EmptyChangeSet)));
    }
}
