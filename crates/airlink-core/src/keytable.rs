//! Session key table.
//!
//! Pairwise keys live in one slot per peer behind that peer's own lock, so
//! installing a key for one station never stalls decryption for another.
//! Group keys live in a small fixed array of interface-wide slots.
//!
//! Lookups hand out `Arc<CipherKey>` clones. Removing or replacing a key
//! only drops the table's handle; the material is zeroed when the last
//! in-flight user lets go of its clone.

use crate::addr::MacAddr;
use crate::{Error, Result};
use airlink_crypto::{CipherKey, CipherSuite};
use core::fmt;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Number of group key slots.
pub const MAX_GROUP_KEYS: usize = 4;

/// Highest pairwise key index (extended key id allows 0 and 1).
pub const MAX_PAIRWISE_INDEX: u8 = 1;

type Slot = RwLock<Option<Arc<CipherKey>>>;

#[derive(Default)]
struct PeerKeys {
    pairwise: Slot,
}

/// Per-interface key table.
pub struct KeyTable {
    peers: RwLock<HashMap<MacAddr, Arc<PeerKeys>>>,
    groups: RwLock<[Option<Arc<CipherKey>>; MAX_GROUP_KEYS]>,
    group_tx: RwLock<Option<u8>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Default for KeyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyTable {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            groups: RwLock::new(Default::default()),
            group_tx: RwLock::new(None),
        }
    }

    fn peer_slot(&self, peer: &MacAddr) -> Option<Arc<PeerKeys>> {
        read(&self.peers).get(peer).cloned()
    }

    fn peer_slot_or_insert(&self, peer: MacAddr) -> Arc<PeerKeys> {
        if let Some(slot) = self.peer_slot(&peer) {
            return slot;
        }
        write(&self.peers).entry(peer).or_default().clone()
    }

    /// Install or replace a key.
    ///
    /// For pairwise keys `peer` selects the slot; group keys go to the
    /// interface slot `index` and `peer` names the transmitter that
    /// advertised them. The first group key installed becomes the group
    /// transmit key.
    ///
    /// # Errors
    /// - `Error::InvalidKeyIndex` for indices outside the slot range
    /// - `Error::Crypto` if the key does not fit the suite
    pub fn key_set(
        &self,
        peer: MacAddr,
        index: u8,
        is_group: bool,
        suite: CipherSuite,
        key: &[u8],
    ) -> Result<Arc<CipherKey>> {
        check_index(index, is_group)?;
        let installed = Arc::new(CipherKey::install(suite, key, index, is_group)?);

        let previous = if is_group {
            let previous = write(&self.groups)[index as usize].replace(installed.clone());
            let mut tx = write(&self.group_tx);
            if tx.is_none() {
                *tx = Some(index);
            }
            previous
        } else {
            let slot = self.peer_slot_or_insert(peer);
            let mut pairwise = write(&slot.pairwise);
            pairwise.replace(installed.clone())
        };

        debug!(
            peer = %peer,
            index,
            group = is_group,
            suite = %suite,
            replaced = previous.is_some(),
            "Key installed"
        );
        Ok(installed)
    }

    /// Remove a key. Returns whether a key was present.
    ///
    /// A pairwise key is removed only if its index matches.
    pub fn key_remove(&self, peer: MacAddr, index: u8, is_group: bool) -> Result<bool> {
        check_index(index, is_group)?;
        let removed = if is_group {
            let removed = write(&self.groups)[index as usize].take();
            let mut tx = write(&self.group_tx);
            if *tx == Some(index) {
                *tx = None;
            }
            removed
        } else {
            match self.peer_slot(&peer) {
                Some(slot) => {
                    let mut pairwise = write(&slot.pairwise);
                    if pairwise.as_ref().is_some_and(|key| key.index() == index) {
                        pairwise.take()
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        debug!(peer = %peer, index, group = is_group, found = removed.is_some(), "Key removed");
        Ok(removed.is_some())
    }

    /// Look up the key protecting a frame.
    ///
    /// Pairwise lookup is direct by peer. Group lookup tries the advertised
    /// `index_hint` first and then the first installed slot.
    pub fn key_lookup(&self, peer: MacAddr, index_hint: u8, is_group: bool) -> Result<Arc<CipherKey>> {
        let found = if is_group {
            let groups = read(&self.groups);
            groups
                .get(index_hint as usize)
                .and_then(Option::clone)
                .or_else(|| groups.iter().flatten().next().cloned())
        } else {
            self.peer_slot(&peer)
                .and_then(|slot| read(&slot.pairwise).clone())
        };

        found.ok_or(Error::KeyNotFound {
            peer,
            index: index_hint,
            group: is_group,
        })
    }

    /// Pairwise key installed for `peer`, if any.
    pub fn pairwise(&self, peer: &MacAddr) -> Option<Arc<CipherKey>> {
        self.peer_slot(peer)
            .and_then(|slot| read(&slot.pairwise).clone())
    }

    /// Key used to protect outbound group-addressed frames.
    pub fn group_tx_key(&self) -> Option<Arc<CipherKey>> {
        let index = (*read(&self.group_tx))?;
        read(&self.groups)[index as usize].clone()
    }

    /// Select the group transmit key slot.
    pub fn set_group_tx(&self, index: u8) -> Result<()> {
        check_index(index, true)?;
        *write(&self.group_tx) = Some(index);
        Ok(())
    }

    /// Drop every key held for `peer`.
    pub fn remove_peer(&self, peer: &MacAddr) -> bool {
        let removed = write(&self.peers).remove(peer);
        if let Some(slot) = &removed {
            write(&slot.pairwise).take();
            debug!(peer = %peer, "Peer keys removed");
        }
        removed.is_some()
    }

    /// Drop every key.
    pub fn clear(&self) {
        let peers: Vec<_> = write(&self.peers).drain().collect();
        for (_, slot) in peers {
            write(&slot.pairwise).take();
        }
        *write(&self.groups) = Default::default();
        *write(&self.group_tx) = None;
        debug!("Key table cleared");
    }

    /// Number of peers with a pairwise slot.
    pub fn peer_count(&self) -> usize {
        read(&self.peers).len()
    }

    /// Number of installed group keys.
    pub fn group_count(&self) -> usize {
        read(&self.groups).iter().flatten().count()
    }
}

impl fmt::Debug for KeyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyTable")
            .field("peers", &self.peer_count())
            .field("groups", &self.group_count())
            .finish()
    }
}

fn check_index(index: u8, is_group: bool) -> Result<()> {
    let max = if is_group {
        MAX_GROUP_KEYS as u8 - 1
    } else {
        MAX_PAIRWISE_INDEX
    };
    if index > max {
        return Err(Error::InvalidKeyIndex(index));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);
    const OTHER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0b]);
    const KEY16: [u8; 16] = [0x11; 16];

    #[test]
    fn test_pairwise_set_lookup_remove() {
        let table = KeyTable::new();
        table
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &KEY16)
            .unwrap();

        let key = table.key_lookup(PEER, 0, false).unwrap();
        assert_eq!(key.suite(), CipherSuite::Ccmp128);
        assert!(!key.is_group());
        assert!(table.key_lookup(OTHER, 0, false).is_err());

        // Wrong index leaves the slot alone
        assert!(!table.key_remove(PEER, 1, false).unwrap());
        assert!(table.key_remove(PEER, 0, false).unwrap());
        assert!(matches!(
            table.key_lookup(PEER, 0, false),
            Err(Error::KeyNotFound { group: false, .. })
        ));
    }

    #[test]
    fn test_replace_pairwise() {
        let table = KeyTable::new();
        table
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &KEY16)
            .unwrap();
        table
            .key_set(PEER, 1, false, CipherSuite::Gcmp256, &[0x22; 32])
            .unwrap();

        let key = table.key_lookup(PEER, 0, false).unwrap();
        assert_eq!(key.index(), 1);
        assert_eq!(key.suite(), CipherSuite::Gcmp256);
        assert_eq!(table.peer_count(), 1);
    }

    #[test]
    fn test_index_bounds() {
        let table = KeyTable::new();
        assert!(matches!(
            table.key_set(PEER, 2, false, CipherSuite::Ccmp128, &KEY16),
            Err(Error::InvalidKeyIndex(2))
        ));
        assert!(matches!(
            table.key_set(PEER, 4, true, CipherSuite::Ccmp128, &KEY16),
            Err(Error::InvalidKeyIndex(4))
        ));
    }

    #[test]
    fn test_bad_key_length_rejected() {
        let table = KeyTable::new();
        let err = table
            .key_set(PEER, 0, false, CipherSuite::Ccmp256, &KEY16)
            .unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
        assert!(table.pairwise(&PEER).is_none());
    }

    #[test]
    fn test_group_lookup_scans_slots() {
        let table = KeyTable::new();
        table
            .key_set(PEER, 2, true, CipherSuite::Gcmp128, &KEY16)
            .unwrap();

        // Hint names an empty slot: first installed slot wins
        let key = table.key_lookup(PEER, 1, true).unwrap();
        assert_eq!(key.index(), 2);

        table
            .key_set(PEER, 1, true, CipherSuite::Gcmp128, &KEY16)
            .unwrap();
        assert_eq!(table.key_lookup(PEER, 1, true).unwrap().index(), 1);
        assert_eq!(table.key_lookup(PEER, 3, true).unwrap().index(), 1);
        assert_eq!(table.group_count(), 2);
    }

    #[test]
    fn test_group_tx_key_follows_removal() {
        let table = KeyTable::new();
        assert!(table.group_tx_key().is_none());
        table
            .key_set(PEER, 1, true, CipherSuite::Ccmp128, &KEY16)
            .unwrap();
        assert_eq!(table.group_tx_key().unwrap().index(), 1);

        table.key_remove(PEER, 1, true).unwrap();
        assert!(table.group_tx_key().is_none());
    }

    #[test]
    fn test_remove_defers_release_until_last_handle() {
        let table = KeyTable::new();
        table
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &KEY16)
            .unwrap();

        let in_flight = table.key_lookup(PEER, 0, false).unwrap();
        let weak = Arc::downgrade(&in_flight);
        table.key_remove(PEER, 0, false).unwrap();

        assert!(weak.upgrade().is_some());
        drop(in_flight);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_clear_and_remove_peer() {
        let table = KeyTable::new();
        table
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &KEY16)
            .unwrap();
        table
            .key_set(OTHER, 0, false, CipherSuite::Ccmp128, &KEY16)
            .unwrap();
        table
            .key_set(PEER, 0, true, CipherSuite::Ccmp128, &KEY16)
            .unwrap();

        assert!(table.remove_peer(&PEER));
        assert!(!table.remove_peer(&PEER));
        assert!(table.pairwise(&OTHER).is_some());

        table.clear();
        assert_eq!(table.peer_count(), 0);
        assert_eq!(table.group_count(), 0);
    }
}
