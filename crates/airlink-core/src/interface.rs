//! Interface context.
//!
//! Implements:
//! - Link parameters (channel, bandwidth, MIMO) for the interface and each peer
//! - Peer sessions created on association and dropped on disassociation
//! - Ownership of the key table shared by receivers and transmitters
//!
//! An [`Interface`] is a cheap handle; clones share the same state.

use crate::addr::MacAddr;
use crate::keytable::KeyTable;
use crate::radio::Radio;
use crate::receiver::{Receiver, RxFilter};
use crate::transmitter::Transmitter;
use crate::{Error, Result};
use airlink_crypto::CipherKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Channel width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Bandwidth {
    /// 20 MHz.
    #[default]
    Mhz20,
    /// 40 MHz.
    Mhz40,
    /// 80 MHz.
    Mhz80,
    /// 160 MHz.
    Mhz160,
}

impl Bandwidth {
    /// Width from its value in MHz.
    pub fn from_mhz(mhz: u16) -> Option<Self> {
        match mhz {
            20 => Some(Self::Mhz20),
            40 => Some(Self::Mhz40),
            80 => Some(Self::Mhz80),
            160 => Some(Self::Mhz160),
            _ => None,
        }
    }

    /// Width in MHz.
    pub fn mhz(self) -> u16 {
        match self {
            Self::Mhz20 => 20,
            Self::Mhz40 => 40,
            Self::Mhz80 => 80,
            Self::Mhz160 => 160,
        }
    }
}

/// Antenna usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MimoMode {
    /// Single stream, single antenna.
    #[default]
    Siso,
    /// Space-time block coding over one stream.
    Stbc,
    /// Spatial multiplexing.
    Mimo {
        /// Number of spatial streams.
        streams: u8,
    },
}

impl MimoMode {
    /// Mode for a given stream count.
    pub fn from_streams(streams: u8) -> Self {
        if streams <= 1 {
            Self::Siso
        } else {
            Self::Mimo { streams }
        }
    }

    /// Spatial streams in use.
    pub fn streams(self) -> u8 {
        match self {
            Self::Siso | Self::Stbc => 1,
            Self::Mimo { streams } => streams,
        }
    }
}

/// Physical parameters a frame is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkParams {
    /// Center frequency of the primary channel.
    pub frequency_mhz: u16,
    /// Operating bandwidth.
    pub bandwidth: Bandwidth,
    /// MIMO mode.
    pub mimo: MimoMode,
    /// Modulation and coding scheme index.
    pub mcs: u8,
    /// Transmit power.
    pub tx_power_dbm: i8,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            frequency_mhz: 2412,
            bandwidth: Bandwidth::Mhz20,
            mimo: MimoMode::Siso,
            mcs: 0,
            tx_power_dbm: 20,
        }
    }
}

impl LinkParams {
    /// Parameters for an IEEE channel number.
    pub fn for_channel(channel: u8) -> Result<Self> {
        let frequency_mhz = channel_to_frequency(channel)
            .ok_or(Error::InvalidChannel(channel))?;
        Ok(Self {
            frequency_mhz,
            ..Self::default()
        })
    }
}

/// Center frequency of a 2.4 GHz or 5 GHz channel number.
pub fn channel_to_frequency(channel: u8) -> Option<u16> {
    match channel {
        1..=13 => Some(2407 + 5 * channel as u16),
        14 => Some(2484),
        32..=177 => Some(5000 + 5 * channel as u16),
        _ => None,
    }
}

/// Interface configuration.
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    /// Own MAC address.
    pub address: MacAddr,
    /// Initial link parameters.
    pub params: LinkParams,
    /// Maximum number of associated peers.
    pub max_peers: usize,
    /// Refuse to send or accept unprotected data frames.
    pub require_protection: bool,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            address: MacAddr::new([0x02, 0, 0, 0, 0, 0x01]),
            params: LinkParams::default(),
            max_peers: 32,
            require_protection: false,
        }
    }
}

/// Link state towards one associated peer.
#[derive(Debug)]
pub struct PeerSession {
    local: MacAddr,
    peer: MacAddr,
    params: RwLock<LinkParams>,
    keys: Arc<KeyTable>,
}

impl PeerSession {
    /// Own address.
    pub fn local(&self) -> MacAddr {
        self.local
    }

    /// Remote address.
    pub fn peer(&self) -> MacAddr {
        self.peer
    }

    /// Current link parameters.
    pub fn params(&self) -> LinkParams {
        *self.params.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Override link parameters for this peer only.
    pub fn set_params(&self, params: LinkParams) {
        *self.params.write().unwrap_or_else(PoisonError::into_inner) = params;
    }

    /// Pairwise key currently protecting this link.
    pub fn active_key(&self) -> Option<Arc<CipherKey>> {
        self.keys.pairwise(&self.peer)
    }

    /// Pairwise key to send with, or `None` on an open link.
    ///
    /// # Errors
    /// Returns `Error::RekeyRequired` once the installed key has used up
    /// its packet numbers; installing a fresh key clears it.
    pub fn tx_key(&self) -> Result<Option<Arc<CipherKey>>> {
        match self.active_key() {
            Some(key) if key.is_exhausted() => Err(Error::RekeyRequired(self.peer)),
            key => Ok(key),
        }
    }
}

struct Inner {
    config: InterfaceConfig,
    keys: Arc<KeyTable>,
    params: RwLock<LinkParams>,
    peers: RwLock<HashMap<MacAddr, Arc<PeerSession>>>,
    seq: AtomicU16,
}

/// A wireless interface: keys, link parameters and peers.
#[derive(Clone)]
pub struct Interface {
    inner: Arc<Inner>,
}

impl Interface {
    /// Bring up an interface.
    pub fn new(config: InterfaceConfig) -> Self {
        info!(address = %config.address, frequency = config.params.frequency_mhz, "Interface created");
        Self {
            inner: Arc::new(Inner {
                params: RwLock::new(config.params),
                config,
                keys: Arc::new(KeyTable::new()),
                peers: RwLock::new(HashMap::new()),
                seq: AtomicU16::new(0),
            }),
        }
    }

    /// Own address.
    pub fn address(&self) -> MacAddr {
        self.inner.config.address
    }

    /// Configuration the interface was created with.
    pub fn config(&self) -> &InterfaceConfig {
        &self.inner.config
    }

    /// Key table.
    pub fn keys(&self) -> &Arc<KeyTable> {
        &self.inner.keys
    }

    /// Interface link parameters.
    pub fn params(&self) -> LinkParams {
        *self.inner.params.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Associate a peer, or return its existing session.
    ///
    /// # Errors
    /// Returns `Error::TooManyPeers` when the peer table is full.
    pub fn associate(&self, peer: MacAddr) -> Result<Arc<PeerSession>> {
        let mut peers = self.inner.peers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = peers.get(&peer) {
            return Ok(existing.clone());
        }
        if peers.len() >= self.inner.config.max_peers {
            return Err(Error::TooManyPeers(self.inner.config.max_peers));
        }
        let session = Arc::new(PeerSession {
            local: self.address(),
            peer,
            params: RwLock::new(self.params()),
            keys: self.inner.keys.clone(),
        });
        peers.insert(peer, session.clone());
        info!(peer = %peer, "Peer associated");
        Ok(session)
    }

    /// Drop a peer and its pairwise key. Returns whether it was associated.
    pub fn disassociate(&self, peer: &MacAddr) -> bool {
        let removed = self
            .inner
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
        self.inner.keys.remove_peer(peer);
        if removed.is_some() {
            info!(peer = %peer, "Peer disassociated");
        }
        removed.is_some()
    }

    /// Session for an associated peer.
    pub fn peer(&self, peer: &MacAddr) -> Result<Arc<PeerSession>> {
        self.inner
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
            .ok_or(Error::UnknownPeer(*peer))
    }

    /// Addresses of all associated peers.
    pub fn peers(&self) -> Vec<MacAddr> {
        let mut peers: Vec<_> = self
            .inner
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        peers.sort();
        peers
    }

    /// Move the interface and every peer to new link parameters.
    pub fn switch_channel(&self, params: LinkParams) {
        *self.inner.params.write().unwrap_or_else(PoisonError::into_inner) = params;
        for session in self
            .inner
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            session.set_params(params);
        }
        debug!(
            frequency = params.frequency_mhz,
            bandwidth = params.bandwidth.mhz(),
            "Channel switched"
        );
    }

    /// Next 12-bit sequence number.
    pub(crate) fn next_seq(&self) -> u16 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed) & 0x0fff
    }

    /// A receiver bound to this interface.
    pub fn receiver(&self, filter: RxFilter) -> Receiver {
        Receiver::new(self.clone(), filter)
    }

    /// A transmitter bound to this interface and radio.
    pub fn transmitter(&self, radio: Arc<dyn Radio>) -> Transmitter {
        Transmitter::new(self.clone(), radio)
    }
}

impl core::fmt::Debug for Interface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interface")
            .field("address", &self.address())
            .field("params", &self.params())
            .field("peers", &self.peers().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlink_crypto::CipherSuite;

    const PEER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);

    #[test]
    fn test_channel_to_frequency() {
        assert_eq!(channel_to_frequency(1), Some(2412));
        assert_eq!(channel_to_frequency(13), Some(2472));
        assert_eq!(channel_to_frequency(14), Some(2484));
        assert_eq!(channel_to_frequency(36), Some(5180));
        assert_eq!(channel_to_frequency(0), None);
        assert_eq!(channel_to_frequency(200), None);
    }

    #[test]
    fn test_associate_limits() {
        let iface = Interface::new(InterfaceConfig {
            max_peers: 1,
            ..Default::default()
        });
        let a = iface.associate(PEER).unwrap();
        let again = iface.associate(PEER).unwrap();
        assert!(Arc::ptr_eq(&a, &again));

        let err = iface.associate(MacAddr::new([0x02, 0, 0, 0, 0, 0x0b])).unwrap_err();
        assert!(matches!(err, Error::TooManyPeers(1)));
    }

    #[test]
    fn test_exhausted_key_requires_rekey() {
        let iface = Interface::new(InterfaceConfig::default());
        let session = iface.associate(PEER).unwrap();
        assert!(session.tx_key().unwrap().is_none());

        let key = iface
            .keys()
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &[7; 16])
            .unwrap();
        key.set_tx_pn(airlink_crypto::aead::PN_MAX);
        assert!(session.tx_key().unwrap().is_some());
        key.next_pn().unwrap();
        assert!(matches!(session.tx_key(), Err(Error::RekeyRequired(p)) if p == PEER));

        iface
            .keys()
            .key_set(PEER, 1, false, CipherSuite::Ccmp128, &[8; 16])
            .unwrap();
        assert_eq!(session.tx_key().unwrap().unwrap().index(), 1);
    }

    #[test]
    fn test_disassociate_drops_keys() {
        let iface = Interface::new(InterfaceConfig::default());
        let session = iface.associate(PEER).unwrap();
        iface
            .keys()
            .key_set(PEER, 0, false, CipherSuite::Ccmp128, &[7; 16])
            .unwrap();
        assert!(session.active_key().is_some());

        assert!(iface.disassociate(&PEER));
        assert!(session.active_key().is_none());
        assert!(matches!(iface.peer(&PEER), Err(Error::UnknownPeer(_))));
        assert!(!iface.disassociate(&PEER));
    }

    #[test]
    fn test_switch_channel_updates_peers() {
        let iface = Interface::new(InterfaceConfig::default());
        let session = iface.associate(PEER).unwrap();

        let params = LinkParams {
            bandwidth: Bandwidth::Mhz80,
            mimo: MimoMode::from_streams(2),
            ..LinkParams::for_channel(36).unwrap()
        };
        iface.switch_channel(params);
        assert_eq!(iface.params(), params);
        assert_eq!(session.params().frequency_mhz, 5180);
        assert_eq!(session.params().mimo.streams(), 2);
    }
}
