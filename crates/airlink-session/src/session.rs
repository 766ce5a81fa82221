//! Generic session: lifecycle, defragmentation and transmit framing.
//!
//! Implements:
//! - Session state machine (`Inactive -> Active -> Closed`)
//! - Reassembly of link-layer fragments into messages in three framing modes
//! - MTU-bounded fragmentation of outbound messages in the same modes
//! - A single-message inbox consumed by the owning protocol handler
//!
//! A session never owns its lower layer; it calls out through the
//! [`SessionTransport`] attached when it is activated.

use crate::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Largest reassembled message.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Inbox size of a local control session.
pub const LC_RX_BUFFER_SIZE: usize = 2048;

/// Default payload MTU: 23-byte ATT MTU less 3 bytes of notify overhead.
pub const DEFAULT_MTU: usize = 20;

/// Length of the hex offset prefix in [`FragmentMode::OffsetHeader`].
pub const OFFSET_HEADER_LEN: usize = 4;

const FINAL_FRAGMENT: usize = 0x8000;

/// Session limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest message reassembled or sent.
    pub max_message_len: usize,
    /// Inbox capacity.
    pub rx_buffer_size: usize,
    /// Sessions a handler may hold at once.
    pub max_sessions: usize,
    /// Payload MTU assumed for new connections.
    pub default_mtu: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_len: MAX_MESSAGE_LEN,
            rx_buffer_size: LC_RX_BUFFER_SIZE,
            max_sessions: 3,
            default_mtu: DEFAULT_MTU,
        }
    }
}

/// How messages map onto link-layer writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentMode {
    /// Every write is a whole message.
    Single,
    /// Writes are appended; one shorter than the MTU (possibly empty) ends the message.
    ShortFragment,
    /// Writes carry a 4-hex-digit byte offset; bit 15 marks the final fragment.
    OffsetHeader,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Allocated, not yet bound to a transport.
    Inactive,
    /// Bound and exchanging messages.
    Active,
    /// Torn down; terminal.
    Closed,
}

/// Result of feeding one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// More fragments expected.
    Pending,
    /// A whole message is ready.
    Complete(Vec<u8>),
}

/// Hooks into the link carrying a session.
pub trait SessionTransport: Send + Sync {
    /// Largest payload a single write may carry.
    fn mtu(&self) -> Result<usize>;

    /// Send one link-layer write.
    fn msg_tx(&self, fragment: &[u8]) -> Result<()>;

    /// Tear the link down.
    fn close(&self);

    /// Ask the link to close the session if no keep-alive arrives within `period`.
    ///
    /// Links without liveness tracking ignore this.
    fn keep_alive(&self, period: Duration) {
        let _ = period;
    }
}

/// A session shared between its transport and its handler.
pub type SharedSession = Arc<Mutex<GenericSession>>;

/// The protocol that owns sessions.
pub trait SessionHandler: Send + Sync {
    /// Allocate a session for a new peer, or refuse.
    fn session_alloc(&self) -> Option<SharedSession>;

    /// The link under `session` went away.
    fn session_down(&self, session: &SharedSession);

    /// A complete message arrived.
    fn msg_rx(&self, session: &SharedSession, msg: &[u8]) -> Result<()>;
}

/// Lock a shared session, recovering from poisoning.
pub fn lock(session: &SharedSession) -> MutexGuard<'_, GenericSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One message-oriented session over a fragmenting link.
pub struct GenericSession {
    id: u32,
    state: SessionState,
    fragment: FragmentMode,
    authenticated: bool,
    transport: Option<Arc<dyn SessionTransport>>,
    max_message_len: usize,
    rx_capacity: usize,
    inbox: Option<Vec<u8>>,
    defrag: Option<Vec<u8>>,
}

impl core::fmt::Debug for GenericSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GenericSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("fragment", &self.fragment)
            .field("authenticated", &self.authenticated)
            .field("rx_length", &self.rx_length())
            .field("defrag_offset", &self.defrag_offset())
            .finish_non_exhaustive()
    }
}

impl GenericSession {
    /// New inactive session.
    pub fn new(id: u32, config: &SessionConfig) -> Self {
        Self {
            id,
            state: SessionState::Inactive,
            fragment: FragmentMode::Single,
            authenticated: false,
            transport: None,
            max_message_len: config.max_message_len,
            rx_capacity: config.rx_buffer_size,
            inbox: None,
            defrag: None,
        }
    }

    /// Wrap in a [`SharedSession`].
    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Bind to a transport and start accepting traffic.
    ///
    /// # Errors
    /// Returns `Error::InvalidState` unless the session is inactive.
    pub fn activate(
        &mut self,
        transport: Arc<dyn SessionTransport>,
        fragment: FragmentMode,
    ) -> Result<()> {
        if self.state != SessionState::Inactive {
            return Err(Error::InvalidState);
        }
        self.transport = Some(transport);
        self.fragment = fragment;
        self.state = SessionState::Active;
        debug!(session = self.id, ?fragment, "Session active");
        Ok(())
    }

    /// Session id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether traffic is accepted.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Framing mode.
    pub fn fragment_mode(&self) -> FragmentMode {
        self.fragment
    }

    /// Whether the peer proved its identity.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Record peer authentication.
    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    /// Bytes reassembled so far.
    pub fn defrag_offset(&self) -> usize {
        self.defrag.as_ref().map_or(0, Vec::len)
    }

    /// Whether a reassembly buffer is allocated.
    pub fn has_defrag_buffer(&self) -> bool {
        self.defrag.is_some()
    }

    fn transport(&self) -> Result<&Arc<dyn SessionTransport>> {
        match (&self.state, &self.transport) {
            (SessionState::Active, Some(transport)) => Ok(transport),
            _ => Err(Error::InvalidState),
        }
    }

    /// Current payload MTU of the link.
    pub fn mtu(&self) -> Result<usize> {
        self.transport()?.mtu()
    }

    /// Feed one inbound link-layer write.
    ///
    /// Any error discards the partial message.
    pub fn receive(&mut self, data: &[u8]) -> Result<Delivery> {
        if !self.is_active() {
            return Err(Error::InvalidState);
        }
        let result = match self.fragment {
            FragmentMode::Single => self.receive_single(data),
            FragmentMode::ShortFragment => self.receive_short(data),
            FragmentMode::OffsetHeader => self.receive_offset(data),
        };
        if let Err(e) = &result {
            warn!(session = self.id, error = %e, "Fragment rejected");
            self.defrag = None;
        }
        result
    }

    fn check_total(&self, len: usize) -> Result<()> {
        if len > self.max_message_len {
            return Err(Error::Length {
                len,
                max: self.max_message_len,
            });
        }
        Ok(())
    }

    fn receive_single(&mut self, data: &[u8]) -> Result<Delivery> {
        self.check_total(data.len())?;
        Ok(Delivery::Complete(data.to_vec()))
    }

    fn receive_short(&mut self, data: &[u8]) -> Result<Delivery> {
        let mtu = self.mtu()?;
        if data.len() > mtu {
            return Err(Error::Length {
                len: data.len(),
                max: mtu,
            });
        }
        let last = data.len() < mtu;

        // Unfragmented message: no reassembly buffer needed.
        if last && self.defrag.is_none() {
            return Ok(Delivery::Complete(data.to_vec()));
        }

        self.check_total(self.defrag_offset() + data.len())?;
        let max = self.max_message_len;
        self.defrag
            .get_or_insert_with(|| Vec::with_capacity(max))
            .extend_from_slice(data);
        trace!(session = self.id, offset = self.defrag_offset(), last, "Fragment buffered");

        if last {
            Ok(Delivery::Complete(self.defrag.take().unwrap_or_default()))
        } else {
            Ok(Delivery::Pending)
        }
    }

    fn receive_offset(&mut self, data: &[u8]) -> Result<Delivery> {
        let Some(raw) = parse_offset_header(data) else {
            // No offset prefix: the write is a whole message.
            self.defrag = None;
            return self.receive_single(data);
        };
        let last = raw & FINAL_FRAGMENT != 0;
        let offset = raw & !FINAL_FRAGMENT;
        let payload = &data[OFFSET_HEADER_LEN..];

        if offset == 0 {
            let max = self.max_message_len;
            self.defrag
                .get_or_insert_with(|| Vec::with_capacity(max))
                .clear();
        }
        let expected = self.defrag.as_ref().map(Vec::len);
        if expected != Some(offset) {
            return Err(Error::InvalidOffset {
                expected: expected.unwrap_or(0),
                actual: offset,
            });
        }
        self.check_total(offset + payload.len())?;
        if let Some(buf) = self.defrag.as_mut() {
            buf.extend_from_slice(payload);
        }
        trace!(session = self.id, offset, last, "Fragment buffered");

        if last {
            Ok(Delivery::Complete(self.defrag.take().unwrap_or_default()))
        } else {
            Ok(Delivery::Pending)
        }
    }

    /// Send a message, fragmenting it to the link MTU.
    pub fn send(&self, msg: &[u8]) -> Result<()> {
        let transport = self.transport()?;
        self.check_total(msg.len())?;
        let mtu = transport.mtu()?;

        match self.fragment {
            FragmentMode::Single => {
                if msg.len() > mtu {
                    return Err(Error::Length {
                        len: msg.len(),
                        max: mtu,
                    });
                }
                transport.msg_tx(msg)
            }
            FragmentMode::ShortFragment => {
                if mtu == 0 {
                    return Err(Error::Length { len: msg.len(), max: 0 });
                }
                for chunk in msg.chunks(mtu) {
                    transport.msg_tx(chunk)?;
                }
                // A message filling whole fragments is closed by an empty one.
                if msg.len() % mtu == 0 {
                    transport.msg_tx(&[])?;
                }
                Ok(())
            }
            FragmentMode::OffsetHeader => {
                if mtu <= OFFSET_HEADER_LEN {
                    return Err(Error::Length {
                        len: msg.len(),
                        max: mtu,
                    });
                }
                let room = mtu - OFFSET_HEADER_LEN;
                let mut offset = 0;
                loop {
                    let end = (offset + room).min(msg.len());
                    let last = end == msg.len();
                    let marker = offset | if last { FINAL_FRAGMENT } else { 0 };
                    let mut fragment = Vec::with_capacity(OFFSET_HEADER_LEN + end - offset);
                    fragment.extend_from_slice(format!("{marker:04x}").as_bytes());
                    fragment.extend_from_slice(&msg[offset..end]);
                    transport.msg_tx(&fragment)?;
                    if last {
                        return Ok(());
                    }
                    offset = end;
                }
            }
        }
    }

    /// Request keep-alive supervision from the link.
    pub fn keep_alive(&self, period: Duration) -> Result<()> {
        self.transport()?.keep_alive(period);
        Ok(())
    }

    /// Place a complete message in the inbox.
    ///
    /// # Errors
    /// - `Error::InvalidState` if the session is not active
    /// - `Error::Busy` while the previous message is unconsumed
    /// - `Error::Length` if the message does not fit the inbox
    pub fn deliver(&mut self, msg: &[u8]) -> Result<()> {
        if !self.is_active() {
            return Err(Error::InvalidState);
        }
        if self.inbox.is_some() {
            return Err(Error::Busy);
        }
        if msg.len() > self.rx_capacity {
            return Err(Error::Length {
                len: msg.len(),
                max: self.rx_capacity,
            });
        }
        self.inbox = Some(msg.to_vec());
        Ok(())
    }

    /// Length of the message waiting in the inbox (0 when empty).
    pub fn rx_length(&self) -> usize {
        self.inbox.as_ref().map_or(0, Vec::len)
    }

    /// Whether a message waits in the inbox.
    pub fn has_message(&self) -> bool {
        self.inbox.is_some()
    }

    /// Consume the inbox.
    pub fn take_rx(&mut self) -> Option<Vec<u8>> {
        self.inbox.take()
    }

    /// Close the session. Idempotent.
    ///
    /// Frees the inbox and any partial message, and tells the link to go
    /// down if the session was active.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let was_active = self.state == SessionState::Active;
        self.state = SessionState::Closed;
        self.defrag = None;
        self.inbox = None;
        if let Some(transport) = self.transport.take() {
            if was_active {
                transport.close();
            }
        }
        debug!(session = self.id, "Session closed");
    }
}

/// Offset prefix of a write, if it starts with four hex digits.
fn parse_offset_header(data: &[u8]) -> Option<usize> {
    let prefix = data.get(..OFFSET_HEADER_LEN)?;
    if !prefix.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = core::str::from_utf8(prefix).ok()?;
    usize::from_str_radix(text, 16).ok()
}
