//! Per-connection mailbox service.
//!
//! Each link connection that subscribes to the mailbox gets its own
//! session, allocated from the registered [`SessionHandler`]. Inbound
//! writes are reassembled with offset-prefixed framing and handed to the
//! handler; outbound fragments queue up as notifications for the link to
//! drain.

use crate::session::{self, FragmentMode, SessionConfig, SessionHandler, SessionTransport, SharedSession};
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-write protocol overhead (opcode + handle) subtracted from the link MTU.
pub const NOTIFY_OVERHEAD: usize = 3;

/// Link side of one connection.
struct MailboxLink {
    conn: u16,
    mtu: AtomicUsize,
    outbox: Mutex<VecDeque<Vec<u8>>>,
    deadline: Mutex<Option<Instant>>,
    closed: AtomicBool,
}

impl SessionTransport for MailboxLink {
    fn mtu(&self) -> Result<usize> {
        self.mtu
            .load(Ordering::Relaxed)
            .checked_sub(NOTIFY_OVERHEAD)
            .ok_or_else(|| Error::Transport(format!("MTU too small on connection {}", self.conn)))
    }

    fn msg_tx(&self, fragment: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Transport(format!("Connection {} closed", self.conn)));
        }
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fragment.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn keep_alive(&self, period: Duration) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now() + period);
        debug!(conn = self.conn, ?period, "Keep-alive armed");
    }
}

struct Connection {
    link: Arc<MailboxLink>,
    session: Option<SharedSession>,
}

/// Mailbox service multiplexing sessions over link connections.
pub struct Mailbox {
    config: SessionConfig,
    handler: RwLock<Option<Arc<dyn SessionHandler>>>,
    conns: Mutex<HashMap<u16, Connection>>,
}

impl core::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mailbox")
            .field("connections", &self.connection_count())
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

impl Mailbox {
    /// Service with no handler registered.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            handler: RwLock::new(None),
            conns: Mutex::new(HashMap::new()),
        }
    }

    fn handler(&self) -> Option<Arc<dyn SessionHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn conns(&self) -> std::sync::MutexGuard<'_, HashMap<u16, Connection>> {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the session handler.
    ///
    /// Replacing a handler shuts down every session the old one owns.
    pub fn set_handler(&self, handler: Option<Arc<dyn SessionHandler>>) {
        let previous = {
            let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, handler)
        };
        let current = self.handler();
        let changed = match (&previous, &current) {
            (Some(old), Some(new)) => !Arc::ptr_eq(old, new),
            (Some(_), None) => true,
            _ => false,
        };
        if let (true, Some(old)) = (changed, previous) {
            let sessions: Vec<_> = self
                .conns()
                .values_mut()
                .filter_map(|conn| conn.session.take())
                .collect();
            info!(count = sessions.len(), "Handler replaced, shutting sessions down");
            for session in &sessions {
                old.session_down(session);
            }
        }
    }

    /// A link connection came up with the given ATT MTU.
    pub fn connect(&self, conn: u16, mtu: Option<usize>) {
        let link = Arc::new(MailboxLink {
            conn,
            mtu: AtomicUsize::new(mtu.unwrap_or(self.config.default_mtu + NOTIFY_OVERHEAD)),
            outbox: Mutex::new(VecDeque::new()),
            deadline: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.conns().insert(conn, Connection { link, session: None });
        debug!(conn, "Connection up");
    }

    /// The link renegotiated its MTU.
    pub fn set_mtu(&self, conn: u16, mtu: usize) -> Result<()> {
        let conns = self.conns();
        let entry = conns.get(&conn).ok_or(Error::UnknownConnection(conn))?;
        entry.link.mtu.store(mtu, Ordering::Relaxed);
        Ok(())
    }

    /// Subscription change on the mailbox outbox.
    ///
    /// Enabling indications starts a session; disabling ends it.
    pub fn subscribe(&self, conn: u16, indicate: bool) -> Result<()> {
        if indicate {
            self.session_get(conn).map(|_| ())
        } else {
            self.session_end(conn);
            Ok(())
        }
    }

    fn session_get(&self, conn: u16) -> Result<SharedSession> {
        let link = {
            let conns = self.conns();
            let entry = conns.get(&conn).ok_or(Error::UnknownConnection(conn))?;
            if let Some(session) = &entry.session {
                return Ok(session.clone());
            }
            entry.link.clone()
        };

        let handler = self
            .handler()
            .ok_or_else(|| Error::Alloc("no session handler".into()))?;
        let Some(session) = handler.session_alloc() else {
            warn!(conn, "Unable to start mailbox session");
            return Err(Error::Alloc("session table full".into()));
        };
        let activated = session::lock(&session).activate(link, FragmentMode::OffsetHeader);
        if let Err(e) = activated {
            handler.session_down(&session);
            return Err(e);
        }

        let bound = match self.conns().get_mut(&conn) {
            Some(entry) => {
                entry.session = Some(session.clone());
                true
            }
            None => false,
        };
        if !bound {
            // Connection dropped while the handler was allocating.
            handler.session_down(&session);
            return Err(Error::UnknownConnection(conn));
        }
        info!(conn, "Mailbox session started");
        Ok(session)
    }

    fn session_end(&self, conn: u16) {
        let session = self
            .conns()
            .get_mut(&conn)
            .and_then(|entry| entry.session.take());
        if let Some(session) = session {
            debug!(conn, "Shutting down mailbox session");
            if let Some(handler) = self.handler() {
                handler.session_down(&session);
            }
        }
    }

    /// Inbound write on the mailbox inbox.
    ///
    /// # Errors
    /// - `Error::InvalidState` if the connection has no active session
    /// - framing errors from reassembly
    /// - whatever the handler's `msg_rx` reports (e.g. `Error::Busy`)
    pub fn write(&self, conn: u16, data: &[u8]) -> Result<()> {
        self.reap_closed();
        let session = self
            .conns()
            .get(&conn)
            .and_then(|entry| entry.session.clone())
            .ok_or_else(|| {
                warn!(conn, "Mailbox session not found");
                Error::InvalidState
            })?;

        let delivery = session::lock(&session).receive(data)?;
        match delivery {
            session::Delivery::Pending => Ok(()),
            session::Delivery::Complete(msg) => {
                let handler = self.handler().ok_or(Error::InvalidState)?;
                handler.msg_rx(&session, &msg)
            }
        }
    }

    /// The link connection went down.
    pub fn disconnect(&self, conn: u16) {
        self.session_end(conn);
        self.conns().remove(&conn);
        debug!(conn, "Connection down");
    }

    /// Drain notifications queued for a connection.
    pub fn take_notifications(&self, conn: u16) -> Vec<Vec<u8>> {
        self.conns()
            .get(&conn)
            .map(|entry| {
                entry
                    .link
                    .outbox
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .drain(..)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Close sessions whose keep-alive deadline passed before `now`.
    ///
    /// Returns the number of sessions closed.
    pub fn expire(&self, now: Instant) -> usize {
        let expired: Vec<u16> = self
            .conns()
            .iter()
            .filter(|(_, entry)| entry.session.is_some())
            .filter(|(_, entry)| {
                entry
                    .link
                    .deadline
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some_and(|deadline| deadline <= now)
            })
            .map(|(conn, _)| *conn)
            .collect();

        for conn in &expired {
            info!(conn, "Keep-alive expired");
            self.disconnect(*conn);
        }
        expired.len()
    }

    /// Forget connections whose session closed the link.
    fn reap_closed(&self) {
        self.conns()
            .retain(|_, entry| !entry.link.closed.load(Ordering::Acquire));
    }

    /// Session bound to a connection.
    pub fn session(&self, conn: u16) -> Option<SharedSession> {
        self.conns().get(&conn).and_then(|entry| entry.session.clone())
    }

    /// Whether the session layer asked to drop this connection.
    pub fn is_link_closed(&self, conn: u16) -> bool {
        self.conns()
            .get(&conn)
            .map_or(true, |entry| entry.link.closed.load(Ordering::Acquire))
    }

    /// Connections known to the service.
    pub fn connection_count(&self) -> usize {
        self.conns().len()
    }

    /// Connections with a live session.
    pub fn session_count(&self) -> usize {
        self.conns()
            .values()
            .filter(|entry| entry.session.is_some())
            .count()
    }
}
