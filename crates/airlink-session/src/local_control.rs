//! Local control service.
//!
//! A [`SessionHandler`] with a fixed-size session table. Each session owns
//! a single-message inbox; a message must be consumed before the next one
//! is accepted, which pushes back on the link (`Busy`) instead of queueing
//! without bound.

use crate::session::{self, GenericSession, SessionConfig, SessionHandler, SharedSession};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

/// Local control session table.
pub struct LocalControl {
    config: SessionConfig,
    enabled: AtomicBool,
    table: Mutex<Vec<Option<SharedSession>>>,
    wakeup: Notify,
}

impl core::fmt::Debug for LocalControl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalControl")
            .field("enabled", &self.is_enabled())
            .field("sessions", &self.active_sessions())
            .finish_non_exhaustive()
    }
}

impl LocalControl {
    /// Disabled service with an empty table.
    pub fn new(config: SessionConfig) -> Self {
        let slots = vec![None; config.max_sessions];
        Self {
            config,
            enabled: AtomicBool::new(false),
            table: Mutex::new(slots),
            wakeup: Notify::new(),
        }
    }

    fn table(&self) -> MutexGuard<'_, Vec<Option<SharedSession>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start offering sessions.
    pub fn up(&self) {
        self.enabled.store(true, Ordering::Release);
        info!("Local control up");
    }

    /// Stop offering sessions and close every open one.
    pub fn down(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            self.close_all();
            info!("Local control down");
        }
    }

    /// Whether sessions are offered.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Session by id.
    pub fn session(&self, id: u32) -> Option<SharedSession> {
        let index = (id as usize).checked_sub(1)?;
        self.table().get(index).cloned().flatten()
    }

    /// Ids of all sessions in the table.
    pub fn active_sessions(&self) -> Vec<u32> {
        self.table()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| i as u32 + 1)
            .collect()
    }

    /// Consume the message waiting for session `id`.
    pub fn take_message(&self, id: u32) -> Option<Vec<u8>> {
        let session = self.session(id)?;
        let msg = session::lock(&session).take_rx();
        msg
    }

    /// Consume the first waiting message in table order.
    pub fn poll(&self) -> Option<(u32, Vec<u8>)> {
        let sessions: Vec<_> = self.table().iter().flatten().cloned().collect();
        sessions.iter().find_map(|session| {
            let mut guard = session::lock(session);
            let id = guard.id();
            guard.take_rx().map(|msg| (id, msg))
        })
    }

    /// Wait for the next message on any session.
    pub async fn recv(&self) -> (u32, Vec<u8>) {
        loop {
            if let Some(msg) = self.poll() {
                return msg;
            }
            self.wakeup.notified().await;
        }
    }

    /// Send a message to the peer of session `id`.
    pub fn reply(&self, id: u32, msg: &[u8]) -> Result<()> {
        let session = self.session(id).ok_or(Error::InvalidState)?;
        let result = session::lock(&session).send(msg);
        result
    }

    /// Arm keep-alive supervision for session `id`.
    pub fn keep_alive(&self, id: u32, period: Duration) -> Result<()> {
        let session = self.session(id).ok_or(Error::InvalidState)?;
        let result = session::lock(&session).keep_alive(period);
        result
    }

    /// Close session `id` and free its slot.
    pub fn close(&self, id: u32) {
        if let Some(session) = self.session(id) {
            self.session_down(&session);
        }
    }

    /// Close every session.
    pub fn close_all(&self) {
        let sessions: Vec<_> = self.table().iter_mut().filter_map(Option::take).collect();
        for session in &sessions {
            session::lock(session).close();
        }
        debug!(count = sessions.len(), "All local control sessions closed");
    }
}

impl SessionHandler for LocalControl {
    fn session_alloc(&self) -> Option<SharedSession> {
        if !self.is_enabled() {
            warn!("Local control disabled, session refused");
            return None;
        }
        let mut table = self.table();
        let index = table.iter().position(Option::is_none)?;
        let session = GenericSession::new(index as u32 + 1, &self.config).shared();
        table[index] = Some(session.clone());
        info!(session = index + 1, "Local control session up");
        Some(session)
    }

    fn session_down(&self, session: &SharedSession) {
        let freed = {
            let mut table = self.table();
            table
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)))
                .and_then(Option::take)
        };
        let mut guard = session::lock(session);
        guard.close();
        if freed.is_some() {
            info!(session = guard.id(), "Local control session down");
        }
    }

    fn msg_rx(&self, session: &SharedSession, msg: &[u8]) -> Result<()> {
        let delivered = session::lock(session).deliver(msg);
        delivered?;
        trace!(len = msg.len(), "Local control message queued");
        self.wakeup.notify_one();
        Ok(())
    }
}
