use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::oti::ObjectTransmissionInfo;
use crate::session::{Session, SessionOptions};

/// Opaque handle of a session owned by [`Sessions`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Table of decoding sessions addressed by opaque ids.
///
/// Sessions are independent and can be driven from different threads.
/// Pushes into the same session are serialized.
pub struct Sessions {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>, ahash::RandomState>,
    next_id: AtomicU64,
    options: SessionOptions,
}

impl Sessions {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            sessions: Default::default(),
            next_id: AtomicU64::new(1),
            options,
        }
    }

    /// Creates a session from the transfer length and max payload size
    pub fn create(&self, transfer_length: u64, max_payload_size: u16) -> Result<SessionId> {
        let oti = ObjectTransmissionInfo::with_defaults(transfer_length, max_payload_size)?;
        self.insert(oti)
    }

    /// Creates a session from the 12-byte OTI header
    pub fn create_from_oti(&self, bytes: &[u8]) -> Result<SessionId> {
        let oti = ObjectTransmissionInfo::from_bytes(bytes)?;
        self.insert(oti)
    }

    /// Feeds one encoded payload into the session.
    ///
    /// See [`Session::push`]
    pub fn push(&self, id: SessionId, payload: &[u8]) -> Result<bool> {
        let session = self.get(id).ok_or(SessionsError::UnknownSession(id))?;
        let complete = session.lock().push(payload)?;
        Ok(complete)
    }

    /// Returns `false` for unknown sessions
    pub fn is_complete(&self, id: SessionId) -> bool {
        match self.get(id) {
            Some(session) => session.lock().is_complete(),
            None => false,
        }
    }

    /// Moves the reconstructed object out of the session
    pub fn take_result(&self, id: SessionId) -> Option<Vec<u8>> {
        self.get(id)?.lock().take_result()
    }

    /// Removes the session, discarding its state and any untaken object.
    ///
    /// Returns `false` if there was no such session.
    pub fn destroy(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            tracing::debug!(%id, "session destroyed");
        }
        removed
    }

    /// Runs `f` on the session while holding its lock
    pub fn with_session<T, F>(&self, id: SessionId, f: F) -> Option<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let session = self.get(id)?;
        let mut session = session.lock();
        Some(f(&mut session))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[inline(always)]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn insert(&self, oti: ObjectTransmissionInfo) -> Result<SessionId> {
        let session = Session::new(oti, self.options)?;
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        tracing::debug!(%id, "session created");
        Ok(id)
    }

    fn get(&self, id: SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(&id).map(|session| session.value().clone())
    }
}

impl Default for Sessions {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionsError {
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),
}
