use chrono::{DateTime, Utc};
use drift_proto::{PairRole, SearchAttributes};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// A queued search request awaiting a partner
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    /// Identity of the signaling channel this entry arrived on
    pub connection_id: String,
    /// Media-layer identity the partner will dial
    pub peer_id: String,
    pub attributes: SearchAttributes,
    pub enqueued_at: DateTime<Utc>,
}

impl WaitingEntry {
    pub fn new(connection_id: String, peer_id: String, attributes: SearchAttributes) -> Self {
        Self {
            connection_id,
            peer_id,
            attributes,
            enqueued_at: Utc::now(),
        }
    }
}

/// One member of a formed pairing
#[derive(Debug, Clone)]
pub struct PairedMember {
    pub connection_id: String,
    pub peer_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; match notifications not yet handed to both channels
    Negotiating,
    /// Both channels have been told about the pairing
    Active,
    Closed,
}

/// The record binding two matched connections with assigned roles.
/// Only [`MatchRegistry::find_and_pair`] creates these.
#[derive(Debug, Clone)]
pub struct PairedSession {
    pub session_id: String,
    pub caller: PairedMember,
    pub receiver: PairedMember,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

impl PairedSession {
    pub fn role_of(&self, connection_id: &str) -> Option<PairRole> {
        if self.caller.connection_id == connection_id {
            Some(PairRole::Caller)
        } else if self.receiver.connection_id == connection_id {
            Some(PairRole::Receiver)
        } else {
            None
        }
    }

    /// The other member, given one side's connection id
    pub fn partner_of(&self, connection_id: &str) -> Option<&PairedMember> {
        match self.role_of(connection_id)? {
            PairRole::Caller => Some(&self.receiver),
            PairRole::Receiver => Some(&self.caller),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The connection is already waiting; rejected with no state change
    #[error("connection {0} is already in the search queue")]
    DuplicateEntry(String),
}

/// Result of a search request that ran through the pairing engine
#[derive(Debug)]
pub enum PairOutcome {
    /// No compatible partner yet; the entry joined the queue
    Queued,
    /// A session was formed with a previously waiting entry. The searching
    /// side is the caller, the waiting side the receiver.
    Paired(PairedSession),
}

/// What a connection left behind when it was released
#[derive(Debug, Default)]
pub struct Released {
    pub was_waiting: bool,
    pub closed_session: Option<PairedSession>,
}

#[derive(Default)]
struct RegistryInner {
    /// Arrival-ordered search queue
    waiting: Vec<WaitingEntry>,
    /// Non-closed sessions by session id
    sessions: HashMap<String, PairedSession>,
    /// connection id -> session id, for both members of every open session
    membership: HashMap<String, String>,
}

/// The authoritative presence registry and pairing engine. One instance per
/// process; every mutation runs under a single lock held only for in-memory
/// work, which is what makes `find_and_pair` atomic across all channels.
pub struct MatchRegistry {
    inner: Mutex<RegistryInner>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Append an entry to the search queue in arrival order. Fails with
    /// `DuplicateEntry` if the connection is already waiting.
    pub fn enqueue(&self, entry: WaitingEntry) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        Self::enqueue_locked(&mut inner, entry)
    }

    /// Remove a waiting entry. Idempotent; absent entries are not an error.
    pub fn dequeue(&self, connection_id: &str) -> bool {
        let mut inner = self.lock();
        Self::dequeue_locked(&mut inner, connection_id)
    }

    /// Run the pairing engine for a search request: scan the queue in
    /// insertion order for the first compatible entry and either form a
    /// session (removing both entries in the same step) or enqueue the
    /// request. A connection that searches while still in an open session is
    /// first released from it; a skip shows up on the wire as a fresh
    /// search, never as an explicit session-close message.
    pub fn find_and_pair(&self, entry: WaitingEntry) -> Result<PairOutcome, RegistryError> {
        let mut inner = self.lock();

        if inner
            .waiting
            .iter()
            .any(|w| w.connection_id == entry.connection_id)
        {
            return Err(RegistryError::DuplicateEntry(entry.connection_id));
        }

        if let Some(closed) = Self::close_session_of(&mut inner, &entry.connection_id) {
            debug!(
                session_id = %closed.session_id,
                connection_id = %entry.connection_id,
                "search request displaced an open session"
            );
        }

        let position = inner
            .waiting
            .iter()
            .position(|candidate| compatible(candidate, &entry));

        match position {
            Some(idx) => {
                let partner = inner.waiting.remove(idx);
                let session = PairedSession {
                    session_id: Uuid::new_v4().to_string(),
                    caller: PairedMember {
                        connection_id: entry.connection_id,
                        peer_id: entry.peer_id,
                    },
                    receiver: PairedMember {
                        connection_id: partner.connection_id,
                        peer_id: partner.peer_id,
                    },
                    created_at: Utc::now(),
                    state: SessionState::Negotiating,
                };
                inner
                    .membership
                    .insert(session.caller.connection_id.clone(), session.session_id.clone());
                inner
                    .membership
                    .insert(session.receiver.connection_id.clone(), session.session_id.clone());
                inner
                    .sessions
                    .insert(session.session_id.clone(), session.clone());
                info!(
                    session_id = %session.session_id,
                    caller = %session.caller.connection_id,
                    receiver = %session.receiver.connection_id,
                    "pairing formed"
                );
                Ok(PairOutcome::Paired(session))
            }
            None => {
                Self::enqueue_locked(&mut inner, entry)?;
                Ok(PairOutcome::Queued)
            }
        }
    }

    /// Mark a session active once both members have been notified. No-op if
    /// the session was torn down in the meantime.
    pub fn mark_active(&self, session_id: &str) {
        let mut inner = self.lock();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            if session.state == SessionState::Negotiating {
                session.state = SessionState::Active;
            }
        }
    }

    /// Full teardown for a connection: drop its waiting entry if queued and
    /// close any open session it belongs to, releasing the partner. Used for
    /// `stop-search` and for channel closure, which are deliberately
    /// identical.
    pub fn release(&self, connection_id: &str) -> Released {
        let mut inner = self.lock();
        let was_waiting = Self::dequeue_locked(&mut inner, connection_id);
        let closed_session = Self::close_session_of(&mut inner, connection_id);
        if let Some(session) = &closed_session {
            info!(
                session_id = %session.session_id,
                released_by = %connection_id,
                "session closed"
            );
        }
        Released {
            was_waiting,
            closed_session,
        }
    }

    /// Queue depth and open session count, for the stats surface
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.waiting.len(), inner.sessions.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        // No operation leaves a half-formed pair behind, so a poisoned lock
        // is still safe to keep serving from.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue_locked(
        inner: &mut RegistryInner,
        entry: WaitingEntry,
    ) -> Result<(), RegistryError> {
        if inner
            .waiting
            .iter()
            .any(|w| w.connection_id == entry.connection_id)
        {
            return Err(RegistryError::DuplicateEntry(entry.connection_id));
        }
        debug!(connection_id = %entry.connection_id, depth = inner.waiting.len() + 1, "queued");
        inner.waiting.push(entry);
        Ok(())
    }

    fn dequeue_locked(inner: &mut RegistryInner, connection_id: &str) -> bool {
        let before = inner.waiting.len();
        inner.waiting.retain(|w| w.connection_id != connection_id);
        inner.waiting.len() != before
    }

    fn close_session_of(
        inner: &mut RegistryInner,
        connection_id: &str,
    ) -> Option<PairedSession> {
        let session_id = inner.membership.get(connection_id)?.clone();
        let mut session = inner.sessions.remove(&session_id)?;
        inner.membership.remove(&session.caller.connection_id);
        inner.membership.remove(&session.receiver.connection_id);
        session.state = SessionState::Closed;
        Some(session)
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Current pairing policy: any two distinct connections are compatible. The
/// stated attributes (interests, gender, age, country) ride along on the
/// entry but do not gate the match; see DESIGN.md for the rationale.
fn compatible(candidate: &WaitingEntry, searcher: &WaitingEntry) -> bool {
    candidate.connection_id != searcher.connection_id
}
