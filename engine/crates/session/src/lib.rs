use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque per-socket id, assigned at upgrade. Doubles as the player id on
/// the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound text frame addressed to a single connection.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub connection_id: ConnectionId,
    pub text: String,
    /// When true, the output router will close the connection's write channel
    /// after delivering this message, causing the socket to shut down.
    pub disconnect: bool,
}

impl SessionOutput {
    pub fn new(connection_id: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            connection_id,
            text: text.into(),
            disconnect: false,
        }
    }

    /// Create a final message that will disconnect the session after delivery.
    pub fn with_disconnect(connection_id: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            connection_id,
            text: text.into(),
            disconnect: true,
        }
    }
}

/// Per-connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("connection {0} is not tracked")]
    Unknown(ConnectionId),

    #[error("connection {id} cannot move from {from:?} to {to:?}")]
    Invalid {
        id: ConnectionId,
        from: SessionState,
        to: SessionState,
    },
}

/// Tracks the lifecycle state of every connection the server knows about.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: BTreeMap<ConnectionId, SessionState>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly accepted connection.
    pub fn register(&mut self, id: ConnectionId) -> Result<(), TransitionError> {
        if let Some(state) = self.sessions.get(&id) {
            return Err(TransitionError::Invalid {
                id,
                from: *state,
                to: SessionState::Connecting,
            });
        }
        self.sessions.insert(id, SessionState::Connecting);
        Ok(())
    }

    /// CONNECTING → OPEN.
    pub fn open(&mut self, id: ConnectionId) -> Result<(), TransitionError> {
        self.transition(id, SessionState::Open)
    }

    /// Any state → CLOSED. Closing twice is an error so callers notice
    /// duplicate disconnect handling.
    pub fn close(&mut self, id: ConnectionId) -> Result<(), TransitionError> {
        self.transition(id, SessionState::Closed)
    }

    fn transition(&mut self, id: ConnectionId, to: SessionState) -> Result<(), TransitionError> {
        let state = self
            .sessions
            .get_mut(&id)
            .ok_or(TransitionError::Unknown(id))?;
        let allowed = matches!(
            (*state, to),
            (SessionState::Connecting, SessionState::Open)
                | (SessionState::Connecting, SessionState::Closed)
                | (SessionState::Open, SessionState::Closed)
        );
        if !allowed {
            return Err(TransitionError::Invalid {
                id,
                from: *state,
                to,
            });
        }
        *state = to;
        Ok(())
    }

    /// Forget a closed connection entirely.
    pub fn remove(&mut self, id: ConnectionId) -> Option<SessionState> {
        self.sessions.remove(&id)
    }

    pub fn state(&self, id: ConnectionId) -> Option<SessionState> {
        self.sessions.get(&id).copied()
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.state(id) == Some(SessionState::Open)
    }

    /// All connections in Open state (sorted by id).
    pub fn open_connections(&self) -> Vec<ConnectionId> {
        self.sessions
            .iter()
            .filter(|(_, s)| **s == SessionState::Open)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Count of connections that are not closed.
    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| **s != SessionState::Closed)
            .count()
    }
}
