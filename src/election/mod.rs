//! Election Module
//!
//! Capability interface to the coordination service, the session bootstrap,
//! and the controller that turns the service's leader election into a
//! primary/secondary role for this process.
//!
//! The controller only depends on the traits below. Any coordination service
//! that can elect one leader among registered participants, tell the winner,
//! and tell every participant about connectivity changes can back it.

mod bootstrap;
mod selector;

pub use bootstrap::{connect_fresh, RetryPolicy};
pub use selector::PrimarySelector;

pub(crate) use selector::identity_from_address;

use std::sync::Arc;

use crate::error::Result;

/// Connectivity of a session to the coordination service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First successful connection
    Connected,
    /// Connection interrupted; the session may still be alive
    Suspended,
    /// Connection re-established after a suspension or loss
    Reconnected,
    /// The session is gone
    Lost,
    /// Connected to a read-only member of the ensemble
    ReadOnly,
}

impl ConnectionState {
    /// Whether requests can still be served over this connection
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionState::Suspended | ConnectionState::Lost)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Suspended => write!(f, "SUSPENDED"),
            ConnectionState::Reconnected => write!(f, "RECONNECTED"),
            ConnectionState::Lost => write!(f, "LOST"),
            ConnectionState::ReadOnly => write!(f, "READ_ONLY"),
        }
    }
}

/// Opens sessions to a coordination service
pub trait Connector: Send + Sync {
    /// Session type produced by this connector
    type Session: Session;

    /// Open a new, not yet started, session
    fn open(&self) -> Result<Self::Session>;
}

/// A session (connection handle) to the coordination service
pub trait Session: Send + Sync + 'static {
    /// Establish the connection
    fn start(&self) -> Result<()>;

    /// End the session. Closing twice yields [`Error::AlreadyClosed`](crate::Error::AlreadyClosed).
    fn close(&self) -> Result<()>;

    /// Whether a node exists at `path`
    fn exists(&self, path: &str) -> Result<bool>;

    /// Create a node at `path`, optionally creating missing parents
    fn create(&self, path: &str, create_parents: bool) -> Result<()>;

    /// Delete the node at `path`
    fn delete(&self, path: &str) -> Result<()>;

    /// Register `identity` as a participant of the election at `election_path`.
    ///
    /// Participation auto-requeues: after a tenure ends, voluntarily or not,
    /// the participant re-enters the election without re-registering.
    fn register(
        &self,
        election_path: &str,
        identity: &str,
        listener: Arc<dyn ElectionListener>,
    ) -> Result<Box<dyn ElectionHandle>>;
}

/// Handle to one registered election participation
pub trait ElectionHandle: Send + Sync {
    /// Identity of the current leader, if any
    fn current_leader(&self) -> Result<Option<String>>;

    /// Identities of every registered participant
    fn participants(&self) -> Result<Vec<String>>;

    /// Stop participating. Closing twice yields [`Error::AlreadyClosed`](crate::Error::AlreadyClosed).
    fn close(&self) -> Result<()>;
}

/// Callbacks delivered by the election primitive, on its own threads
pub trait ElectionListener: Send + Sync {
    /// The session's connectivity changed
    fn connectivity_changed(&self, state: ConnectionState);

    /// This participant won the election. Leadership lasts until the call
    /// returns; an `Err` marks the tenure as failed.
    ///
    /// `election` is a view of the election as of the grant. A connectivity
    /// change may be delivered before the grant reaches the listener, so the
    /// leader it reports is the one to trust.
    fn take_leadership(&self, election: &dyn ElectionHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_usable() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Reconnected.is_connected());
        assert!(ConnectionState::ReadOnly.is_connected());
        assert!(!ConnectionState::Suspended.is_connected());
        assert!(!ConnectionState::Lost.is_connected());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::ReadOnly.to_string(), "READ_ONLY");
        assert_eq!(ConnectionState::Lost.to_string(), "LOST");
    }
}
