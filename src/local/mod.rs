//! Local Coordination Module
//!
//! An in-process coordination service implementing the election capability
//! interface. It backs the test suite and the `simulate` command, and lets a
//! single process host several participants that elect a primary among
//! themselves.
//!
//! Elections are FIFO queues: the participant at the head is the leader.
//! Connectivity is simulated per session with [`LocalCoordinator::set_connectivity`];
//! outages of the service itself with [`LocalCoordinator::set_available`].

mod namespace;
mod participant;
mod session;

pub use participant::LocalParticipation;
pub use session::LocalSession;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::election::{ConnectionState, Connector, ElectionListener};
use crate::error::{Error, Result};
use namespace::Namespace;

/// Identifier of a session opened against a [`LocalCoordinator`]
pub type SessionId = Uuid;

/// Session lifecycle event, recorded in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connector opened the session
    Opened(SessionId),
    /// The session connected
    Started(SessionId),
    /// The session was closed
    Closed(SessionId),
}

#[derive(Debug)]
struct SessionEntry {
    started: bool,
    closed: bool,
    connection: ConnectionState,
}

/// A registered election participant
struct Participant {
    identity: String,
    election_path: String,
    session: SessionId,
    listener: Arc<dyn ElectionListener>,
}

struct ClusterState {
    namespace: Namespace,
    sessions: HashMap<SessionId, SessionEntry>,
    /// Election path -> queue of participant keys, leader first
    elections: HashMap<String, VecDeque<u64>>,
    participants: HashMap<u64, Participant>,
    next_participant: u64,
    events: Vec<SessionEvent>,
    available: bool,
    failing_starts: usize,
    failed_tenures: usize,
}

impl ClusterState {
    fn new() -> Self {
        Self {
            namespace: Namespace::new(),
            sessions: HashMap::new(),
            elections: HashMap::new(),
            participants: HashMap::new(),
            next_participant: 0,
            events: Vec::new(),
            available: true,
            failing_starts: 0,
            failed_tenures: 0,
        }
    }

    /// Fail unless `session` is started and open
    fn check_session(&self, session: SessionId) -> Result<()> {
        match self.sessions.get(&session) {
            Some(entry) if entry.started && !entry.closed => Ok(()),
            _ => Err(Error::SessionClosed),
        }
    }

    /// Fail while the service is marked unavailable
    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(Error::ConnectionLoss("coordination service unavailable".into()))
        }
    }

    fn session_connected(&self, session: SessionId) -> bool {
        self.sessions
            .get(&session)
            .is_some_and(|entry| !entry.closed && entry.connection.is_connected())
    }

    fn participants_of(&self, session: SessionId) -> Vec<u64> {
        self.participants
            .iter()
            .filter(|(_, p)| p.session == session)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Append `key` to its election queue unless already queued
    fn enqueue(&mut self, key: u64) {
        let Some(participant) = self.participants.get(&key) else {
            return;
        };
        let queue = self
            .elections
            .entry(participant.election_path.clone())
            .or_default();
        if !queue.contains(&key) {
            queue.push_back(key);
        }
    }

    fn dequeue(&mut self, key: u64) {
        for queue in self.elections.values_mut() {
            queue.retain(|k| *k != key);
        }
    }

    /// Re-enter `key` into its election if it is still eligible
    fn requeue(&mut self, key: u64) {
        let eligible = self
            .participants
            .get(&key)
            .is_some_and(|p| self.session_connected(p.session));
        if eligible {
            self.enqueue(key);
        }
    }

    fn is_leader(&self, key: u64) -> bool {
        self.participants
            .get(&key)
            .and_then(|p| self.elections.get(&p.election_path))
            .and_then(|queue| queue.front())
            == Some(&key)
    }

    fn leader_of(&self, election_path: &str) -> Option<String> {
        self.elections
            .get(election_path)
            .and_then(|queue| queue.front())
            .and_then(|key| self.participants.get(key))
            .map(|p| p.identity.clone())
    }

    fn identities_of(&self, election_path: &str) -> Vec<String> {
        self.elections
            .get(election_path)
            .map(|queue| {
                queue
                    .iter()
                    .filter_map(|key| self.participants.get(key))
                    .map(|p| p.identity.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Shared core of the coordinator, its sessions and participant threads
struct Cluster {
    state: Mutex<ClusterState>,
    changed: Condvar,
}

impl Cluster {
    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, ClusterState>) -> MutexGuard<'a, ClusterState> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process coordination service
#[derive(Clone)]
pub struct LocalCoordinator {
    cluster: Arc<Cluster>,
}

impl LocalCoordinator {
    /// Create an empty coordination service
    pub fn new() -> Self {
        Self {
            cluster: Arc::new(Cluster {
                state: Mutex::new(ClusterState::new()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Change the connectivity of `session` and notify its participants.
    ///
    /// A lost session drops out of every election; it re-enters once a
    /// connected state is reported again. Callbacks run on the calling
    /// thread, after the service's own lock is released.
    pub fn set_connectivity(&self, session: SessionId, state: ConnectionState) {
        let listeners: Vec<Arc<dyn ElectionListener>> = {
            let mut cluster = self.cluster.lock();
            match cluster.sessions.get_mut(&session) {
                Some(entry) if !entry.closed => entry.connection = state,
                _ => {
                    tracing::warn!("Ignoring connectivity change for closed session {}", session);
                    return;
                }
            }

            let keys = cluster.participants_of(session);
            for key in &keys {
                if state == ConnectionState::Lost {
                    cluster.dequeue(*key);
                } else if state.is_connected() {
                    cluster.enqueue(*key);
                }
            }
            self.cluster.changed.notify_all();

            keys.iter()
                .filter_map(|key| cluster.participants.get(key))
                .map(|p| p.listener.clone())
                .collect()
        };

        tracing::debug!("Session {} is now {}", session, state);
        for listener in listeners {
            listener.connectivity_changed(state);
        }
    }

    /// Change the connectivity of every open session
    pub fn set_connectivity_all(&self, state: ConnectionState) {
        let sessions: Vec<SessionId> = {
            let cluster = self.cluster.lock();
            cluster
                .sessions
                .iter()
                .filter(|(_, entry)| !entry.closed)
                .map(|(id, _)| *id)
                .collect()
        };

        for session in sessions {
            self.set_connectivity(session, state);
        }
    }

    /// Make node operations and election queries fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.cluster.lock().available = available;
    }

    /// Make the next `count` session starts fail with a retryable error
    pub fn fail_next_starts(&self, count: usize) {
        self.cluster.lock().failing_starts = count;
    }

    /// Session lifecycle events so far
    pub fn session_events(&self) -> Vec<SessionEvent> {
        self.cluster.lock().events.clone()
    }

    /// Number of leadership callbacks that returned an error
    pub fn failed_tenures(&self) -> usize {
        self.cluster.lock().failed_tenures
    }

    /// Whether a node exists, regardless of session or availability
    pub fn node_exists(&self, path: &str) -> bool {
        self.cluster.lock().namespace.exists(path).unwrap_or(false)
    }

    /// Names of the children of `path`, regardless of session or availability
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        self.cluster.lock().namespace.children(path)
    }

    /// Current leader of the election at `election_path`
    pub fn leader(&self, election_path: &str) -> Option<String> {
        self.cluster.lock().leader_of(election_path)
    }
}

impl Default for LocalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for LocalCoordinator {
    type Session = LocalSession;

    fn open(&self) -> Result<LocalSession> {
        let id = Uuid::new_v4();

        let mut cluster = self.cluster.lock();
        cluster.sessions.insert(
            id,
            SessionEntry {
                started: false,
                closed: false,
                connection: ConnectionState::Connected,
            },
        );
        cluster.events.push(SessionEvent::Opened(id));

        Ok(LocalSession::new(id, self.cluster.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::{ElectionHandle, Session};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Listener holding each tenure until released
    #[derive(Default)]
    struct Recorder {
        grants: AtomicUsize,
        /// Leader reported by the election view at each grant
        seen_leaders: Mutex<Vec<Option<String>>>,
        changes: Mutex<Vec<ConnectionState>>,
        release: Mutex<bool>,
        released: Condvar,
    }

    impl Recorder {
        fn release(&self) {
            *self.release.lock().unwrap() = true;
            self.released.notify_all();
        }
    }

    impl ElectionListener for Recorder {
        fn connectivity_changed(&self, state: ConnectionState) {
            self.changes.lock().unwrap().push(state);
        }

        fn take_leadership(&self, election: &dyn ElectionHandle) -> Result<()> {
            self.seen_leaders.lock().unwrap().push(election.current_leader()?);
            self.grants.fetch_add(1, Ordering::SeqCst);
            let mut release = self.release.lock().unwrap();
            while !*release {
                release = self.released.wait(release).unwrap();
            }
            *release = false;
            Ok(())
        }
    }

    fn started(coordinator: &LocalCoordinator) -> LocalSession {
        let session = coordinator.open().unwrap();
        session.start().unwrap();
        session
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_first_registered_leads() {
        let coordinator = LocalCoordinator::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        let session = started(&coordinator);
        let first = session.register("/election", "a:1", a.clone()).unwrap();
        let _second = session.register("/election", "b:1", b.clone()).unwrap();

        assert!(wait_until(|| a.grants.load(Ordering::SeqCst) == 1));
        assert_eq!(b.grants.load(Ordering::SeqCst), 0);
        assert_eq!(first.current_leader().unwrap().as_deref(), Some("a:1"));
        assert_eq!(first.participants().unwrap(), vec!["a:1", "b:1"]);

        // Relinquishing requeues at the tail and hands over leadership
        a.release();
        assert!(wait_until(|| b.grants.load(Ordering::SeqCst) == 1));
        assert_eq!(coordinator.leader("/election").as_deref(), Some("b:1"));
        assert_eq!(*a.seen_leaders.lock().unwrap(), vec![Some("a:1".to_string())]);
        assert_eq!(*b.seen_leaders.lock().unwrap(), vec![Some("b:1".to_string())]);
        assert_eq!(first.participants().unwrap(), vec!["b:1", "a:1"]);

        b.release();
        assert!(wait_until(|| a.grants.load(Ordering::SeqCst) == 2));
        a.release();
        first.close().unwrap();
    }

    #[test]
    fn test_lost_session_leaves_election() {
        let coordinator = LocalCoordinator::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        let session_a = started(&coordinator);
        let session_b = started(&coordinator);
        let handle_a = session_a.register("/election", "a:1", a.clone()).unwrap();
        let handle_b = session_b.register("/election", "b:1", b.clone()).unwrap();
        assert!(wait_until(|| a.grants.load(Ordering::SeqCst) == 1));

        coordinator.set_connectivity(session_a.id(), ConnectionState::Lost);
        assert_eq!(*a.changes.lock().unwrap(), vec![ConnectionState::Lost]);
        assert!(b.changes.lock().unwrap().is_empty());
        assert_eq!(handle_b.participants().unwrap(), vec!["b:1"]);

        a.release();
        assert!(wait_until(|| b.grants.load(Ordering::SeqCst) == 1));
        assert_eq!(handle_b.participants().unwrap(), vec!["b:1"]);

        coordinator.set_connectivity(session_a.id(), ConnectionState::Reconnected);
        assert_eq!(handle_b.participants().unwrap(), vec!["b:1", "a:1"]);

        b.release();
        assert!(wait_until(|| a.grants.load(Ordering::SeqCst) == 2));
        assert_eq!(handle_a.current_leader().unwrap().as_deref(), Some("a:1"));
    }

    #[test]
    fn test_close_is_not_repeatable() {
        let coordinator = LocalCoordinator::new();
        let session = started(&coordinator);
        let handle = session
            .register("/election", "a:1", Arc::new(Recorder::default()))
            .unwrap();

        session.close().unwrap();
        assert!(matches!(session.close(), Err(Error::AlreadyClosed)));
        assert!(matches!(handle.close(), Err(Error::AlreadyClosed)));
        assert!(matches!(session.exists("/"), Err(Error::SessionClosed)));
    }

    #[test]
    fn test_unavailable_service() {
        let coordinator = LocalCoordinator::new();
        let session = started(&coordinator);

        coordinator.set_available(false);
        assert!(matches!(session.exists("/a"), Err(Error::ConnectionLoss(_))));
        assert!(matches!(session.create("/a", true), Err(Error::ConnectionLoss(_))));

        coordinator.set_available(true);
        session.create("/a", true).unwrap();
        assert!(coordinator.node_exists("/a"));
    }

    #[test]
    fn test_unstarted_session_rejects_requests() {
        let coordinator = LocalCoordinator::new();
        let session = coordinator.open().unwrap();

        assert!(matches!(session.exists("/"), Err(Error::SessionClosed)));
        session.start().unwrap();
        assert!(session.exists("/").unwrap());
    }
}
