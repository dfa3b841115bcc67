//! Local Session
//!
//! Session handle onto a [`LocalCoordinator`](super::LocalCoordinator).

use std::sync::Arc;

use super::participant;
use super::{Cluster, Participant, SessionEvent, SessionId};
use crate::election::{ElectionHandle, ElectionListener, Session};
use crate::error::{Error, Result};

/// Session opened against a [`LocalCoordinator`](super::LocalCoordinator)
pub struct LocalSession {
    id: SessionId,
    cluster: Arc<Cluster>,
}

impl LocalSession {
    pub(super) fn new(id: SessionId, cluster: Arc<Cluster>) -> Self {
        Self { id, cluster }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Session for LocalSession {
    fn start(&self) -> Result<()> {
        let mut cluster = self.cluster.lock();

        if cluster.failing_starts > 0 {
            cluster.failing_starts -= 1;
            return Err(Error::ConnectionLoss(format!("session {} failed to connect", self.id)));
        }

        let entry = cluster.sessions.get_mut(&self.id).ok_or(Error::SessionClosed)?;
        if entry.closed {
            return Err(Error::SessionClosed);
        }
        if entry.started {
            return Ok(());
        }

        entry.started = true;
        cluster.events.push(SessionEvent::Started(self.id));
        tracing::debug!("Session {} started", self.id);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut cluster = self.cluster.lock();

        let entry = cluster.sessions.get_mut(&self.id).ok_or(Error::AlreadyClosed)?;
        if entry.closed {
            return Err(Error::AlreadyClosed);
        }
        entry.closed = true;
        cluster.events.push(SessionEvent::Closed(self.id));

        for key in cluster.participants_of(self.id) {
            cluster.dequeue(key);
            cluster.participants.remove(&key);
        }
        self.cluster.changed.notify_all();

        tracing::debug!("Session {} closed", self.id);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let cluster = self.cluster.lock();
        cluster.check_session(self.id)?;
        cluster.check_available()?;
        cluster.namespace.exists(path)
    }

    fn create(&self, path: &str, create_parents: bool) -> Result<()> {
        let mut cluster = self.cluster.lock();
        cluster.check_session(self.id)?;
        cluster.check_available()?;
        cluster.namespace.create(path, create_parents)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut cluster = self.cluster.lock();
        cluster.check_session(self.id)?;
        cluster.check_available()?;
        cluster.namespace.delete(path)
    }

    fn register(
        &self,
        election_path: &str,
        identity: &str,
        listener: Arc<dyn ElectionListener>,
    ) -> Result<Box<dyn ElectionHandle>> {
        let key = {
            let mut cluster = self.cluster.lock();
            cluster.check_session(self.id)?;

            let key = cluster.next_participant;
            cluster.next_participant += 1;
            cluster.participants.insert(
                key,
                Participant {
                    identity: identity.to_string(),
                    election_path: election_path.to_string(),
                    session: self.id,
                    listener,
                },
            );
            cluster.requeue(key);
            self.cluster.changed.notify_all();
            key
        };

        let participation = participant::spawn(self.cluster.clone(), key, identity)?;
        tracing::debug!("Registered {} for election {}", identity, election_path);

        Ok(Box::new(participation) as Box<dyn ElectionHandle>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::Connector;
    use crate::local::LocalCoordinator;

    #[test]
    fn test_start_is_idempotent() {
        let coordinator = LocalCoordinator::new();
        let session = coordinator.open().unwrap();

        session.start().unwrap();
        session.start().unwrap();

        let started = coordinator
            .session_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Started(_)))
            .count();
        assert_eq!(started, 1);
    }

    #[test]
    fn test_node_operations() {
        let coordinator = LocalCoordinator::new();
        let session = coordinator.open().unwrap();
        session.start().unwrap();

        assert!(!session.exists("/leader/h1:1000").unwrap());
        session.create("/leader/h1:1000", true).unwrap();
        assert!(session.exists("/leader/h1:1000").unwrap());
        assert_eq!(coordinator.children("/leader").unwrap(), vec!["h1:1000"]);

        session.delete("/leader/h1:1000").unwrap();
        assert!(matches!(session.delete("/leader/h1:1000"), Err(Error::NoNode(_))));
    }

    #[test]
    fn test_failed_start_is_retryable() {
        let coordinator = LocalCoordinator::new();
        coordinator.fail_next_starts(1);

        let session = coordinator.open().unwrap();
        let err = session.start().unwrap_err();
        assert!(err.is_retryable());
        session.start().unwrap();
    }
}
