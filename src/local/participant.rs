//! Election Participants
//!
//! Each registered participant gets a thread that waits until it heads its
//! election queue, runs the leadership callback, then leaves the queue and
//! re-enters at the tail while its session stays connected.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::Cluster;
use crate::election::ElectionHandle;
use crate::error::{Error, Result};

/// Pause before re-entering the election after a failed tenure
const FAILED_TENURE_BACKOFF: Duration = Duration::from_millis(20);

/// Election participation of one registered identity
pub struct LocalParticipation {
    cluster: Arc<Cluster>,
    key: u64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub(super) fn spawn(cluster: Arc<Cluster>, key: u64, identity: &str) -> Result<LocalParticipation> {
    let worker = {
        let cluster = cluster.clone();
        thread::Builder::new()
            .name(format!("election-{}", identity))
            .spawn(move || run(cluster, key))
    };

    match worker {
        Ok(worker) => Ok(LocalParticipation {
            cluster,
            key,
            worker: Mutex::new(Some(worker)),
        }),
        Err(e) => {
            let mut state = cluster.lock();
            state.dequeue(key);
            state.participants.remove(&key);
            cluster.changed.notify_all();
            Err(e.into())
        }
    }
}

fn run(cluster: Arc<Cluster>, key: u64) {
    loop {
        let (identity, listener) = {
            let mut state = cluster.lock();
            loop {
                let Some(participant) = state.participants.get(&key) else {
                    return;
                };
                if state.is_leader(key) {
                    break (participant.identity.clone(), participant.listener.clone());
                }
                state = cluster.wait(state);
            }
        };

        tracing::debug!("Granting leadership to {}", identity);
        let election = LocalParticipation::view(cluster.clone(), key);
        let result = listener.take_leadership(&election);

        {
            let mut state = cluster.lock();
            state.dequeue(key);
            if let Err(e) = &result {
                state.failed_tenures += 1;
                tracing::warn!("Leadership of {} ended with error: {}", identity, e);
            }
            if !state.participants.contains_key(&key) {
                cluster.changed.notify_all();
                return;
            }
            if result.is_ok() {
                state.requeue(key);
            }
            cluster.changed.notify_all();
        }

        if result.is_err() {
            thread::sleep(FAILED_TENURE_BACKOFF);
            let mut state = cluster.lock();
            state.requeue(key);
            cluster.changed.notify_all();
        }
    }
}

impl LocalParticipation {
    /// Handle without a worker, passed to the leadership callback
    fn view(cluster: Arc<Cluster>, key: u64) -> Self {
        Self {
            cluster,
            key,
            worker: Mutex::new(None),
        }
    }

    fn election_path(&self) -> Result<String> {
        let state = self.cluster.lock();
        state
            .participants
            .get(&self.key)
            .map(|p| p.election_path.clone())
            .ok_or(Error::AlreadyClosed)
    }
}

impl ElectionHandle for LocalParticipation {
    fn current_leader(&self) -> Result<Option<String>> {
        let election_path = self.election_path()?;
        let state = self.cluster.lock();
        state.check_available()?;
        Ok(state.leader_of(&election_path))
    }

    fn participants(&self) -> Result<Vec<String>> {
        let election_path = self.election_path()?;
        let state = self.cluster.lock();
        state.check_available()?;
        Ok(state.identities_of(&election_path))
    }

    fn close(&self) -> Result<()> {
        {
            let mut state = self.cluster.lock();
            if state.participants.remove(&self.key).is_none() {
                return Err(Error::AlreadyClosed);
            }
            state.dequeue(self.key);
            self.cluster.changed.notify_all();
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            // The leadership callback itself may close its participation
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                return Err(Error::Internal("election participant thread panicked".into()));
            }
        }

        Ok(())
    }
}
