//! Primary Selector
//!
//! Bridges the coordination service's leader election to the process-wide
//! [`RoleState`]. Winning the election promotes this process to primary and
//! publishes a marker node named after its identity; any connectivity change
//! demotes it, which ends the tenure and removes the marker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::bootstrap::{connect_fresh, RetryPolicy};
use super::{ConnectionState, Connector, ElectionHandle, ElectionListener, Session};
use crate::config::SelectorConfig;
use crate::error::{Error, Result};
use crate::state::{Role, RoleState};

/// Derive the `host:port` identity of a participant from its bind address
pub(crate) fn identity_from_address(address: &str) -> Result<String> {
    let invalid = || Error::InvalidAddress(address.to_string());

    let (host, port) = address.trim().rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;

    Ok(format!("{}:{}", host, port))
}

/// State shared with the election primitive's callback threads
struct Shared<S: Session> {
    /// Election all peers register under
    election_path: String,
    /// Marker namespace, always ending with '/'
    leader_folder: String,
    /// Session produced by the bootstrap
    session: S,
    /// Role of this process
    role: RoleState,
    /// Participant identity, set once `start` registered
    identity: OnceLock<String>,
    /// Election participation, set once `start` registered
    election: OnceLock<Box<dyn ElectionHandle>>,
    /// Held from the moment `start` begins registering
    joining: AtomicBool,
}

impl<S: Session> Shared<S> {
    fn marker_path(&self, identity: &str) -> String {
        format!("{}{}", self.leader_folder, identity)
    }

    /// Replace any marker left behind by an earlier tenure of this identity
    fn publish_marker(&self, marker: &str) -> Result<()> {
        if self.session.exists(marker)? {
            tracing::info!("Deleting stale leader marker {}", marker);
            self.session.delete(marker)?;
        }

        tracing::info!("Creating leader marker {}", marker);
        self.session.create(marker, true)
    }

    /// Log who leads and who participates. Failures are only logged.
    fn log_election_view(&self, election: &dyn ElectionHandle) {
        match election.current_leader() {
            Ok(Some(leader)) => tracing::info!("The current leader is {}", leader),
            Ok(None) => tracing::info!("No leader is currently elected"),
            Err(e) => tracing::warn!("Failed to look up the current leader: {}", e),
        }

        match election.participants() {
            Ok(participants) => tracing::info!("All participants: {:?}", participants),
            Err(e) => tracing::warn!("Failed to list election participants: {}", e),
        }
    }
}

/// Listener registered by `start` on behalf of one identity
struct Candidate<S: Session> {
    shared: Arc<Shared<S>>,
    identity: String,
}

impl<S: Session> ElectionListener for Candidate<S> {
    fn connectivity_changed(&self, state: ConnectionState) {
        // Never assume leadership survives a connectivity change
        self.shared.role.set(Role::Secondary);
        tracing::info!("Coordination service connection is now {}", state);

        if !state.is_connected() {
            return;
        }

        if let Some(election) = self.shared.election.get() {
            match election.current_leader() {
                Ok(Some(leader)) => tracing::info!("The current leader is {}", leader),
                Ok(None) => {}
                Err(e) => tracing::error!("Failed to look up the current leader: {}", e),
            }
        }
    }

    fn take_leadership(&self, election: &dyn ElectionHandle) -> Result<()> {
        let shared = &self.shared;
        let identity = &self.identity;

        if !shared.role.set(Role::Primary) {
            tracing::warn!("{} was granted leadership after shutdown, declining", identity);
            return Err(Error::Interrupted);
        }

        // Confirm only after promoting: a demotion racing this grant is then
        // either visible here or delivered after the promotion.
        match election.current_leader() {
            Ok(Some(leader)) if leader == *identity => {}
            Ok(leader) => {
                tracing::warn!(
                    "{} was granted leadership but the leader is now {:?}, declining",
                    identity,
                    leader
                );
                shared.role.set(Role::Secondary);
                return Ok(());
            }
            Err(e) => {
                tracing::error!("{} failed to confirm leadership: {}", identity, e);
                shared.role.set(Role::Secondary);
                return Err(e);
            }
        }

        let marker = shared.marker_path(identity);
        if let Err(e) = shared.publish_marker(&marker) {
            tracing::error!("{} failed to publish leader marker {}: {}", identity, marker, e);
            shared.role.set(Role::Secondary);
            return Err(e);
        }
        tracing::info!("{} is now the leader.", identity);

        // This thread is the lease: hold it until demoted or interrupted
        let held = shared.role.hold_while(Role::Primary);
        if let Err(e) = &held {
            tracing::error!("{} was interrupted: {}", identity, e);
        }

        tracing::warn!("{} relinquishing leadership.", identity);
        shared.log_election_view(election);
        shared.session.delete(&marker)?;

        held
    }
}

/// Election client deciding whether this process is the primary.
///
/// Construction bootstraps a fresh session; [`start`](Self::start) joins the
/// election. Other components block on [`wait_for_role`](Self::wait_for_role)
/// (or its timed and async variants) until the role they need is reached.
pub struct PrimarySelector<S: Session> {
    shared: Arc<Shared<S>>,
}

impl<S: Session> PrimarySelector<S> {
    /// Connect through `connector` and prepare to join the election at
    /// `election_path`, publishing markers under `leader_path`.
    pub fn new<C>(
        connector: &C,
        election_path: impl Into<String>,
        leader_path: &str,
        retry: &RetryPolicy,
    ) -> Result<Self>
    where
        C: Connector<Session = S>,
    {
        let leader_folder = if leader_path.ends_with('/') {
            leader_path.to_string()
        } else {
            format!("{}/", leader_path)
        };

        let session = connect_fresh(connector, retry)?;

        Ok(Self {
            shared: Arc::new(Shared {
                election_path: election_path.into(),
                leader_folder,
                session,
                role: RoleState::new(),
                identity: OnceLock::new(),
                election: OnceLock::new(),
                joining: AtomicBool::new(false),
            }),
        })
    }

    /// Build a selector from the `[election]` and `[retry]` configuration
    pub fn from_config<C>(connector: &C, config: &SelectorConfig) -> Result<Self>
    where
        C: Connector<Session = S>,
    {
        Self::new(
            connector,
            config.election.election_path.clone(),
            &config.election.leader_path,
            &config.retry_policy(),
        )
    }

    /// Join the election as the participant bound at `bind_address`.
    ///
    /// May only succeed once; a failed registration can be retried. If this
    /// process wins, the leadership callback can fire before this returns.
    pub fn start(&self, bind_address: &str) -> Result<()> {
        if self.shared.role.is_interrupted() {
            return Err(Error::AlreadyClosed);
        }

        let identity = identity_from_address(bind_address)?;
        if self.shared.joining.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }

        let listener: Arc<dyn ElectionListener> = Arc::new(Candidate {
            shared: self.shared.clone(),
            identity: identity.clone(),
        });
        let election = match self.shared.session.register(
            &self.shared.election_path,
            &identity,
            listener,
        ) {
            Ok(election) => election,
            Err(e) => {
                // Nothing joined, so a later start may try again
                self.shared.joining.store(false, Ordering::Release);
                return Err(Error::Registration {
                    identity,
                    reason: e.to_string(),
                });
            }
        };

        self.shared.identity.get_or_init(|| identity.clone());
        if let Err(election) = self.shared.election.set(election) {
            if let Err(e) = election.close() {
                tracing::debug!("Failed to close duplicate registration: {}", e);
            }
            return Err(Error::AlreadyStarted);
        }

        tracing::info!(
            "Joined election {} as {}",
            self.shared.election_path,
            identity
        );
        Ok(())
    }

    /// Stop participating for good.
    ///
    /// A live tenure is interrupted and its marker removed before the
    /// election and the session are closed. Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        self.shared.role.interrupt();

        if let Some(election) = self.shared.election.get() {
            match election.close() {
                Ok(()) => tracing::info!("Left election {}", self.shared.election_path),
                Err(Error::AlreadyClosed) => {
                    tracing::debug!("Election participation already closed");
                }
                Err(e) => return Err(e),
            }
        }

        match self.shared.session.close() {
            Ok(()) | Err(Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Alias for [`close`](Self::close)
    pub fn stop(&self) -> Result<()> {
        self.close()
    }

    /// Identity of this participant, once started
    pub fn identity(&self) -> Option<&str> {
        self.shared.identity.get().map(String::as_str)
    }

    /// Marker path this participant publishes while primary, once started
    pub fn marker_path(&self) -> Option<String> {
        self.identity().map(|identity| self.shared.marker_path(identity))
    }

    /// Election path shared by all peers
    pub fn election_path(&self) -> &str {
        &self.shared.election_path
    }

    /// Identities of all registered participants.
    ///
    /// Failures are logged and returned; they never affect the role.
    pub fn participants(&self) -> Result<Vec<String>> {
        let election = self.shared.election.get().ok_or(Error::NotStarted)?;
        election
            .participants()
            .inspect_err(|e| tracing::error!("Failed to list election participants: {}", e))
    }

    /// Identity of the current leader, if one is elected.
    ///
    /// Failures are logged and returned; they never affect the role.
    pub fn leader(&self) -> Result<Option<String>> {
        let election = self.shared.election.get().ok_or(Error::NotStarted)?;
        election
            .current_leader()
            .inspect_err(|e| tracing::error!("Failed to look up the current leader: {}", e))
    }

    /// Current role
    pub fn role(&self) -> Role {
        self.shared.role.role()
    }

    /// Block until this process has `role`
    pub fn wait_for_role(&self, role: Role) -> Result<()> {
        self.shared.role.wait_for_role(role)
    }

    /// Block until this process has `role` or `timeout` passes
    pub fn wait_for_role_timeout(&self, role: Role, timeout: Duration) -> Result<bool> {
        self.shared.role.wait_for_role_timeout(role, timeout)
    }

    /// Wait asynchronously until this process has `role`
    pub async fn wait_for_role_async(&self, role: Role) -> Result<()> {
        self.shared.role.wait_for_role_async(role).await
    }

    /// Session owned by this selector
    pub fn session(&self) -> &S {
        &self.shared.session
    }
}

impl<S: Session> Drop for PrimarySelector<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close primary selector: {}", e);
        }
    }
}
