//! Role State
//!
//! Holds the role this participant currently plays. The election controller
//! is the only writer; any number of threads (or tasks) may wait for a role.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Role of this process in the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Holds the exclusive primary role
    Primary,
    /// Any other participant
    Secondary,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "PRIMARY"),
            Role::Secondary => write!(f, "SECONDARY"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    role: Role,
    /// Set once by shutdown; no transitions happen afterwards
    interrupted: bool,
}

/// Guarded role value with blocking and async waits.
///
/// Every mutation happens under `current` and is followed by a broadcast on
/// `changed` and a publish on the watch channel, so blocking and async
/// waiters observe the same sequence of values.
pub struct RoleState {
    current: Mutex<Snapshot>,
    changed: Condvar,
    published: watch::Sender<Snapshot>,
}

impl RoleState {
    /// Create a role state starting as [`Role::Secondary`]
    pub fn new() -> Self {
        let initial = Snapshot {
            role: Role::Secondary,
            interrupted: false,
        };
        let (published, _) = watch::channel(initial);

        Self {
            current: Mutex::new(initial),
            changed: Condvar::new(),
            published,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Snapshot>) -> MutexGuard<'a, Snapshot> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Current role
    pub fn role(&self) -> Role {
        self.lock().role
    }

    /// Whether shutdown has interrupted this state
    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    /// Assign a new role and wake every waiter.
    ///
    /// Returns `false` (and changes nothing) once the state was interrupted.
    pub(crate) fn set(&self, role: Role) -> bool {
        let mut current = self.lock();
        if current.interrupted {
            return false;
        }

        current.role = role;
        self.published.send_replace(*current);
        self.changed.notify_all();
        true
    }

    /// Terminal transition: demote to secondary and fail every wait that can
    /// no longer be satisfied.
    pub(crate) fn interrupt(&self) {
        let mut current = self.lock();
        current.role = Role::Secondary;
        current.interrupted = true;
        self.published.send_replace(*current);
        self.changed.notify_all();
    }

    /// Block the calling thread until the role equals `target`.
    ///
    /// Returns [`Error::Interrupted`] if shutdown happens while the role is
    /// still different from `target`.
    pub fn wait_for_role(&self, target: Role) -> Result<()> {
        let mut current = self.lock();
        loop {
            if current.role == target {
                return Ok(());
            }
            if current.interrupted {
                return Err(Error::Interrupted);
            }
            current = self.wait(current);
        }
    }

    /// Like [`wait_for_role`](Self::wait_for_role) but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` when the deadline passed first.
    pub fn wait_for_role_timeout(&self, target: Role, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut current = self.lock();
        loop {
            if current.role == target {
                return Ok(true);
            }
            if current.interrupted {
                return Err(Error::Interrupted);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .changed
                .wait_timeout(current, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            current = guard;
        }
    }

    /// Async counterpart of [`wait_for_role`](Self::wait_for_role)
    pub async fn wait_for_role_async(&self, target: Role) -> Result<()> {
        let mut rx = self.published.subscribe();
        let snapshot = *rx
            .wait_for(|s| s.role == target || s.interrupted)
            .await
            .map_err(|_| Error::Interrupted)?;

        if snapshot.role == target {
            Ok(())
        } else {
            Err(Error::Interrupted)
        }
    }

    /// Block while the role equals `role`. Interruption takes precedence over
    /// the role check.
    pub(crate) fn hold_while(&self, role: Role) -> Result<()> {
        let mut current = self.lock();
        loop {
            if current.interrupted {
                return Err(Error::Interrupted);
            }
            if current.role != role {
                return Ok(());
            }
            current = self.wait(current);
        }
    }
}

impl Default for RoleState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_role() {
        let state = RoleState::new();
        assert_eq!(state.role(), Role::Secondary);
        assert!(!state.is_interrupted());
        state.wait_for_role(Role::Secondary).unwrap();
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Primary.to_string(), "PRIMARY");
        assert_eq!(Role::Secondary.to_string(), "SECONDARY");
    }

    #[test]
    fn test_parked_waiter_wakes_on_promotion() {
        let state = Arc::new(RoleState::new());

        let waiter = {
            let state = state.clone();
            thread::spawn(move || state.wait_for_role(Role::Primary))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        assert!(state.set(Role::Primary));
        waiter.join().unwrap().unwrap();
        assert_eq!(state.role(), Role::Primary);
    }

    #[test]
    fn test_every_waiter_is_woken() {
        let state = Arc::new(RoleState::new());

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || state.wait_for_role(Role::Primary))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        state.set(Role::Primary);

        for waiter in waiters {
            waiter.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_readers_agree_after_set() {
        let state = Arc::new(RoleState::new());
        state.set(Role::Primary);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || state.role())
            })
            .collect();

        for reader in readers {
            assert_eq!(reader.join().unwrap(), Role::Primary);
        }
    }

    #[test]
    fn test_wait_timeout() {
        let state = RoleState::new();
        let reached = state
            .wait_for_role_timeout(Role::Primary, Duration::from_millis(30))
            .unwrap();
        assert!(!reached);

        state.set(Role::Primary);
        let reached = state
            .wait_for_role_timeout(Role::Primary, Duration::from_millis(30))
            .unwrap();
        assert!(reached);
    }

    #[test]
    fn test_interrupt_fails_unreachable_waits() {
        let state = Arc::new(RoleState::new());

        let waiter = {
            let state = state.clone();
            thread::spawn(move || state.wait_for_role(Role::Primary))
        };

        thread::sleep(Duration::from_millis(50));
        state.interrupt();

        assert!(matches!(waiter.join().unwrap(), Err(Error::Interrupted)));
        assert!(state.wait_for_role(Role::Secondary).is_ok());

        // Terminal: later writes are ignored
        assert!(!state.set(Role::Primary));
        assert_eq!(state.role(), Role::Secondary);
    }

    #[test]
    fn test_hold_released_by_demotion() {
        let state = Arc::new(RoleState::new());
        state.set(Role::Primary);

        let holder = {
            let state = state.clone();
            thread::spawn(move || state.hold_while(Role::Primary))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!holder.is_finished());

        state.set(Role::Secondary);
        holder.join().unwrap().unwrap();
    }

    #[test]
    fn test_hold_released_by_interrupt() {
        let state = Arc::new(RoleState::new());
        state.set(Role::Primary);

        let holder = {
            let state = state.clone();
            thread::spawn(move || state.hold_while(Role::Primary))
        };

        thread::sleep(Duration::from_millis(50));
        state.interrupt();

        assert!(matches!(holder.join().unwrap(), Err(Error::Interrupted)));
    }

    #[tokio::test]
    async fn test_async_wait() {
        let state = Arc::new(RoleState::new());

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_role_async(Role::Primary).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.set(Role::Primary);

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_async_wait_interrupted() {
        let state = Arc::new(RoleState::new());

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_role_async(Role::Primary).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.interrupt();

        assert!(matches!(waiter.await.unwrap(), Err(Error::Interrupted)));
    }
}
