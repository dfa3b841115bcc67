//! Primary Selector - Primary/Secondary Role Client
//!
//! Lets one process in a fleet of peers learn, through a coordination
//! service's leader election, whether it currently holds the exclusive
//! primary role, and lets the rest of the process block until a wanted role
//! is reached.
//!
//! # Architecture
//!
//! The coordination service is consumed through the small capability
//! interface in [`election`]: register a participant, get told when it wins,
//! get told when connectivity changes. [`PrimarySelector`] builds the
//! client-side protocol on top:
//!
//! - a guarded role with blocking, timed and async waits
//! - promotion on election win, demotion on any connectivity change
//! - a leader marker node published for the length of each tenure
//! - a double-connect session bootstrap that avoids stale sessions after a
//!   fast restart
//!
//! [`local::LocalCoordinator`] is an in-process coordination service
//! implementing the same interface.

pub mod config;
pub mod error;
pub mod state;
pub mod election;
pub mod local;

pub use config::SelectorConfig;
pub use error::{Error, Result};
pub use election::PrimarySelector;
pub use state::Role;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SelectorConfig;
    pub use crate::error::{Error, Result};
    pub use crate::election::{
        ConnectionState, Connector, ElectionHandle, ElectionListener, PrimarySelector,
        RetryPolicy, Session,
    };
    pub use crate::local::LocalCoordinator;
    pub use crate::state::{Role, RoleState};
}
