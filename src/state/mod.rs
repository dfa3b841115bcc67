//! State Module
//!
//! The role this process currently plays and the waits built on it.

mod role;

pub use role::{Role, RoleState};
