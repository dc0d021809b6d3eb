//! Subsystems built on the core datastore.

pub mod bulletin;
pub mod claim;
pub mod encounter;
pub mod health;
pub mod policy;
pub mod policy_detect;
pub mod session;
pub mod watcher;
