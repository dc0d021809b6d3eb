//! Core modules for Cohort's coordination store.
//!
//! Shared primitives live here: the project layout, the datastore handle, errors, config,
//! glob matching and the read-only git changeset.

pub mod config;
pub mod db;
pub mod error;
pub mod glob;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;
pub mod vcs;
