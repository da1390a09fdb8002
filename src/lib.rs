//! Artifact cache - path-addressed build cache over HTTP
//!
//! Build agents GET and PUT artifacts by relative path; each path maps to a
//! plain file under a per-scope cache root. Writes are atomic, reads never
//! see partial objects, and a retention reaper evicts files that have not
//! been written for the configured number of days.

pub mod access;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod reaper;
pub mod scope;
pub mod server;
pub mod store;

pub use error::{CacheError, CacheResult};
