//! CLI command implementations

pub mod config;
pub mod ls;
pub mod reap;
pub mod serve;

pub use config::execute as config;
pub use ls::execute as ls;
pub use reap::execute as reap;
pub use serve::execute as serve;
