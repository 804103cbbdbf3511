//! Core progress-tracking types for thesisboard.

pub mod command;
pub mod config;
pub mod defaults;
pub mod migration;
pub mod model;
pub mod progress;
pub mod reconcile;
pub mod storage;
pub mod store;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
