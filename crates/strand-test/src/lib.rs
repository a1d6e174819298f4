//! Strand Test Harness - End-to-end validation of the storage proxies
//!
//! This crate provides:
//! - An in-memory backing store serving the proxy request channel
//! - A chaos link that drops, duplicates and reorders pushed events
//! - A recording particle for asserting notification order
//! - A test bed wiring one proxy to one store
//! - Tracing setup for test runs

pub mod memory_store;
pub mod chaos;
pub mod particle;
pub mod bed;

pub use memory_store::*;
pub use chaos::*;
pub use particle::*;
pub use bed::*;

use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
