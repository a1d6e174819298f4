//! Strand CRDT - Observed-removed collection model
//!
//! This crate implements the local mirror used by collection proxies:
//! - Values keyed by entity id
//! - Membership keys accumulated per value
//! - Removal scoped to previously observed keys
//! - Snapshot import/export for full resynchronization

pub mod collection;

pub use collection::*;
