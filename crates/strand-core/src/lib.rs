//! Strand Core - Fundamental types for the storage synchronization layer
//!
//! This crate defines the types shared by every layer of the proxy stack:
//! - Identifiers (ParticleId, StoreId, EntityId, Barrier, CursorId, Version)
//! - Entity values held by stores
//! - Messages crossing the store boundary (requests, update events, sync responses)
//! - The error taxonomy

pub mod id;
pub mod entity;
pub mod wire;
pub mod error;

pub use id::*;
pub use entity::*;
pub use wire::*;
pub use error::*;
