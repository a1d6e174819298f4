//! Error types for the storage layer

use thiserror::Error;

use crate::{EntityId, StoreId};

/// Core storage errors
#[derive(Error, Debug)]
pub enum StrandError {
    // Protocol errors
    #[error("Protocol violation on store {store}: {reason}")]
    ProtocolViolation { store: StoreId, reason: String },

    #[error("Operation {operation} is not supported by {kind} proxies")]
    UnsupportedOperation {
        kind: &'static str,
        operation: &'static str,
    },

    // Channel errors
    #[error("Store channel closed")]
    ChannelClosed,

    #[error("No response to {operation}")]
    NoResponse { operation: &'static str },

    // Model errors
    #[error("Entity {0} added without membership keys")]
    MissingKeys(EntityId),

    #[error("Entity {0} changed value without new membership keys")]
    ValueChangedWithoutNewKeys(EntityId),

    // Particle errors
    #[error("Particle callback failed: {0}")]
    Callback(String),
}

/// Result type for storage operations
pub type StrandResult<T> = Result<T, StrandError>;
