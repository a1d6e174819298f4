//! Strand Proxy - Client-side storage synchronization
//!
//! This crate mediates between particles and remote backing stores:
//! 1. Register handles and attach a store listener
//! 2. Request full resynchronization for keep-synced handles
//! 3. Stale-check, queue and apply pushed updates in version order
//! 4. Detect version gaps, desync and resync
//! 5. Apply local writes optimistically and suppress their echoes
//! 6. Deliver sync/update/desync notifications through the scheduler
//!
//! Three proxy variants share one capability interface: collections (CRDT
//! mirror), variables (barrier-gated last writer wins) and big collections
//! (non-mirroring, cursor based).

pub mod config;
pub mod channel;
pub mod handle;
pub mod scheduler;
pub mod base;
pub mod collection;
pub mod variable;
pub mod big_collection;
pub mod proxy;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::*;
pub use channel::*;
pub use handle::*;
pub use scheduler::*;
pub use base::*;
pub use collection::*;
pub use variable::*;
pub use big_collection::*;
pub use proxy::*;
