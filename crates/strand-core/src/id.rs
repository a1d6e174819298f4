//! Identity types for the storage layer
//!
//! String-backed identifiers are opaque to the proxies; they are only ever
//! compared for equality and echoed back to the store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Particle identity - the originator of local writes
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticleId(pub String);

impl ParticleId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Particle({})", self.0)
    }
}

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store identity - one backing store, mirrored by at most one proxy per process
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub String);

impl StoreId {
    pub fn new(id: impl Into<String>) -> Self {
        StoreId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store({})", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity identity - unique within a store
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Barrier token marking an in-flight variable write awaiting its echo
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Barrier(pub String);

impl Barrier {
    pub fn new(token: impl Into<String>) -> Self {
        Barrier(token.into())
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Barrier({})", self.0)
    }
}

/// Server-side cursor handle for streamed reads
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorId(pub u64);

impl CursorId {
    #[inline]
    pub fn new(id: u64) -> Self {
        CursorId(id)
    }
}

impl fmt::Debug for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

/// Store revision. Only ever moves forward on an accepted update or resync.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub const ZERO: Version = Version(0);

    #[inline]
    pub fn new(v: u64) -> Self {
        Version(v)
    }

    /// The version that immediately follows this one
    #[inline]
    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }

    /// True if `self` is at or behind `current`. An undefined current
    /// version never makes anything stale.
    #[inline]
    pub fn is_stale(self, current: Option<Version>) -> bool {
        current.map_or(false, |c| self <= c)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_staleness() {
        let v = Version::new(3);
        assert!(!v.is_stale(None));
        assert!(v.is_stale(Some(Version::new(3))));
        assert!(v.is_stale(Some(Version::new(4))));
        assert!(!v.is_stale(Some(Version::new(2))));
        assert_eq!(Version::new(2).next(), v);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = ParticleId::new("p1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p1\"");

        let version: Version = serde_json::from_str("7").unwrap();
        assert_eq!(version, Version::new(7));
    }

    proptest::proptest! {
        #[test]
        fn prop_next_is_never_stale(current in 0u64..u64::MAX) {
            let current = Version::new(current);
            proptest::prop_assert!(!current.next().is_stale(Some(current)));
            proptest::prop_assert!(current.is_stale(Some(current)));
        }
    }
}
