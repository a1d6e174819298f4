//! Proxy factory - one closed union over every proxy variant
//!
//! Callers pick the variant by store kind once, at construction. The
//! operations every variant supports go through the [`Proxy`] capability
//! trait; variant-specific reads and writes are reached through the
//! `as_*` accessors.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use strand_core::{ParticleId, StoreEvent, StoreId, StrandError, StrandResult};

use crate::{
    BigCollectionProxy, CollectionModel, CollectionProxy, Handle, ModelSnapshot, ProxyBase,
    ProxyConfig, ProxyModel, Scheduler, StoreChannel, SyncedProxy, VariableModel, VariableProxy,
};

/// Store kind a proxy is built for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyKind {
    Collection,
    Variable,
    BigCollection,
}

impl ProxyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyKind::Collection => CollectionModel::KIND,
            ProxyKind::Variable => VariableModel::KIND,
            ProxyKind::BigCollection => "big-collection",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations shared by every proxy variant
pub trait Proxy: Send + Sync {
    fn base(&self) -> &ProxyBase;

    fn kind(&self) -> ProxyKind;

    /// Bind a handle to this proxy
    fn register(&self, handle: Arc<Handle>) -> StrandResult<()>;

    fn id(&self) -> &StoreId {
        self.base().id()
    }

    fn generate_id(&self) -> String {
        self.base().generate_id()
    }

    fn generate_id_components(&self) -> (String, u64) {
        self.base().generate_id_components()
    }

    fn raise_system_exception(
        &self,
        exception: &str,
        method: &str,
        particle: ParticleId,
    ) -> StrandResult<()> {
        self.base().raise_system_exception(exception, method, particle)
    }
}

impl Proxy for CollectionProxy {
    fn base(&self) -> &ProxyBase {
        &self.base
    }

    fn kind(&self) -> ProxyKind {
        ProxyKind::Collection
    }

    fn register(&self, handle: Arc<Handle>) -> StrandResult<()> {
        SyncedProxy::register(self, handle)
    }
}

impl Proxy for VariableProxy {
    fn base(&self) -> &ProxyBase {
        &self.base
    }

    fn kind(&self) -> ProxyKind {
        ProxyKind::Variable
    }

    fn register(&self, handle: Arc<Handle>) -> StrandResult<()> {
        SyncedProxy::register(self, handle)
    }
}

impl Proxy for BigCollectionProxy {
    fn base(&self) -> &ProxyBase {
        BigCollectionProxy::base(self)
    }

    fn kind(&self) -> ProxyKind {
        ProxyKind::BigCollection
    }

    fn register(&self, handle: Arc<Handle>) -> StrandResult<()> {
        BigCollectionProxy::register(self, handle)
    }
}

/// A proxy of any kind
#[derive(Clone)]
pub enum StorageProxy {
    Collection(Arc<CollectionProxy>),
    Variable(Arc<VariableProxy>),
    BigCollection(Arc<BigCollectionProxy>),
}

impl StorageProxy {
    /// Build the proxy variant for `kind`
    pub fn new(
        kind: ProxyKind,
        id: StoreId,
        channel: StoreChannel,
        scheduler: Arc<Scheduler>,
        config: ProxyConfig,
    ) -> Self {
        tracing::debug!(store = %id, %kind, "creating storage proxy");
        let base = ProxyBase::new(id, channel, scheduler, config);
        match kind {
            ProxyKind::Collection => {
                StorageProxy::Collection(Arc::new(CollectionProxy::new_collection(base)))
            }
            ProxyKind::Variable => {
                StorageProxy::Variable(Arc::new(VariableProxy::new_variable(base)))
            }
            ProxyKind::BigCollection => {
                StorageProxy::BigCollection(Arc::new(BigCollectionProxy::new(base)))
            }
        }
    }

    fn as_proxy(&self) -> &dyn Proxy {
        match self {
            StorageProxy::Collection(p) => &**p,
            StorageProxy::Variable(p) => &**p,
            StorageProxy::BigCollection(p) => &**p,
        }
    }

    pub fn kind(&self) -> ProxyKind {
        self.as_proxy().kind()
    }

    pub fn id(&self) -> &StoreId {
        self.as_proxy().id()
    }

    pub fn register(&self, handle: Arc<Handle>) -> StrandResult<()> {
        self.as_proxy().register(handle)
    }

    pub fn generate_id(&self) -> String {
        self.as_proxy().generate_id()
    }

    pub fn raise_system_exception(
        &self,
        exception: &str,
        method: &str,
        particle: ParticleId,
    ) -> StrandResult<()> {
        self.as_proxy().raise_system_exception(exception, method, particle)
    }

    pub fn as_collection(&self) -> Option<&Arc<CollectionProxy>> {
        match self {
            StorageProxy::Collection(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Arc<VariableProxy>> {
        match self {
            StorageProxy::Variable(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_big_collection(&self) -> Option<&Arc<BigCollectionProxy>> {
        match self {
            StorageProxy::BigCollection(p) => Some(p),
            _ => None,
        }
    }

    fn unsupported(&self, operation: &'static str) -> StrandError {
        StrandError::UnsupportedOperation {
            kind: self.kind().as_str(),
            operation,
        }
    }

    /// Apply one pushed store event. Big collections never attach a
    /// listener, so an event for one is a contract mismatch.
    pub fn on_event(&self, event: StoreEvent) -> StrandResult<()> {
        match self {
            StorageProxy::Collection(p) => p.on_event(event),
            StorageProxy::Variable(p) => p.on_event(event),
            StorageProxy::BigCollection(_) => Err(self.unsupported("on_event")),
        }
    }

    /// Apply every buffered store event
    pub fn drain_events(&self) -> StrandResult<usize> {
        match self {
            StorageProxy::Collection(p) => p.drain_events(),
            StorageProxy::Variable(p) => p.drain_events(),
            StorageProxy::BigCollection(_) => Ok(0),
        }
    }

    /// Apply store events until the store hangs up
    pub async fn run_events(&self) -> StrandResult<()> {
        match self {
            StorageProxy::Collection(p) => p.run_events().await,
            StorageProxy::Variable(p) => p.run_events().await,
            StorageProxy::BigCollection(_) => Ok(()),
        }
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        match self {
            StorageProxy::Collection(p) => p.snapshot(),
            StorageProxy::Variable(p) => p.snapshot(),
            StorageProxy::BigCollection(_) => ModelSnapshot::Empty,
        }
    }
}

impl fmt::Debug for StorageProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageProxy")
            .field("kind", &self.kind())
            .field("id", self.id())
            .finish()
    }
}
