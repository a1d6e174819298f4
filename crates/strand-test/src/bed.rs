//! Single-proxy test bed
//!
//! Wires one proxy to one [`MemoryStore`] with a manually driven scheduler,
//! so a test decides exactly when requests are served, when pushed events
//! are applied and when notifications are delivered.

use std::sync::Arc;

use strand_core::StrandResult;
use strand_proxy::{
    BigCollectionProxy, CollectionProxy, Handle, HandleOptions, Particle, ProxyConfig, ProxyKind,
    RequestReceiver, Scheduler, SchedulerConfig, StorageProxy, StoreChannel, VariableProxy,
};

use crate::MemoryStore;

pub struct TestBed {
    pub store: MemoryStore,
    pub scheduler: Arc<Scheduler>,
    pub proxy: StorageProxy,
    requests: RequestReceiver,
}

impl TestBed {
    pub fn new(kind: ProxyKind) -> Self {
        let store = MemoryStore::new(format!("{}-store", kind), kind);
        let (channel, requests) = StoreChannel::new();
        let scheduler = Scheduler::with_config(SchedulerConfig::manual(), Some(channel.clone()));
        let proxy = StorageProxy::new(
            kind,
            store.id().clone(),
            channel,
            Arc::clone(&scheduler),
            ProxyConfig::with_id_base("!bed"),
        );
        TestBed {
            store,
            scheduler,
            proxy,
            requests,
        }
    }

    /// Register a handle named `name` for `particle`
    pub fn register(
        &self,
        name: &str,
        particle: Arc<dyn Particle>,
        options: HandleOptions,
    ) -> StrandResult<Arc<Handle>> {
        let handle = Arc::new(Handle::new(name, particle, options));
        self.proxy.register(Arc::clone(&handle))?;
        Ok(handle)
    }

    /// Serve every request the proxy has sent so far
    pub fn serve(&mut self) -> usize {
        self.store.serve_pending(&mut self.requests)
    }

    /// Apply every event the store has pushed so far
    pub fn apply(&self) -> StrandResult<usize> {
        self.proxy.drain_events()
    }

    /// Serve, apply and deliver until nothing moves
    pub fn pump(&mut self) -> StrandResult<()> {
        loop {
            let served = self.serve();
            let applied = self.apply()?;
            self.scheduler.dispatch();
            if served == 0 && applied == 0 {
                return Ok(());
            }
        }
    }

    pub fn collection(&self) -> Option<&Arc<CollectionProxy>> {
        self.proxy.as_collection()
    }

    pub fn variable(&self) -> Option<&Arc<VariableProxy>> {
        self.proxy.as_variable()
    }

    pub fn big_collection(&self) -> Option<&Arc<BigCollectionProxy>> {
        self.proxy.as_big_collection()
    }
}
