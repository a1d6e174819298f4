//! Big-collection proxy - pass-through access to stores too large to mirror
//!
//! No model, no versions, no resync. Every operation is a single
//! request/response round trip; reads page through a server-side cursor.

use std::sync::Arc;

use strand_core::{CursorId, CursorPage, Entity, EntityId, ParticleId, StoreRequest, StrandResult};

use crate::{Handle, ModelSnapshot, Notification, ProxyBase};

/// Proxy for a store read through cursors
pub struct BigCollectionProxy {
    base: ProxyBase,
}

impl BigCollectionProxy {
    pub fn new(base: ProxyBase) -> Self {
        BigCollectionProxy { base }
    }

    pub fn base(&self) -> &ProxyBase {
        &self.base
    }

    /// Readers get an immediate empty 'sync' so every proxy kind looks alike
    pub fn register(&self, handle: Arc<Handle>) -> StrandResult<()> {
        if handle.can_read() {
            self.base
                .scheduler()
                .enqueue(&handle, Notification::Sync(ModelSnapshot::Empty));
        }
        Ok(())
    }

    /// Store `value` and wait for the store to acknowledge
    pub async fn store(&self, value: Entity, keys: Vec<String>, particle: &ParticleId) -> StrandResult<()> {
        let store = self.base.id().clone();
        let particle = particle.clone();
        self.base
            .channel()
            .request("HandleStore", |ack| StoreRequest::HandleStore {
                store,
                value,
                keys,
                particle,
                ack: Some(ack),
            })
            .await
    }

    /// Remove `id` under every key the store has for it
    pub async fn remove(&self, id: &EntityId, particle: &ParticleId) -> StrandResult<()> {
        let store = self.base.id().clone();
        let id = id.clone();
        let particle = particle.clone();
        self.base
            .channel()
            .request("HandleRemove", |ack| StoreRequest::HandleRemove {
                store,
                id,
                keys: Vec::new(),
                particle,
                ack: Some(ack),
            })
            .await
    }

    /// Open a cursor. A zero page size uses the configured default.
    pub async fn stream(&self, page_size: usize, forward: bool) -> StrandResult<CursorId> {
        let page_size = if page_size == 0 {
            self.base.config().default_page_size
        } else {
            page_size
        };
        let store = self.base.id().clone();
        self.base
            .channel()
            .request("HandleStream", |reply| StoreRequest::HandleStream {
                store,
                page_size,
                forward,
                reply,
            })
            .await
    }

    pub async fn cursor_next(&self, cursor: CursorId) -> StrandResult<CursorPage> {
        let store = self.base.id().clone();
        self.base
            .channel()
            .request("StreamCursorNext", |reply| StoreRequest::StreamCursorNext {
                store,
                cursor,
                reply,
            })
            .await
    }

    pub fn cursor_close(&self, cursor: CursorId) -> StrandResult<()> {
        self.base.channel().send(StoreRequest::StreamCursorClose {
            store: self.base.id().clone(),
            cursor,
        })
    }
}
