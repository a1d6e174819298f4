//! In-memory backing store
//!
//! Answers every request a proxy sends and pushes update and sync events to
//! attached listeners, the way a remote store would. Pushes can be held back
//! and released (or fed through a [`crate::ChaosLink`]) to simulate a slow or
//! hostile transport.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use strand_core::{
    Barrier, CursorId, CursorPage, Entity, EntityId, EventSender, ModelEntry, ParticleId,
    RemoveItem, StoreEvent, StoreId, StoreRequest, SyncResponse, UpdateEntry, UpdateEvent,
    Version,
};
use strand_crdt::CrdtCollectionModel;
use strand_proxy::{ProxyKind, RequestReceiver};

/// A raised system exception, as received by the store
#[derive(Clone, Debug, PartialEq)]
pub struct RaisedException {
    pub exception: String,
    pub method: String,
    pub particle: ParticleId,
}

struct Cursor {
    remaining: VecDeque<Entity>,
    page_size: usize,
}

struct StoreState {
    kind: ProxyKind,
    version: Version,
    crdt: CrdtCollectionModel,
    value: Option<Entity>,
    listeners: Vec<EventSender>,
    /// Pushes waiting for release while held
    held: Option<Vec<(EventSender, StoreEvent)>>,
    cursors: HashMap<CursorId, Cursor>,
    next_cursor: u64,
    next_key: u64,
    operations: Vec<&'static str>,
    exceptions: Vec<RaisedException>,
}

impl StoreState {
    fn push(&mut self, listener: &EventSender, event: StoreEvent) {
        match self.held.as_mut() {
            Some(held) => held.push((listener.clone(), event)),
            None => {
                if listener.send(event).is_err() {
                    tracing::debug!("listener gone, push dropped");
                }
            }
        }
    }

    fn broadcast(&mut self, update: UpdateEvent) {
        let listeners = self.listeners.clone();
        for listener in &listeners {
            self.push(listener, StoreEvent::Update(update.clone()));
        }
    }

    fn fresh_key(&mut self, store: &StoreId) -> String {
        self.next_key += 1;
        format!("{}:key{}", store, self.next_key)
    }

    fn model(&self) -> Vec<ModelEntry> {
        match self.kind {
            ProxyKind::Variable => self
                .value
                .iter()
                .map(|value| ModelEntry::new(value.clone(), Vec::new()))
                .collect(),
            _ => self.crdt.to_entries(),
        }
    }

    fn list(&self) -> Vec<Entity> {
        match self.kind {
            ProxyKind::Variable => self.value.iter().cloned().collect(),
            _ => self.crdt.to_list(),
        }
    }

    fn store_value(&mut self, value: Entity, keys: Vec<String>) -> UpdateEntry {
        let effective = match self.crdt.add(value.id.clone(), value.clone(), &keys) {
            Ok(changed) => changed,
            Err(err) => {
                tracing::warn!(error = %err, "rejected store");
                false
            }
        };
        UpdateEntry::new(value, keys, effective)
    }

    fn remove_value(&mut self, id: &EntityId, keys: Vec<String>) -> Option<UpdateEntry> {
        let value = self.crdt.get_value(id)?.clone();
        // No keys means every key the store has
        let keys = if keys.is_empty() {
            self.crdt.get_keys(id)
        } else {
            keys
        };
        let effective = self.crdt.remove(id, &keys);
        Some(UpdateEntry::new(value, keys, effective))
    }

    fn set_value(&mut self, data: Option<Entity>, particle: Option<ParticleId>, barrier: Option<Barrier>) {
        self.value = data.clone();
        self.version = self.version.next();
        let mut update = UpdateEvent::data(self.version, data);
        update.originator_id = particle;
        update.barrier = barrier;
        self.broadcast(update);
    }
}

/// Shared in-memory store. Clones refer to the same store.
#[derive(Clone)]
pub struct MemoryStore {
    id: StoreId,
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new(id: impl Into<String>, kind: ProxyKind) -> Self {
        MemoryStore {
            id: StoreId::new(id),
            state: Arc::new(Mutex::new(StoreState {
                kind,
                version: Version::ZERO,
                crdt: CrdtCollectionModel::new(),
                value: None,
                listeners: Vec::new(),
                held: None,
                cursors: HashMap::new(),
                next_cursor: 0,
                next_key: 0,
                operations: Vec::new(),
                exceptions: Vec::new(),
            })),
        }
    }

    pub fn id(&self) -> &StoreId {
        &self.id
    }

    /// Serve one request
    pub fn handle(&self, request: StoreRequest) {
        let mut state = self.state.lock();
        state.operations.push(request.operation());
        tracing::trace!(store = %self.id, operation = request.operation(), "serving request");

        match request {
            StoreRequest::InitializeProxy { listener, .. } => {
                state.listeners.push(listener);
            }
            StoreRequest::SynchronizeProxy { listener, .. } => {
                let response = SyncResponse::new(state.version, state.model());
                state.push(&listener, StoreEvent::Synchronize(response));
            }
            StoreRequest::HandleGet { reply, .. } => {
                let _ = reply.send(state.value.clone());
            }
            StoreRequest::HandleToList { reply, .. } => {
                let _ = reply.send(state.list());
            }
            StoreRequest::HandleSet {
                data,
                particle,
                barrier,
                ..
            } => state.set_value(Some(data), Some(particle), barrier),
            StoreRequest::HandleClear {
                particle, barrier, ..
            } => state.set_value(None, Some(particle), barrier),
            StoreRequest::HandleStore {
                value,
                keys,
                particle,
                ack,
                ..
            } => {
                let entry = state.store_value(value, keys);
                state.version = state.version.next();
                let update = UpdateEvent::add(state.version, vec![entry]).with_originator(particle);
                state.broadcast(update);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            StoreRequest::HandleRemove {
                id,
                keys,
                particle,
                ack,
                ..
            } => {
                if let Some(entry) = state.remove_value(&id, keys) {
                    state.version = state.version.next();
                    let update =
                        UpdateEvent::remove(state.version, vec![entry]).with_originator(particle);
                    state.broadcast(update);
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            StoreRequest::HandleRemoveMultiple {
                items, particle, ..
            } => {
                // An empty list clears everything the store has
                let items = if items.is_empty() {
                    state
                        .crdt
                        .to_list()
                        .into_iter()
                        .map(|entity| RemoveItem {
                            id: entity.id,
                            keys: Vec::new(),
                        })
                        .collect()
                } else {
                    items
                };
                let entries: Vec<UpdateEntry> = items
                    .into_iter()
                    .filter_map(|item| state.remove_value(&item.id, item.keys))
                    .collect();
                if !entries.is_empty() {
                    state.version = state.version.next();
                    let update =
                        UpdateEvent::remove(state.version, entries).with_originator(particle);
                    state.broadcast(update);
                }
            }
            StoreRequest::HandleStream {
                page_size,
                forward,
                reply,
                ..
            } => {
                let mut values = state.crdt.to_list();
                if !forward {
                    values.reverse();
                }
                state.next_cursor += 1;
                let cursor = CursorId::new(state.next_cursor);
                state.cursors.insert(
                    cursor,
                    Cursor {
                        remaining: values.into(),
                        page_size: page_size.max(1),
                    },
                );
                let _ = reply.send(cursor);
            }
            StoreRequest::StreamCursorNext { cursor, reply, .. } => {
                let page = match state.cursors.get_mut(&cursor) {
                    Some(open) => {
                        let take = open.page_size.min(open.remaining.len());
                        let values: Vec<Entity> = open.remaining.drain(..take).collect();
                        CursorPage {
                            values,
                            done: open.remaining.is_empty(),
                        }
                    }
                    None => CursorPage {
                        values: Vec::new(),
                        done: true,
                    },
                };
                let _ = reply.send(page);
            }
            StoreRequest::StreamCursorClose { cursor, .. } => {
                state.cursors.remove(&cursor);
            }
            StoreRequest::RaiseSystemException {
                exception,
                method,
                particle,
            } => {
                tracing::debug!(%particle, %method, %exception, "system exception raised");
                state.exceptions.push(RaisedException {
                    exception,
                    method,
                    particle,
                });
            }
        }
    }

    /// Serve every request currently buffered on `rx`. Returns how many.
    pub fn serve_pending(&self, rx: &mut RequestReceiver) -> usize {
        let mut served = 0;
        while let Ok(request) = rx.try_recv() {
            self.handle(request);
            served += 1;
        }
        served
    }

    /// Serve requests on a task until every sender is gone
    pub fn spawn(&self, mut rx: RequestReceiver) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                store.handle(request);
            }
        })
    }

    /// Write from another client: store `value` under a fresh key
    pub fn remote_store(&self, value: Entity, originator: Option<ParticleId>) -> Version {
        let mut state = self.state.lock();
        let key = state.fresh_key(&self.id);
        let entry = state.store_value(value, vec![key]);
        state.version = state.version.next();
        let mut update = UpdateEvent::add(state.version, vec![entry]);
        update.originator_id = originator;
        state.broadcast(update);
        state.version
    }

    /// Remove from another client, under every key the store has
    pub fn remote_remove(&self, id: &EntityId, originator: Option<ParticleId>) -> Version {
        let mut state = self.state.lock();
        if let Some(entry) = state.remove_value(id, Vec::new()) {
            state.version = state.version.next();
            let mut update = UpdateEvent::remove(state.version, vec![entry]);
            update.originator_id = originator;
            state.broadcast(update);
        }
        state.version
    }

    /// Variable write from another client
    pub fn remote_set(&self, data: Option<Entity>, originator: Option<ParticleId>) -> Version {
        let mut state = self.state.lock();
        state.set_value(data, originator, None);
        state.version
    }

    /// Queue pushes instead of delivering them
    pub fn hold(&self) {
        let mut state = self.state.lock();
        if state.held.is_none() {
            state.held = Some(Vec::new());
        }
    }

    /// Take every held push, leaving the store holding
    pub fn take_held(&self) -> Vec<(EventSender, StoreEvent)> {
        self.state
            .lock()
            .held
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Stop holding and deliver everything held, in order
    pub fn release(&self) {
        let held = self.state.lock().held.take().unwrap_or_default();
        for (listener, event) in held {
            if listener.send(event).is_err() {
                tracing::debug!("listener gone, held push dropped");
            }
        }
    }

    pub fn version(&self) -> Version {
        self.state.lock().version
    }

    pub fn value(&self) -> Option<Entity> {
        self.state.lock().value.clone()
    }

    pub fn to_list(&self) -> Vec<Entity> {
        self.state.lock().list()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub fn open_cursors(&self) -> usize {
        self.state.lock().cursors.len()
    }

    /// Operation names of every request served, in order
    pub fn operations(&self) -> Vec<&'static str> {
        self.state.lock().operations.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .operations
            .iter()
            .filter(|op| **op == operation)
            .count()
    }

    pub fn exceptions(&self) -> Vec<RaisedException> {
        self.state.lock().exceptions.clone()
    }
}
