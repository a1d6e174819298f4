//! Messages crossing the store boundary
//!
//! Proxies talk to their backing store only through [`StoreRequest`]s sent
//! over an unbounded channel. Requests that need an answer carry a oneshot
//! reply sender; requests that attach a listener carry the proxy's
//! [`EventSender`], on which the store later pushes [`StoreEvent`]s.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::{Barrier, CursorId, Entity, EntityId, ModelEntry, ParticleId, StoreId, Version};

/// Push channel from a store to one proxy
pub type EventSender = mpsc::UnboundedSender<StoreEvent>;

/// Receiving end of a proxy's push channel
pub type EventReceiver = mpsc::UnboundedReceiver<StoreEvent>;

/// One added or removed entry of a collection update
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub value: Entity,
    pub keys: Vec<String>,
    /// Whether the store's own model changed when it applied this entry
    #[serde(default)]
    pub effective: bool,
}

impl UpdateEntry {
    pub fn new(value: Entity, keys: Vec<String>, effective: bool) -> Self {
        UpdateEntry {
            value,
            keys,
            effective,
        }
    }
}

/// Payload of an update event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateBody {
    /// Collection additions
    Add(Vec<UpdateEntry>),
    /// Collection removals
    Remove(Vec<UpdateEntry>),
    /// Variable replacement (None clears)
    Data(Option<Entity>),
}

impl UpdateBody {
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateBody::Add(_) => "add",
            UpdateBody::Remove(_) => "remove",
            UpdateBody::Data(_) => "data",
        }
    }
}

/// Update pushed by a store after it applied a mutation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub version: Version,
    pub body: UpdateBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator_id: Option<ParticleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrier: Option<Barrier>,
}

impl UpdateEvent {
    pub fn new(version: Version, body: UpdateBody) -> Self {
        UpdateEvent {
            version,
            body,
            originator_id: None,
            barrier: None,
        }
    }

    pub fn add(version: Version, entries: Vec<UpdateEntry>) -> Self {
        Self::new(version, UpdateBody::Add(entries))
    }

    pub fn remove(version: Version, entries: Vec<UpdateEntry>) -> Self {
        Self::new(version, UpdateBody::Remove(entries))
    }

    pub fn data(version: Version, data: Option<Entity>) -> Self {
        Self::new(version, UpdateBody::Data(data))
    }

    pub fn with_originator(mut self, originator: ParticleId) -> Self {
        self.originator_id = Some(originator);
        self
    }

    pub fn with_barrier(mut self, barrier: Barrier) -> Self {
        self.barrier = Some(barrier);
        self
    }
}

/// Full-state answer to a synchronize request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub version: Version,
    /// Collection contents, or zero/one entries for a variable
    pub model: Vec<ModelEntry>,
}

impl SyncResponse {
    pub fn new(version: Version, model: Vec<ModelEntry>) -> Self {
        SyncResponse { version, model }
    }
}

/// Events a store pushes to a proxy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreEvent {
    Update(UpdateEvent),
    Synchronize(SyncResponse),
}

/// An (id, keys) pair of a remove-multiple request. Empty keys ask the
/// store to use every key it has for the id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub id: EntityId,
    pub keys: Vec<String>,
}

/// One page read from a server-side cursor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorPage {
    pub values: Vec<Entity>,
    pub done: bool,
}

/// Requests a proxy sends to its backing store
#[derive(Debug)]
pub enum StoreRequest {
    /// Attach an update listener; the store pushes `StoreEvent::Update` from now on
    InitializeProxy {
        store: StoreId,
        listener: EventSender,
    },
    /// Ask for one `StoreEvent::Synchronize` carrying the full model
    SynchronizeProxy {
        store: StoreId,
        listener: EventSender,
    },
    HandleGet {
        store: StoreId,
        particle: ParticleId,
        reply: oneshot::Sender<Option<Entity>>,
    },
    HandleToList {
        store: StoreId,
        particle: Option<ParticleId>,
        reply: oneshot::Sender<Vec<Entity>>,
    },
    HandleSet {
        store: StoreId,
        data: Entity,
        particle: ParticleId,
        barrier: Option<Barrier>,
    },
    HandleClear {
        store: StoreId,
        particle: ParticleId,
        barrier: Option<Barrier>,
    },
    HandleStore {
        store: StoreId,
        value: Entity,
        keys: Vec<String>,
        particle: ParticleId,
        ack: Option<oneshot::Sender<()>>,
    },
    HandleRemove {
        store: StoreId,
        id: EntityId,
        keys: Vec<String>,
        particle: ParticleId,
        ack: Option<oneshot::Sender<()>>,
    },
    HandleRemoveMultiple {
        store: StoreId,
        items: Vec<RemoveItem>,
        particle: ParticleId,
    },
    HandleStream {
        store: StoreId,
        page_size: usize,
        forward: bool,
        reply: oneshot::Sender<CursorId>,
    },
    StreamCursorNext {
        store: StoreId,
        cursor: CursorId,
        reply: oneshot::Sender<CursorPage>,
    },
    StreamCursorClose {
        store: StoreId,
        cursor: CursorId,
    },
    /// Diagnostic only
    RaiseSystemException {
        exception: String,
        method: String,
        particle: ParticleId,
    },
}

impl StoreRequest {
    /// Operation name, as used in logs and errors
    pub fn operation(&self) -> &'static str {
        match self {
            StoreRequest::InitializeProxy { .. } => "InitializeProxy",
            StoreRequest::SynchronizeProxy { .. } => "SynchronizeProxy",
            StoreRequest::HandleGet { .. } => "HandleGet",
            StoreRequest::HandleToList { .. } => "HandleToList",
            StoreRequest::HandleSet { .. } => "HandleSet",
            StoreRequest::HandleClear { .. } => "HandleClear",
            StoreRequest::HandleStore { .. } => "HandleStore",
            StoreRequest::HandleRemove { .. } => "HandleRemove",
            StoreRequest::HandleRemoveMultiple { .. } => "HandleRemoveMultiple",
            StoreRequest::HandleStream { .. } => "HandleStream",
            StoreRequest::StreamCursorNext { .. } => "StreamCursorNext",
            StoreRequest::StreamCursorClose { .. } => "StreamCursorClose",
            StoreRequest::RaiseSystemException { .. } => "RaiseSystemException",
        }
    }

    /// Target store, if the request addresses one
    pub fn store(&self) -> Option<&StoreId> {
        match self {
            StoreRequest::InitializeProxy { store, .. }
            | StoreRequest::SynchronizeProxy { store, .. }
            | StoreRequest::HandleGet { store, .. }
            | StoreRequest::HandleToList { store, .. }
            | StoreRequest::HandleSet { store, .. }
            | StoreRequest::HandleClear { store, .. }
            | StoreRequest::HandleStore { store, .. }
            | StoreRequest::HandleRemove { store, .. }
            | StoreRequest::HandleRemoveMultiple { store, .. }
            | StoreRequest::HandleStream { store, .. }
            | StoreRequest::StreamCursorNext { store, .. }
            | StoreRequest::StreamCursorClose { store, .. } => Some(store),
            StoreRequest::RaiseSystemException { .. } => None,
        }
    }
}
