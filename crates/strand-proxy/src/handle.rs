//! Handles, particles and the notifications delivered to them

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use strand_core::{Entity, ParticleId};

/// Result of a particle lifecycle callback
pub type CallbackResult = Result<(), Box<dyn Error + Send + Sync>>;

/// What a handle wants from its proxy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandleOptions {
    /// Mirror the store locally and receive versioned updates
    pub keep_synced: bool,
    /// Receive 'sync' with the full model
    pub notify_sync: bool,
    /// Receive 'update' notifications
    pub notify_update: bool,
    /// Receive 'desync' when a version gap is detected
    pub notify_desync: bool,
}

impl HandleOptions {
    /// Keep synced and receive every notification kind
    pub fn synced() -> Self {
        HandleOptions {
            keep_synced: true,
            notify_sync: true,
            notify_update: true,
            notify_desync: true,
        }
    }

    /// Raw update stream without a local mirror
    pub fn updates_only() -> Self {
        HandleOptions {
            notify_update: true,
            ..HandleOptions::default()
        }
    }

    pub fn with_keep_synced(mut self, keep_synced: bool) -> Self {
        self.keep_synced = keep_synced;
        self
    }

    pub fn with_notify_sync(mut self, notify_sync: bool) -> Self {
        self.notify_sync = notify_sync;
        self
    }

    pub fn with_notify_update(mut self, notify_update: bool) -> Self {
        self.notify_update = notify_update;
        self
    }

    pub fn with_notify_desync(mut self, notify_desync: bool) -> Self {
        self.notify_desync = notify_desync;
        self
    }
}

/// Model contents handed to a 'sync' callback
#[derive(Clone, Debug, PartialEq)]
pub enum ModelSnapshot {
    Collection(Vec<Entity>),
    Variable(Option<Entity>),
    /// Big collections never mirror their contents
    Empty,
}

/// Shaped change handed to an 'update' callback
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateDetails {
    Collection {
        added: Vec<Entity>,
        removed: Vec<Entity>,
        originator: Option<ParticleId>,
    },
    Variable {
        data: Option<Entity>,
        old_data: Option<Entity>,
        originator: Option<ParticleId>,
    },
}

impl UpdateDetails {
    pub fn originator(&self) -> Option<&ParticleId> {
        match self {
            UpdateDetails::Collection { originator, .. }
            | UpdateDetails::Variable { originator, .. } => originator.as_ref(),
        }
    }
}

/// One queued delivery
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Sync(ModelSnapshot),
    Update(UpdateDetails),
    Desync,
}

impl Notification {
    /// Lifecycle method this notification invokes
    pub fn method_name(&self) -> &'static str {
        match self {
            Notification::Sync(_) => "on_handle_sync",
            Notification::Update(_) => "on_handle_update",
            Notification::Desync => "on_handle_desync",
        }
    }
}

/// A computational unit receiving handle lifecycle callbacks
pub trait Particle: Send + Sync {
    fn id(&self) -> &ParticleId;

    fn on_handle_sync(&self, _handle: &Handle, _model: &ModelSnapshot) -> CallbackResult {
        Ok(())
    }

    fn on_handle_update(&self, _handle: &Handle, _update: &UpdateDetails) -> CallbackResult {
        Ok(())
    }

    fn on_handle_desync(&self, _handle: &Handle) -> CallbackResult {
        Ok(())
    }
}

/// A read/write capability binding one particle to one store
pub struct Handle {
    name: String,
    particle: Arc<dyn Particle>,
    options: HandleOptions,
    can_read: bool,
    can_write: bool,
}

impl Handle {
    /// Read/write handle
    pub fn new(name: impl Into<String>, particle: Arc<dyn Particle>, options: HandleOptions) -> Self {
        Handle {
            name: name.into(),
            particle,
            options,
            can_read: true,
            can_write: true,
        }
    }

    pub fn read_only(name: impl Into<String>, particle: Arc<dyn Particle>, options: HandleOptions) -> Self {
        Handle {
            can_write: false,
            ..Handle::new(name, particle, options)
        }
    }

    pub fn write_only(name: impl Into<String>, particle: Arc<dyn Particle>) -> Self {
        Handle {
            can_read: false,
            ..Handle::new(name, particle, HandleOptions::default())
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn particle(&self) -> &Arc<dyn Particle> {
        &self.particle
    }

    pub fn particle_id(&self) -> &ParticleId {
        self.particle.id()
    }

    pub fn options(&self) -> HandleOptions {
        self.options
    }

    pub fn can_read(&self) -> bool {
        self.can_read
    }

    pub fn can_write(&self) -> bool {
        self.can_write
    }

    /// Invoke the particle lifecycle method matching `notification`
    pub fn notify(&self, notification: &Notification) -> CallbackResult {
        match notification {
            Notification::Sync(model) => self.particle.on_handle_sync(self, model),
            Notification::Update(update) => self.particle.on_handle_update(self, update),
            Notification::Desync => self.particle.on_handle_desync(self),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name)
            .field("particle", self.particle.id())
            .field("options", &self.options)
            .field("can_read", &self.can_read)
            .field("can_write", &self.can_write)
            .finish()
    }
}
