//! Shared fixtures for unit tests
//!
//! `RecordingParticle` mirrors the one in the strand-test harness so unit and
//! scenario tests read the same way.

use std::sync::Arc;

use parking_lot::Mutex;

use strand_core::{Entity, ParticleId, StoreRequest};

use crate::{
    CallbackResult, Handle, ModelSnapshot, Notification, Particle, RequestReceiver, UpdateDetails,
};

type Hook = Box<dyn Fn() + Send + Sync>;

/// One callback as seen by a particle
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub handle: String,
    pub notification: Notification,
}

/// Particle that records its callbacks
pub struct RecordingParticle {
    id: ParticleId,
    log: Mutex<Vec<Delivery>>,
    fail_on: Mutex<Option<&'static str>>,
    sync_hook: Mutex<Option<Hook>>,
}

impl RecordingParticle {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(RecordingParticle {
            id: ParticleId::new(id),
            log: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            sync_hook: Mutex::new(None),
        })
    }

    /// Make callbacks of the given method fail (e.g. "on_handle_update")
    pub fn fail_on(&self, method: Option<&'static str>) {
        *self.fail_on.lock() = method;
    }

    /// Run `hook` after every recorded 'sync'
    pub fn on_sync(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.sync_hook.lock() = Some(Box::new(hook));
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().clone()
    }

    /// Notifications received on one handle, in order
    pub fn seen_by(&self, handle: &str) -> Vec<Notification> {
        self.log
            .lock()
            .iter()
            .filter(|d| d.handle == handle)
            .map(|d| d.notification.clone())
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.log.lock().iter().map(|d| d.notification.clone()).collect()
    }

    /// Short names ("sync", "update", "desync") of every notification
    pub fn kinds(&self) -> Vec<&'static str> {
        self.log
            .lock()
            .iter()
            .map(|d| match d.notification {
                Notification::Sync(_) => "sync",
                Notification::Update(_) => "update",
                Notification::Desync => "desync",
            })
            .collect()
    }

    /// Entities added by collection updates, in delivery order
    pub fn added(&self) -> Vec<Entity> {
        self.log
            .lock()
            .iter()
            .filter_map(|d| match &d.notification {
                Notification::Update(UpdateDetails::Collection { added, .. }) => Some(added.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Integer payloads of received updates, in delivery order
    pub fn update_values(&self) -> Vec<i64> {
        let mut values = Vec::new();
        for notification in self.notifications() {
            match notification {
                Notification::Update(UpdateDetails::Variable { data, .. }) => {
                    values.extend(data.and_then(|e| e.raw.as_i64()));
                }
                Notification::Update(UpdateDetails::Collection { added, .. }) => {
                    values.extend(added.iter().filter_map(|e| e.raw.as_i64()));
                }
                _ => {}
            }
        }
        values
    }

    /// The model of the most recent 'sync'
    pub fn last_sync(&self) -> Option<ModelSnapshot> {
        self.log.lock().iter().rev().find_map(|d| match &d.notification {
            Notification::Sync(model) => Some(model.clone()),
            _ => None,
        })
    }

    pub fn reset(&self) {
        self.log.lock().clear();
    }

    fn record(&self, handle: &Handle, notification: Notification) -> CallbackResult {
        if *self.fail_on.lock() == Some(notification.method_name()) {
            return Err(format!("{} refused by {}", notification.method_name(), self.id).into());
        }
        self.log.lock().push(Delivery {
            handle: handle.name().to_string(),
            notification,
        });
        Ok(())
    }
}

impl Particle for RecordingParticle {
    fn id(&self) -> &ParticleId {
        &self.id
    }

    fn on_handle_sync(&self, handle: &Handle, model: &ModelSnapshot) -> CallbackResult {
        self.record(handle, Notification::Sync(model.clone()))?;
        if let Some(hook) = self.sync_hook.lock().as_ref() {
            hook();
        }
        Ok(())
    }

    fn on_handle_update(&self, handle: &Handle, update: &UpdateDetails) -> CallbackResult {
        self.record(handle, Notification::Update(update.clone()))
    }

    fn on_handle_desync(&self, handle: &Handle) -> CallbackResult {
        self.record(handle, Notification::Desync)
    }
}

/// Drain every request currently buffered on a store channel
pub fn drain_requests(rx: &mut RequestReceiver) -> Vec<StoreRequest> {
    let mut requests = Vec::new();
    while let Ok(request) = rx.try_recv() {
        requests.push(request);
    }
    requests
}

/// Operation names of the drained requests
pub fn operations(requests: &[StoreRequest]) -> Vec<&'static str> {
    requests.iter().map(StoreRequest::operation).collect()
}
