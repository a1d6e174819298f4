//! Variable proxy - barrier-gated last-writer-wins mirror of a single value
//!
//! A local write sets the model immediately and tags the outgoing request
//! with a fresh barrier. Until an update carrying that barrier comes back,
//! every other update is suppressed: it is older than our write from the
//! particle's point of view. A barrier match is always next in line,
//! whatever its version.

use strand_core::{
    Barrier, Entity, ModelEntry, ParticleId, StoreId, StoreRequest, StrandError, StrandResult,
    UpdateBody, UpdateEvent,
};

use crate::{
    Applied, ModelSnapshot, Notification, ProxyBase, ProxyModel, SyncState, SyncedProxy,
    UpdateContext, UpdateDetails,
};

/// Variable mirror: nullable value plus the outstanding barrier
#[derive(Debug, Default)]
pub struct VariableModel {
    value: Option<Entity>,
    barrier: Option<Barrier>,
}

impl VariableModel {
    pub fn value(&self) -> Option<&Entity> {
        self.value.as_ref()
    }

    pub fn barrier(&self) -> Option<&Barrier> {
        self.barrier.as_ref()
    }
}

impl ProxyModel for VariableModel {
    const KIND: &'static str = "variable";

    fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::Variable(self.value.clone())
    }

    fn check_update(&self, update: &UpdateEvent, cx: &UpdateContext<'_>) -> StrandResult<()> {
        match update.body {
            UpdateBody::Data(_) => Ok(()),
            _ => Err(cx.violation(format!(
                "variable update v{} carries {} instead of data",
                update.version,
                update.body.kind()
            ))),
        }
    }

    fn synchronize(&mut self, model: Vec<ModelEntry>, store: &StoreId) -> StrandResult<bool> {
        if model.len() > 1 {
            return Err(StrandError::ProtocolViolation {
                store: store.clone(),
                reason: format!("variable resync carries {} values", model.len()),
            });
        }
        // A newer local write is still in flight; its echo retires the barrier
        if self.barrier.is_some() {
            return Ok(false);
        }
        self.value = model.into_iter().next().map(|entry| entry.value);
        Ok(true)
    }

    fn apply_update(&mut self, update: &UpdateEvent, cx: &UpdateContext<'_>) -> StrandResult<Applied> {
        let UpdateBody::Data(data) = &update.body else {
            return Err(cx.violation("variable update without data"));
        };

        if let Some(barrier) = &self.barrier {
            if update.barrier.as_ref() == Some(barrier) {
                tracing::trace!(store = %cx.store, ?barrier, "barrier returned");
                self.barrier = None;
                // Our write is the latest state; the echo adds nothing
                if !cx.synchronized {
                    return Ok(Applied::FirstSync);
                }
            }
            return Ok(Applied::Nothing);
        }

        let old_data = std::mem::replace(&mut self.value, data.clone());
        Ok(Applied::Update(UpdateDetails::Variable {
            data: data.clone(),
            old_data,
            originator: update.originator_id.clone(),
        }))
    }

    fn shape_update(&self, update: &UpdateEvent, _cx: &UpdateContext<'_>) -> Option<UpdateDetails> {
        match &update.body {
            UpdateBody::Data(data) => Some(UpdateDetails::Variable {
                data: data.clone(),
                old_data: None,
                originator: update.originator_id.clone(),
            }),
            _ => None,
        }
    }

    fn barrier_matches(&self, update: &UpdateEvent) -> bool {
        matches!((&self.barrier, &update.barrier), (Some(ours), Some(theirs)) if ours == theirs)
    }

    fn release_barrier(&mut self) {
        self.barrier = None;
    }
}

/// Proxy for a single-valued store
pub type VariableProxy = SyncedProxy<VariableModel>;

impl SyncedProxy<VariableModel> {
    pub fn new_variable(base: ProxyBase) -> Self {
        SyncedProxy::new(base, VariableModel::default())
    }

    /// Current value. Answered locally when synchronized.
    pub async fn get(&self, particle: &ParticleId) -> StrandResult<Option<Entity>> {
        let local = {
            let state = self.state.lock();
            (state.sync == SyncState::Full).then(|| state.model.value.clone())
        };
        if let Some(value) = local {
            return Ok(value);
        }
        let store = self.base.id().clone();
        let particle = particle.clone();
        self.base
            .channel()
            .request("HandleGet", |reply| StoreRequest::HandleGet {
                store,
                particle,
                reply,
            })
            .await
    }

    /// Replace the value. Structurally equal writes are dropped.
    pub fn set(&self, value: Entity, particle: &ParticleId) -> StrandResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.model.value.as_ref() == Some(&value) {
            return Ok(());
        }
        let barrier = self.fresh_barrier(state.listener_attached);
        let old_data = state.model.value.replace(value.clone());
        state.model.barrier = barrier.clone();

        self.base.channel().send(StoreRequest::HandleSet {
            store: self.base.id().clone(),
            data: value.clone(),
            particle: particle.clone(),
            barrier,
        })?;
        // Synced handles hear nothing before their first 'sync'
        let synced = state.sync == SyncState::Full;
        self.base.notify(
            &state.observers,
            Notification::Update(UpdateDetails::Variable {
                data: Some(value),
                old_data,
                originator: Some(particle.clone()),
            }),
            |o| o.notify_update && (synced || !o.keep_synced),
        );
        Ok(())
    }

    /// Null the value. A no-op if it is already null.
    pub fn clear(&self, particle: &ParticleId) -> StrandResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.model.value.is_none() {
            return Ok(());
        }
        let barrier = self.fresh_barrier(state.listener_attached);
        let old_data = state.model.value.take();
        state.model.barrier = barrier.clone();

        self.base.channel().send(StoreRequest::HandleClear {
            store: self.base.id().clone(),
            particle: particle.clone(),
            barrier,
        })?;
        let synced = state.sync == SyncState::Full;
        self.base.notify(
            &state.observers,
            Notification::Update(UpdateDetails::Variable {
                data: None,
                old_data,
                originator: Some(particle.clone()),
            }),
            |o| o.notify_update && (synced || !o.keep_synced),
        );
        Ok(())
    }

    /// Without a listener nobody would ever echo the barrier back
    fn fresh_barrier(&self, listener_attached: bool) -> Option<Barrier> {
        listener_attached.then(|| Barrier::new(self.base.generate_id()))
    }

    pub fn barrier(&self) -> Option<Barrier> {
        self.state.lock().model.barrier.clone()
    }
}
