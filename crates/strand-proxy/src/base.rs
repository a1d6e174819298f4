//! Proxy base - registration, resync state machine and the update pipeline
//!
//! Pipeline for a pushed update:
//! 1. Validate the body shape (protocol violations fail loudly)
//! 2. Fire-hose delivery to non-synced handles that want updates
//! 3. Stale check against the current version
//! 4. Queue in version order
//! 5. Apply every queued update that is next in line
//! 6. Desync and resync if a gap remains, or self-heal if it closed

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use strand_core::{
    EventReceiver, EventSender, ModelEntry, ParticleId, StoreEvent, StoreId, StoreRequest,
    StrandError, StrandResult, SyncResponse, UpdateEvent, Version,
};
use tokio::sync::mpsc;

use crate::{
    Handle, HandleOptions, ModelSnapshot, Notification, ProxyConfig, Scheduler, StoreChannel,
    UpdateDetails,
};

/// Synchronization posture of a proxy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Not mirroring, or a gap was detected and a resync is outstanding
    #[default]
    None,
    /// First full resync requested, not yet answered
    Pending,
    /// Local model mirrors the store
    Full,
}

/// State shared by every proxy variant: identity, channel, scheduler and ids
pub struct ProxyBase {
    id: StoreId,
    channel: StoreChannel,
    scheduler: Arc<Scheduler>,
    config: ProxyConfig,
    id_base: String,
    next_local_id: AtomicU64,
}

impl ProxyBase {
    pub fn new(
        id: StoreId,
        channel: StoreChannel,
        scheduler: Arc<Scheduler>,
        config: ProxyConfig,
    ) -> Self {
        let id_base = format!("{}:{}", config.id_base, id);
        ProxyBase {
            id,
            channel,
            scheduler,
            config,
            id_base,
            next_local_id: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &StoreId {
        &self.id
    }

    pub fn channel(&self) -> &StoreChannel {
        &self.channel
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Fresh id unique to this proxy: `{base}:{counter}`
    pub fn generate_id(&self) -> String {
        let (base, component) = self.generate_id_components();
        format!("{}:{}", base, component)
    }

    pub fn generate_id_components(&self) -> (String, u64) {
        let component = self.next_local_id.fetch_add(1, Ordering::Relaxed);
        (self.id_base.clone(), component)
    }

    /// Forward a diagnostic to the store side
    pub fn raise_system_exception(
        &self,
        exception: impl Into<String>,
        method: impl Into<String>,
        particle: ParticleId,
    ) -> StrandResult<()> {
        self.channel.send(StoreRequest::RaiseSystemException {
            exception: exception.into(),
            method: method.into(),
            particle,
        })
    }

    /// Enqueue `notification` for every observer whose options match
    pub(crate) fn notify(
        &self,
        observers: &[Arc<Handle>],
        notification: Notification,
        wants: impl Fn(&HandleOptions) -> bool,
    ) {
        for handle in observers {
            if wants(&handle.options()) {
                self.scheduler.enqueue(handle, notification.clone());
            }
        }
    }

    fn log_stale(&self, what: &str, version: Version, current: Option<Version>) {
        if self.config.warn_on_stale {
            tracing::warn!(store = %self.id, %version, ?current, "dropping stale {}", what);
        } else {
            tracing::debug!(store = %self.id, %version, ?current, "dropping stale {}", what);
        }
    }
}

/// Outcome of folding one update into a local model
pub enum Applied {
    /// Nothing to tell observers
    Nothing,
    Update(UpdateDetails),
    /// A barrier echo completed the first synchronization
    FirstSync,
}

/// What a model may consult while processing an update
pub struct UpdateContext<'a> {
    pub store: &'a StoreId,
    pub synchronized: bool,
    pub observers: &'a [Arc<Handle>],
}

impl UpdateContext<'_> {
    /// True if one of our observers made the write this update echoes
    pub fn is_own_write(&self, update: &UpdateEvent) -> bool {
        update.originator_id.as_ref().map_or(false, |originator| {
            self.observers.iter().any(|h| h.particle_id() == originator)
        })
    }

    /// True if the update echoes a write one of our observers made while we
    /// were synchronized, i.e. one that was already applied and notified.
    pub fn is_self_echo(&self, update: &UpdateEvent) -> bool {
        self.synchronized && self.is_own_write(update)
    }

    pub fn violation(&self, reason: impl Into<String>) -> StrandError {
        StrandError::ProtocolViolation {
            store: self.store.clone(),
            reason: reason.into(),
        }
    }
}

/// Local mirror behind a synchronizing proxy. Implemented by the
/// collection and variable models.
pub trait ProxyModel: Send + 'static {
    const KIND: &'static str;

    fn snapshot(&self) -> ModelSnapshot;

    /// Reject bodies this model can never apply
    fn check_update(&self, update: &UpdateEvent, cx: &UpdateContext<'_>) -> StrandResult<()>;

    /// Replace the model from a full-state response. `Ok(false)` keeps the
    /// local model because a newer local write is in flight; the proxy still
    /// adopts the response version.
    fn synchronize(&mut self, model: Vec<ModelEntry>, store: &StoreId) -> StrandResult<bool>;

    /// Fold an update into the model
    fn apply_update(&mut self, update: &UpdateEvent, cx: &UpdateContext<'_>) -> StrandResult<Applied>;

    /// Shape an update for the fire hose without touching the model
    fn shape_update(&self, update: &UpdateEvent, cx: &UpdateContext<'_>) -> Option<UpdateDetails>;

    /// Outstanding barrier, for variables
    fn barrier_matches(&self, _update: &UpdateEvent) -> bool {
        false
    }

    /// Forget the outstanding barrier once its echo is known to be covered
    fn release_barrier(&mut self) {}
}

pub(crate) struct ProxyState<M> {
    pub model: M,
    pub version: Option<Version>,
    pub sync: SyncState,
    pub listener_attached: bool,
    pub keep_synced: bool,
    pub observers: Vec<Arc<Handle>>,
    /// Queued updates, sorted by version
    pub updates: Vec<UpdateEvent>,
    /// A corrective resync is outstanding; an answer at the current version
    /// is accepted
    pub refresh: bool,
}

/// A proxy that mirrors its store through model `M`
pub struct SyncedProxy<M> {
    pub(crate) base: ProxyBase,
    pub(crate) state: Mutex<ProxyState<M>>,
    events_tx: EventSender,
    events_rx: Mutex<Option<EventReceiver>>,
}

impl<M: ProxyModel> SyncedProxy<M> {
    pub fn new(base: ProxyBase, model: M) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        SyncedProxy {
            base,
            state: Mutex::new(ProxyState {
                model,
                version: None,
                sync: SyncState::None,
                listener_attached: false,
                keep_synced: false,
                observers: Vec::new(),
                updates: Vec::new(),
                refresh: false,
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn base(&self) -> &ProxyBase {
        &self.base
    }

    pub fn id(&self) -> &StoreId {
        self.base.id()
    }

    pub fn register(&self, handle: Arc<Handle>) -> StrandResult<()> {
        if !handle.can_read() {
            return Ok(());
        }
        let options = handle.options();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.listener_attached {
            self.base.channel().send(StoreRequest::InitializeProxy {
                store: self.base.id().clone(),
                listener: self.events_tx.clone(),
            })?;
            state.listener_attached = true;
            tracing::debug!(store = %self.base.id(), kind = M::KIND, "listener attached");
        }

        if options.keep_synced && !state.keep_synced {
            self.request_sync()?;
            state.keep_synced = true;
            state.sync = SyncState::Pending;
        }

        // Only observe once the store knows about us
        state.observers.push(Arc::clone(&handle));
        if options.keep_synced && options.notify_sync && state.sync == SyncState::Full {
            self.base
                .scheduler()
                .enqueue(&handle, Notification::Sync(state.model.snapshot()));
        }
        Ok(())
    }

    fn request_sync(&self) -> StrandResult<()> {
        tracing::debug!(store = %self.base.id(), "requesting full resync");
        self.base.channel().send(StoreRequest::SynchronizeProxy {
            store: self.base.id().clone(),
            listener: self.events_tx.clone(),
        })
    }

    /// Apply a full-state response
    pub fn on_synchronize(&self, response: SyncResponse) -> StrandResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let stale = if state.refresh {
            state.version.map_or(false, |v| response.version < v)
        } else {
            response.version.is_stale(state.version)
        };
        if stale {
            self.base.log_stale("resync", response.version, state.version);
            // Updates applied while unsynchronized overtook the answer and a
            // gap remains: nothing else will close it.
            if state.sync != SyncState::Full && state.keep_synced && !state.updates.is_empty() {
                self.request_sync()?;
            }
            return Ok(());
        }
        // A covered barrier echo means the response already holds our write
        if state
            .updates
            .iter()
            .any(|u| u.version <= response.version && state.model.barrier_matches(u))
        {
            state.model.release_barrier();
        }
        if !state.model.synchronize(response.model, self.base.id())? {
            tracing::debug!(
                store = %self.base.id(),
                version = %response.version,
                "resync keeps in-flight local write"
            );
        }

        state.version = Some(response.version);
        state.sync = SyncState::Full;
        state.refresh = false;
        state.updates.retain(|u| u.version > response.version);
        tracing::debug!(store = %self.base.id(), version = %response.version, "synchronized");

        self.base.notify(
            &state.observers,
            Notification::Sync(state.model.snapshot()),
            |o| o.keep_synced && o.notify_sync,
        );
        self.process_updates(state)
    }

    /// Apply a pushed update
    pub fn on_update(&self, update: UpdateEvent) -> StrandResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let cx = UpdateContext {
            store: self.base.id(),
            synchronized: state.sync == SyncState::Full,
            observers: &state.observers,
        };
        state.model.check_update(&update, &cx)?;

        if state
            .observers
            .iter()
            .any(|h| !h.options().keep_synced && h.options().notify_update)
        {
            if let Some(details) = state.model.shape_update(&update, &cx) {
                self.base.notify(&state.observers, Notification::Update(details), |o| {
                    !o.keep_synced && o.notify_update
                });
            }
        }

        if !state.keep_synced {
            return Ok(());
        }
        if update.version.is_stale(state.version) {
            if state.model.barrier_matches(&update) {
                // A resync overtook our echo and may carry newer foreign
                // writes the outstanding barrier kept out of the model.
                state.model.release_barrier();
                tracing::debug!(store = %self.base.id(), version = %update.version, "late barrier echo");
                if state.version > Some(update.version) {
                    self.request_sync()?;
                    state.refresh = true;
                }
                return Ok(());
            }
            self.base.log_stale("update", update.version, state.version);
            return Ok(());
        }

        if state.updates.iter().any(|u| u.version == update.version) {
            tracing::debug!(store = %self.base.id(), version = %update.version, "duplicate update already queued");
            return Ok(());
        }
        let at = state.updates.partition_point(|u| u.version <= update.version);
        state.updates.insert(at, update);
        self.process_updates(state)
    }

    fn is_next(state: &ProxyState<M>, update: &UpdateEvent) -> bool {
        state.version.map_or(false, |v| update.version == v.next())
            || state.model.barrier_matches(update)
    }

    fn process_updates(&self, state: &mut ProxyState<M>) -> StrandResult<()> {
        while state
            .updates
            .first()
            .map_or(false, |u| Self::is_next(state, u))
        {
            let update = state.updates.remove(0);
            let cx = UpdateContext {
                store: self.base.id(),
                synchronized: state.sync == SyncState::Full,
                observers: &state.observers,
            };
            let applied = state.model.apply_update(&update, &cx)?;
            // A barrier echo may be older than what we already applied
            state.version = state.version.max(Some(update.version));

            match applied {
                Applied::Nothing => {}
                Applied::Update(details) => {
                    self.base.notify(&state.observers, Notification::Update(details), |o| {
                        o.keep_synced && o.notify_update
                    });
                }
                Applied::FirstSync => {
                    self.base.notify(
                        &state.observers,
                        Notification::Sync(state.model.snapshot()),
                        |o| o.keep_synced && o.notify_sync,
                    );
                }
            }
        }

        if !state.updates.is_empty() {
            if state.sync == SyncState::Full {
                tracing::debug!(
                    store = %self.base.id(),
                    version = ?state.version,
                    queued = state.updates.len(),
                    "version gap, desynchronized"
                );
                state.sync = SyncState::None;
                self.request_sync()?;
                self.base
                    .notify(&state.observers, Notification::Desync, |o| {
                        o.keep_synced && o.notify_desync
                    });
            }
        } else if state.sync != SyncState::Full {
            tracing::debug!(store = %self.base.id(), version = ?state.version, "caught up without resync");
            state.sync = SyncState::Full;
        }
        Ok(())
    }

    pub fn on_event(&self, event: StoreEvent) -> StrandResult<()> {
        match event {
            StoreEvent::Update(update) => self.on_update(update),
            StoreEvent::Synchronize(response) => self.on_synchronize(response),
        }
    }

    /// Apply every event the store has pushed so far. Returns how many were applied.
    pub fn drain_events(&self) -> StrandResult<usize> {
        let mut guard = self.events_rx.lock();
        let Some(rx) = guard.as_mut() else {
            return Ok(0);
        };
        let mut applied = 0;
        while let Ok(event) = rx.try_recv() {
            self.on_event(event)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Apply pushed events as they arrive. The proxy keeps its own sender
    /// alive, so this only returns on error; abort the task to stop it.
    /// Takes ownership of the event receiver; `drain_events` is a no-op
    /// afterwards.
    pub async fn run_events(&self) -> StrandResult<()> {
        let Some(mut rx) = self.events_rx.lock().take() else {
            return Ok(());
        };
        while let Some(event) = rx.recv().await {
            self.on_event(event)?;
        }
        Ok(())
    }

    pub fn version(&self) -> Option<Version> {
        self.state.lock().version
    }

    pub fn sync_state(&self) -> SyncState {
        self.state.lock().sync
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    pub fn pending_updates(&self) -> usize {
        self.state.lock().updates.len()
    }

    pub fn is_listener_attached(&self) -> bool {
        self.state.lock().listener_attached
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        self.state.lock().model.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{drain_requests, operations, RecordingParticle};
    use crate::{CollectionProxy, SchedulerConfig};
    use serde_json::json;
    use strand_core::{Entity, UpdateEntry};

    fn setup() -> (CollectionProxy, crate::RequestReceiver, Arc<Scheduler>, Arc<RecordingParticle>) {
        let (channel, rx) = StoreChannel::new();
        let scheduler = Scheduler::with_config(SchedulerConfig::manual(), None);
        let proxy = CollectionProxy::new_collection(ProxyBase::new(
            StoreId::new("pipeline"),
            channel,
            Arc::clone(&scheduler),
            ProxyConfig::with_id_base("!test"),
        ));
        let particle = RecordingParticle::new("p");
        proxy
            .register(Arc::new(Handle::new("h", particle.clone(), HandleOptions::synced())))
            .unwrap();
        (proxy, rx, scheduler, particle)
    }

    fn add(version: u64) -> UpdateEvent {
        UpdateEvent::add(
            Version::new(version),
            vec![UpdateEntry::new(
                Entity::new(format!("e{}", version), json!(version)),
                vec![format!("k{}", version)],
                true,
            )],
        )
    }

    fn sync(version: u64) -> SyncResponse {
        SyncResponse::new(Version::new(version), Vec::new())
    }

    #[test]
    fn test_updates_while_pending_do_not_resync() {
        let (proxy, mut rx, _scheduler, _p) = setup();
        drain_requests(&mut rx);

        for v in [4, 2, 9] {
            proxy.on_update(add(v)).unwrap();
        }
        assert_eq!(proxy.sync_state(), SyncState::Pending);
        assert_eq!(proxy.pending_updates(), 3);
        assert!(drain_requests(&mut rx).is_empty());
    }

    #[test]
    fn test_resync_discards_covered_updates() {
        let (proxy, _rx, scheduler, particle) = setup();
        for v in [2, 3, 6] {
            proxy.on_update(add(v)).unwrap();
        }
        proxy.on_synchronize(sync(3)).unwrap();
        scheduler.dispatch();

        // 6 survives and leaves a gap after 3
        assert_eq!(proxy.version(), Some(Version::new(3)));
        assert_eq!(proxy.pending_updates(), 1);
        assert_eq!(proxy.sync_state(), SyncState::None);
        assert_eq!(particle.kinds(), vec!["sync", "desync"]);
    }

    #[test]
    fn test_gap_from_full_requests_one_resync() {
        let (proxy, mut rx, scheduler, particle) = setup();
        proxy.on_synchronize(sync(0)).unwrap();
        drain_requests(&mut rx);

        proxy.on_update(add(2)).unwrap();
        proxy.on_update(add(3)).unwrap();
        proxy.on_update(add(5)).unwrap();
        scheduler.dispatch();

        assert_eq!(operations(&drain_requests(&mut rx)), vec!["SynchronizeProxy"]);
        assert_eq!(proxy.sync_state(), SyncState::None);
        assert_eq!(particle.kinds(), vec!["sync", "desync"]);
    }

    #[test]
    fn test_gap_closed_by_late_update_self_heals() {
        let (proxy, mut rx, scheduler, particle) = setup();
        proxy.on_synchronize(sync(0)).unwrap();
        proxy.on_update(add(2)).unwrap();
        drain_requests(&mut rx);

        proxy.on_update(add(1)).unwrap();
        scheduler.dispatch();

        assert_eq!(proxy.sync_state(), SyncState::Full);
        assert_eq!(proxy.version(), Some(Version::new(2)));
        assert!(drain_requests(&mut rx).is_empty());
        assert_eq!(particle.kinds(), vec!["sync", "desync", "update", "update"]);
        assert_eq!(particle.update_values(), vec![1, 2]);
    }

    #[test]
    fn test_stale_events_are_dropped() {
        let (proxy, _rx, scheduler, particle) = setup();
        proxy.on_synchronize(sync(5)).unwrap();
        proxy.on_update(add(5)).unwrap();
        proxy.on_update(add(3)).unwrap();
        proxy.on_synchronize(sync(4)).unwrap();
        scheduler.dispatch();

        assert_eq!(proxy.version(), Some(Version::new(5)));
        assert_eq!(proxy.pending_updates(), 0);
        assert_eq!(particle.kinds(), vec!["sync"]);
    }

    #[test]
    fn test_duplicate_queued_update_is_dropped() {
        let (proxy, _rx, _scheduler, _p) = setup();
        proxy.on_synchronize(sync(0)).unwrap();
        proxy.on_update(add(3)).unwrap();
        proxy.on_update(add(3)).unwrap();
        assert_eq!(proxy.pending_updates(), 1);

        proxy.on_update(add(1)).unwrap();
        proxy.on_update(add(2)).unwrap();
        assert_eq!(proxy.pending_updates(), 0);
        assert_eq!(proxy.sync_state(), SyncState::Full);
    }

    #[test]
    fn test_stale_answer_to_gapped_proxy_asks_again() {
        let (proxy, mut rx, _scheduler, _p) = setup();
        proxy.on_synchronize(sync(0)).unwrap();
        proxy.on_update(add(2)).unwrap();
        proxy.on_update(add(4)).unwrap();
        // 1 arrives late: 1 and 2 apply, 4 still waits on 3
        proxy.on_update(add(1)).unwrap();
        drain_requests(&mut rx);

        proxy.on_synchronize(sync(1)).unwrap();
        assert_eq!(operations(&drain_requests(&mut rx)), vec!["SynchronizeProxy"]);

        proxy.on_synchronize(sync(4)).unwrap();
        assert_eq!(proxy.sync_state(), SyncState::Full);
        assert_eq!(proxy.pending_updates(), 0);
    }

    #[test]
    fn test_register_on_closed_channel_leaves_no_observer() {
        let (channel, rx) = StoreChannel::new();
        drop(rx);
        let scheduler = Scheduler::with_config(SchedulerConfig::manual(), None);
        let proxy = CollectionProxy::new_collection(ProxyBase::new(
            StoreId::new("closed"),
            channel,
            scheduler,
            ProxyConfig::with_id_base("!test"),
        ));
        let particle = RecordingParticle::new("p");

        let result = proxy.register(Arc::new(Handle::new("h", particle, HandleOptions::synced())));
        assert!(matches!(result, Err(StrandError::ChannelClosed)));
        assert_eq!(proxy.observer_count(), 0);
        assert!(!proxy.is_listener_attached());
        assert_eq!(proxy.sync_state(), SyncState::None);
    }

    #[tokio::test]
    async fn test_run_events_applies_pushes() {
        let (proxy, mut rx, _scheduler, _p) = setup();
        let requests = drain_requests(&mut rx);
        let StoreRequest::InitializeProxy { listener, .. } = &requests[0] else {
            panic!("expected InitializeProxy, got {:?}", requests[0]);
        };
        listener.send(StoreEvent::Synchronize(sync(0))).unwrap();
        listener.send(StoreEvent::Update(add(1))).unwrap();
        drop(requests);

        let proxy = Arc::new(proxy);
        let runner = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.run_events().await }
        });
        tokio::task::yield_now().await;
        while proxy.version() != Some(Version::new(1)) {
            tokio::task::yield_now().await;
        }
        assert_eq!(proxy.sync_state(), SyncState::Full);
        assert_eq!(proxy.drain_events().unwrap(), 0);
        runner.abort();
    }
}
