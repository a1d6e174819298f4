//! Collection proxy - CRDT mirror of a multi-valued store

use strand_core::{
    Entity, EntityId, ModelEntry, ParticleId, RemoveItem, StoreId, StoreRequest, StrandResult,
    UpdateBody, UpdateEntry, UpdateEvent,
};
use strand_crdt::CrdtCollectionModel;

use crate::{
    Applied, ModelSnapshot, Notification, ProxyBase, ProxyModel, SyncState, SyncedProxy,
    UpdateContext, UpdateDetails,
};

/// Collection mirror: an observed-removed set
#[derive(Debug, Default)]
pub struct CollectionModel {
    crdt: CrdtCollectionModel,
}

impl CollectionModel {
    pub fn crdt(&self) -> &CrdtCollectionModel {
        &self.crdt
    }
}

impl ProxyModel for CollectionModel {
    const KIND: &'static str = "collection";

    fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::Collection(self.crdt.to_list())
    }

    fn check_update(&self, update: &UpdateEvent, cx: &UpdateContext<'_>) -> StrandResult<()> {
        match update.body {
            UpdateBody::Add(_) | UpdateBody::Remove(_) => Ok(()),
            UpdateBody::Data(_) => Err(cx.violation(format!(
                "collection update v{} carries neither add nor remove",
                update.version
            ))),
        }
    }

    fn synchronize(&mut self, model: Vec<ModelEntry>, _store: &StoreId) -> StrandResult<bool> {
        self.crdt = CrdtCollectionModel::from_entries(model)?;
        Ok(true)
    }

    fn apply_update(&mut self, update: &UpdateEvent, cx: &UpdateContext<'_>) -> StrandResult<Applied> {
        // Writes made before the first sync were never applied locally, so
        // own echoes are folded in too. Only entries whose keys we already
        // hold were applied and notified when they were made.
        let own = cx.is_own_write(update);

        let mut added = Vec::new();
        let mut removed = Vec::new();
        match &update.body {
            UpdateBody::Add(entries) => {
                for entry in entries {
                    if own && self.crdt.has_keys(&entry.value.id, &entry.keys) {
                        continue;
                    }
                    if self
                        .crdt
                        .add(entry.value.id.clone(), entry.value.clone(), &entry.keys)?
                    {
                        added.push(entry.value.clone());
                    }
                }
            }
            UpdateBody::Remove(entries) => {
                for entry in entries {
                    let local = self.crdt.get_value(&entry.value.id).cloned();
                    if self.crdt.remove(&entry.value.id, &entry.keys) {
                        removed.push(local.unwrap_or_else(|| entry.value.clone()));
                    }
                }
            }
            UpdateBody::Data(_) => {
                return Err(cx.violation("collection update carries data"));
            }
        }

        Ok(collection_details(added, removed, update)
            .map_or(Applied::Nothing, Applied::Update))
    }

    fn shape_update(&self, update: &UpdateEvent, cx: &UpdateContext<'_>) -> Option<UpdateDetails> {
        if cx.is_self_echo(update) {
            return None;
        }
        // No local model to consult: trust the store's verdict
        match &update.body {
            UpdateBody::Add(entries) => {
                collection_details(effective_values(entries), Vec::new(), update)
            }
            UpdateBody::Remove(entries) => {
                collection_details(Vec::new(), effective_values(entries), update)
            }
            UpdateBody::Data(_) => None,
        }
    }
}

fn effective_values(entries: &[UpdateEntry]) -> Vec<Entity> {
    entries
        .iter()
        .filter(|e| e.effective)
        .map(|e| e.value.clone())
        .collect()
}

fn collection_details(
    added: Vec<Entity>,
    removed: Vec<Entity>,
    update: &UpdateEvent,
) -> Option<UpdateDetails> {
    if added.is_empty() && removed.is_empty() {
        return None;
    }
    Some(UpdateDetails::Collection {
        added,
        removed,
        originator: update.originator_id.clone(),
    })
}

/// Proxy for a multi-valued store
pub type CollectionProxy = SyncedProxy<CollectionModel>;

impl SyncedProxy<CollectionModel> {
    pub fn new_collection(base: ProxyBase) -> Self {
        SyncedProxy::new(base, CollectionModel::default())
    }

    /// Every value. Answered locally when synchronized, otherwise by a
    /// one-shot request that bypasses the model.
    pub async fn to_list(&self) -> StrandResult<Vec<Entity>> {
        let local = {
            let state = self.state.lock();
            (state.sync == SyncState::Full).then(|| state.model.crdt.to_list())
        };
        if let Some(list) = local {
            return Ok(list);
        }
        let store = self.base.id().clone();
        self.base
            .channel()
            .request("HandleToList", |reply| StoreRequest::HandleToList {
                store,
                particle: None,
                reply,
            })
            .await
    }

    /// One value by id
    pub async fn get(&self, id: &EntityId, particle: &ParticleId) -> StrandResult<Option<Entity>> {
        let local = {
            let state = self.state.lock();
            (state.sync == SyncState::Full).then(|| state.model.crdt.get_value(id).cloned())
        };
        if let Some(value) = local {
            return Ok(value);
        }
        let store = self.base.id().clone();
        let particle = particle.clone();
        let list = self
            .base
            .channel()
            .request("HandleToList", |reply| StoreRequest::HandleToList {
                store,
                particle: Some(particle),
                reply,
            })
            .await?;
        Ok(list.into_iter().find(|entity| &entity.id == id))
    }

    /// Write `value` under `keys`. When synchronized the value is applied
    /// locally and observers are told right away.
    pub fn store(&self, value: Entity, keys: Vec<String>, particle: &ParticleId) -> StrandResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        self.base.channel().send(StoreRequest::HandleStore {
            store: self.base.id().clone(),
            value: value.clone(),
            keys: keys.clone(),
            particle: particle.clone(),
            ack: None,
        })?;

        if state.sync != SyncState::Full {
            return Ok(());
        }
        if !state.model.crdt.add(value.id.clone(), value.clone(), &keys)? {
            return Ok(());
        }
        self.base.notify(
            &state.observers,
            Notification::Update(UpdateDetails::Collection {
                added: vec![value],
                removed: Vec::new(),
                originator: Some(particle.clone()),
            }),
            |o| o.notify_update,
        );
        Ok(())
    }

    /// Retire `keys` for `id`. Empty keys mean every key observed locally
    /// when synchronized, or every key the store has otherwise.
    pub fn remove(&self, id: &EntityId, keys: Vec<String>, particle: &ParticleId) -> StrandResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.sync != SyncState::Full {
            return self.base.channel().send(StoreRequest::HandleRemove {
                store: self.base.id().clone(),
                id: id.clone(),
                keys,
                particle: particle.clone(),
                ack: None,
            });
        }

        let Some(value) = state.model.crdt.get_value(id).cloned() else {
            return Ok(());
        };
        let keys = if keys.is_empty() {
            state.model.crdt.get_keys(id)
        } else {
            keys
        };
        self.base.channel().send(StoreRequest::HandleRemove {
            store: self.base.id().clone(),
            id: id.clone(),
            keys: keys.clone(),
            particle: particle.clone(),
            ack: None,
        })?;

        if !state.model.crdt.remove(id, &keys) {
            return Ok(());
        }
        self.base.notify(
            &state.observers,
            Notification::Update(UpdateDetails::Collection {
                added: Vec::new(),
                removed: vec![value],
                originator: Some(particle.clone()),
            }),
            |o| o.notify_update,
        );
        Ok(())
    }

    /// Remove everything. Synchronized proxies remove exactly what they have
    /// observed; unsynchronized ones ask the store to use its own keys.
    pub fn clear(&self, particle: &ParticleId) -> StrandResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let items: Vec<RemoveItem> = if state.sync == SyncState::Full {
            state
                .model
                .crdt
                .to_list()
                .into_iter()
                .map(|entity| RemoveItem {
                    keys: state.model.crdt.get_keys(&entity.id),
                    id: entity.id,
                })
                .collect()
        } else {
            Vec::new()
        };

        self.base.channel().send(StoreRequest::HandleRemoveMultiple {
            store: self.base.id().clone(),
            items: items.clone(),
            particle: particle.clone(),
        })?;

        let removed: Vec<Entity> = items
            .iter()
            .filter_map(|item| {
                let value = state.model.crdt.get_value(&item.id).cloned();
                if state.model.crdt.remove(&item.id, &item.keys) {
                    value
                } else {
                    None
                }
            })
            .collect();

        if !removed.is_empty() {
            self.base.notify(
                &state.observers,
                Notification::Update(UpdateDetails::Collection {
                    added: Vec::new(),
                    removed,
                    originator: Some(particle.clone()),
                }),
                |o| o.notify_update,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_util::{drain_requests, operations, RecordingParticle};
    use crate::{
        Handle, HandleOptions, Particle, ProxyConfig, RequestReceiver, Scheduler, SchedulerConfig,
        StoreChannel,
    };
    use serde_json::json;
    use strand_core::{StrandError, SyncResponse, Version};

    fn setup() -> (CollectionProxy, RequestReceiver, Arc<Scheduler>) {
        let (channel, rx) = StoreChannel::new();
        let scheduler = Scheduler::with_config(SchedulerConfig::manual(), None);
        let base = ProxyBase::new(
            StoreId::new("things"),
            channel,
            Arc::clone(&scheduler),
            ProxyConfig::with_id_base("!test"),
        );
        (CollectionProxy::new_collection(base), rx, scheduler)
    }

    fn entity(id: &str, n: i64) -> Entity {
        Entity::new(id, json!(n))
    }

    fn keys(ks: &[&str]) -> Vec<String> {
        ks.iter().map(|k| k.to_string()).collect()
    }

    fn synced_with(proxy: &CollectionProxy, particle: &Arc<RecordingParticle>, version: u64) {
        proxy
            .register(Arc::new(Handle::new("h", particle.clone(), HandleOptions::synced())))
            .unwrap();
        proxy
            .on_synchronize(SyncResponse::new(Version::new(version), Vec::new()))
            .unwrap();
    }

    #[test]
    fn test_register_attaches_once_and_syncs_once() {
        let (proxy, mut rx, _scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        let p2 = RecordingParticle::new("p2");

        proxy.register(Arc::new(Handle::new("a", p1.clone(), HandleOptions::synced()))).unwrap();
        proxy.register(Arc::new(Handle::new("b", p2.clone(), HandleOptions::synced()))).unwrap();
        proxy.register(Arc::new(Handle::write_only("w", p2.clone()))).unwrap();

        let requests = drain_requests(&mut rx);
        assert_eq!(operations(&requests), vec!["InitializeProxy", "SynchronizeProxy"]);
        assert_eq!(proxy.sync_state(), SyncState::Pending);
        assert_eq!(proxy.observer_count(), 2);
    }

    #[test]
    fn test_late_register_gets_immediate_sync() {
        let (proxy, mut rx, scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        synced_with(&proxy, &p1, 0);
        drain_requests(&mut rx);

        let p2 = RecordingParticle::new("p2");
        proxy.register(Arc::new(Handle::new("late", p2.clone(), HandleOptions::synced()))).unwrap();
        scheduler.dispatch();

        assert!(drain_requests(&mut rx).is_empty());
        assert_eq!(p2.kinds(), vec!["sync"]);
        assert_eq!(p2.deliveries()[0].handle, "late");
        assert!(p1.seen_by("late").is_empty());
    }

    #[test]
    fn test_store_then_echo_notifies_once() {
        let (proxy, mut rx, scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        synced_with(&proxy, &p1, 0);
        scheduler.dispatch();
        p1.reset();
        drain_requests(&mut rx);

        let value = entity("a", 1);
        proxy.store(value.clone(), keys(&["k1"]), p1.id()).unwrap();
        scheduler.dispatch();

        assert_eq!(operations(&drain_requests(&mut rx)), vec!["HandleStore"]);
        assert_eq!(
            p1.notifications(),
            vec![Notification::Update(UpdateDetails::Collection {
                added: vec![value.clone()],
                removed: Vec::new(),
                originator: Some(p1.id().clone()),
            })]
        );

        let echo = UpdateEvent::add(
            Version::new(1),
            vec![UpdateEntry::new(value.clone(), keys(&["k1"]), true)],
        )
        .with_originator(p1.id().clone());
        proxy.on_update(echo).unwrap();
        scheduler.dispatch();

        assert_eq!(p1.notifications().len(), 1);
        assert_eq!(proxy.version(), Some(Version::new(1)));
        assert_eq!(proxy.snapshot(), ModelSnapshot::Collection(vec![value]));
    }

    #[test]
    fn test_echo_of_write_before_first_sync_is_applied() {
        let (proxy, mut rx, scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        proxy
            .register(Arc::new(Handle::new("h", p1.clone(), HandleOptions::synced())))
            .unwrap();

        // Not yet synchronized: only the store sees the write
        let value = entity("a", 1);
        proxy.store(value.clone(), keys(&["ka"]), p1.id()).unwrap();
        assert_eq!(
            operations(&drain_requests(&mut rx)),
            vec!["InitializeProxy", "SynchronizeProxy", "HandleStore"]
        );

        proxy
            .on_synchronize(SyncResponse::new(Version::new(0), Vec::new()))
            .unwrap();
        let echo = UpdateEvent::add(
            Version::new(1),
            vec![UpdateEntry::new(value.clone(), keys(&["ka"]), true)],
        )
        .with_originator(p1.id().clone());
        proxy.on_update(echo).unwrap();
        scheduler.dispatch();

        assert_eq!(proxy.sync_state(), SyncState::Full);
        assert_eq!(proxy.snapshot(), ModelSnapshot::Collection(vec![value.clone()]));
        assert_eq!(p1.kinds(), vec!["sync", "update"]);
        assert_eq!(p1.added(), vec![value]);
    }

    #[test]
    fn test_echo_of_superseded_own_write_is_skipped() {
        let (proxy, _rx, scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        synced_with(&proxy, &p1, 0);
        proxy.store(entity("a", 1), keys(&["k1"]), p1.id()).unwrap();

        // A foreign write to the same id lands first
        proxy
            .on_update(UpdateEvent::add(
                Version::new(1),
                vec![UpdateEntry::new(entity("a", 2), keys(&["k2"]), true)],
            ))
            .unwrap();
        proxy
            .on_update(
                UpdateEvent::add(
                    Version::new(2),
                    vec![UpdateEntry::new(entity("a", 1), keys(&["k1"]), true)],
                )
                .with_originator(p1.id().clone()),
            )
            .unwrap();
        scheduler.dispatch();

        assert_eq!(proxy.version(), Some(Version::new(2)));
        assert_eq!(proxy.snapshot(), ModelSnapshot::Collection(vec![entity("a", 2)]));
    }

    #[test]
    fn test_foreign_update_applies_and_notifies() {
        let (proxy, _rx, scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        synced_with(&proxy, &p1, 4);
        scheduler.dispatch();
        p1.reset();

        let update = UpdateEvent::add(
            Version::new(5),
            vec![UpdateEntry::new(entity("x", 9), keys(&["k"]), true)],
        )
        .with_originator(ParticleId::new("elsewhere"));
        proxy.on_update(update.clone()).unwrap();
        // Duplicate delivery is stale
        proxy.on_update(update).unwrap();
        scheduler.dispatch();

        assert_eq!(p1.update_values(), vec![9]);
        assert_eq!(proxy.version(), Some(Version::new(5)));
    }

    #[test]
    fn test_remove_substitutes_observed_keys() {
        let (proxy, mut rx, scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        proxy
            .register(Arc::new(Handle::new("h", p1.clone(), HandleOptions::synced())))
            .unwrap();
        proxy
            .on_synchronize(SyncResponse::new(
                Version::new(1),
                vec![ModelEntry::new(entity("a", 1), keys(&["k1", "k2"]))],
            ))
            .unwrap();
        drain_requests(&mut rx);

        proxy.remove(&EntityId::new("a"), Vec::new(), p1.id()).unwrap();
        scheduler.dispatch();

        match drain_requests(&mut rx).pop() {
            Some(StoreRequest::HandleRemove { keys: sent, .. }) => assert_eq!(sent, keys(&["k1", "k2"])),
            other => panic!("unexpected request {:?}", other),
        }
        assert_eq!(proxy.snapshot(), ModelSnapshot::Collection(Vec::new()));
        assert_eq!(p1.kinds(), vec!["sync", "update"]);
    }

    #[test]
    fn test_remove_unknown_id_is_noop_when_synced() {
        let (proxy, mut rx, _scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        synced_with(&proxy, &p1, 0);
        drain_requests(&mut rx);

        proxy.remove(&EntityId::new("missing"), Vec::new(), p1.id()).unwrap();
        assert!(drain_requests(&mut rx).is_empty());
    }

    #[test]
    fn test_clear_sends_observed_items() {
        let (proxy, mut rx, scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        synced_with(&proxy, &p1, 0);
        proxy.store(entity("a", 1), keys(&["ka"]), p1.id()).unwrap();
        proxy.store(entity("b", 2), keys(&["kb"]), p1.id()).unwrap();
        drain_requests(&mut rx);

        proxy.clear(p1.id()).unwrap();
        scheduler.dispatch();

        let requests = drain_requests(&mut rx);
        assert_eq!(operations(&requests), vec!["HandleRemoveMultiple"]);
        match &requests[0] {
            StoreRequest::HandleRemoveMultiple { items, .. } => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].keys, keys(&["ka"]));
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert_eq!(proxy.snapshot(), ModelSnapshot::Collection(Vec::new()));
    }

    #[test]
    fn test_unsynced_clear_defers_to_store_keys() {
        let (proxy, mut rx, _scheduler) = setup();
        proxy.clear(&ParticleId::new("p")).unwrap();
        match drain_requests(&mut rx).pop() {
            Some(StoreRequest::HandleRemoveMultiple { items, .. }) => assert!(items.is_empty()),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_fire_hose_trusts_effective_flag() {
        let (proxy, _rx, scheduler) = setup();
        let watcher = RecordingParticle::new("watcher");
        proxy
            .register(Arc::new(Handle::new("w", watcher.clone(), HandleOptions::updates_only())))
            .unwrap();

        let update = UpdateEvent::add(
            Version::new(12),
            vec![
                UpdateEntry::new(entity("a", 1), keys(&["k"]), true),
                UpdateEntry::new(entity("b", 2), keys(&["k"]), false),
            ],
        );
        proxy.on_update(update).unwrap();
        scheduler.dispatch();

        assert_eq!(watcher.update_values(), vec![1]);
        // No mirror is kept for fire-hose only proxies
        assert_eq!(proxy.version(), None);
        assert_eq!(proxy.pending_updates(), 0);
    }

    #[test]
    fn test_data_body_is_protocol_violation() {
        let (proxy, _rx, _scheduler) = setup();
        let p1 = RecordingParticle::new("p1");
        synced_with(&proxy, &p1, 0);

        let result = proxy.on_update(UpdateEvent::data(Version::new(1), None));
        assert!(matches!(result, Err(StrandError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_unsynced_reads_go_to_store() {
        let (proxy, mut rx, _scheduler) = setup();

        let server = tokio::spawn(async move {
            for _ in 0..2 {
                match rx.recv().await {
                    Some(StoreRequest::HandleToList { reply, .. }) => {
                        let _ = reply.send(vec![Entity::new("a", json!(1)), Entity::new("b", json!(2))]);
                    }
                    other => panic!("unexpected request {:?}", other),
                }
            }
        });

        assert_eq!(proxy.to_list().await.unwrap().len(), 2);
        let b = proxy.get(&EntityId::new("b"), &ParticleId::new("p")).await.unwrap();
        assert_eq!(b, Some(Entity::new("b", json!(2))));
        server.await.unwrap();
    }
}
