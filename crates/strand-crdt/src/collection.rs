//! CRDT collection model - observed-removed set of entities

use std::collections::{BTreeMap, BTreeSet};

use strand_core::{Entity, EntityId, ModelEntry, StrandError, StrandResult};

/// A value and the membership keys under which it has been observed
#[derive(Clone, Debug, PartialEq)]
struct Item {
    value: Entity,
    keys: BTreeSet<String>,
}

/// Observed-removed collection model
///
/// A value is present while at least one of its observed keys has not been
/// removed. Adding a value under keys that are already known is a no-op; a
/// changed value must arrive with at least one new key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrdtCollectionModel {
    items: BTreeMap<EntityId, Item>,
}

impl CrdtCollectionModel {
    pub fn new() -> Self {
        CrdtCollectionModel::default()
    }

    /// Build a model from a full-state snapshot
    pub fn from_entries(entries: Vec<ModelEntry>) -> StrandResult<Self> {
        let mut model = CrdtCollectionModel::new();
        for entry in entries {
            model.add(entry.value.id.clone(), entry.value, &entry.keys)?;
        }
        Ok(model)
    }

    /// Observe `value` under `keys`. Returns true if the visible state changed
    /// (new value, or a value replaced under new keys).
    pub fn add(&mut self, id: EntityId, value: Entity, keys: &[String]) -> StrandResult<bool> {
        if keys.is_empty() {
            return Err(StrandError::MissingKeys(id));
        }

        let Some(item) = self.items.get_mut(&id) else {
            self.items.insert(
                id,
                Item {
                    value,
                    keys: keys.iter().cloned().collect(),
                },
            );
            return Ok(true);
        };

        let mut new_keys = false;
        for key in keys {
            new_keys |= item.keys.insert(key.clone());
        }

        if item.value == value {
            return Ok(false);
        }
        if !new_keys {
            return Err(StrandError::ValueChangedWithoutNewKeys(id));
        }
        item.value = value;
        Ok(true)
    }

    /// Retire `keys` for `id`. Returns true if the value is now absent.
    pub fn remove(&mut self, id: &EntityId, keys: &[String]) -> bool {
        let Some(item) = self.items.get_mut(id) else {
            return false;
        };
        for key in keys {
            item.keys.remove(key);
        }
        if item.keys.is_empty() {
            self.items.remove(id);
            tracing::trace!(%id, "entity removed from model");
            true
        } else {
            false
        }
    }

    /// Current value for `id`
    pub fn get_value(&self, id: &EntityId) -> Option<&Entity> {
        self.items.get(id).map(|item| &item.value)
    }

    /// Observed keys for `id`, empty if absent
    pub fn get_keys(&self, id: &EntityId) -> Vec<String> {
        self.items
            .get(id)
            .map(|item| item.keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.items.contains_key(id)
    }

    /// True if every one of `keys` has already been observed for `id`
    pub fn has_keys(&self, id: &EntityId, keys: &[String]) -> bool {
        self.items
            .get(id)
            .map_or(false, |item| keys.iter().all(|k| item.keys.contains(k)))
    }

    /// All present values, ordered by id
    pub fn to_list(&self) -> Vec<Entity> {
        self.items.values().map(|item| item.value.clone()).collect()
    }

    /// Export the model as a snapshot
    pub fn to_entries(&self) -> Vec<ModelEntry> {
        self.items
            .values()
            .map(|item| ModelEntry::new(item.value.clone(), item.keys.iter().cloned().collect()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
