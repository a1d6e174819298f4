//! Entity values stored in collections and variables

use serde::{Deserialize, Serialize};

use crate::EntityId;

/// A stored value: an identity plus opaque structured data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(rename = "rawData")]
    pub raw: serde_json::Value,
}

impl Entity {
    pub fn new(id: impl Into<String>, raw: serde_json::Value) -> Self {
        Entity {
            id: EntityId::new(id),
            raw,
        }
    }
}

/// An entity together with the membership keys under which it was observed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub value: Entity,
    pub keys: Vec<String>,
}

impl ModelEntry {
    pub fn new(value: Entity, keys: Vec<String>) -> Self {
        ModelEntry { value, keys }
    }
}
