//! Self-describing persistence records
//!
//! Each stored component becomes a [`ComponentRecord`] of kind tag, schema
//! version and JSON payload. Restoring decodes every record through the same
//! [`ComponentRegistry`](crate::ecs::registry::ComponentRegistry) used at
//! runtime before touching the store, so a bad record leaves the store as it was.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, SimError};
use crate::core::types::{EntityId, InstanceId, Tick};
use crate::ecs::component::ComponentSlot;
use crate::ecs::store::EntityStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub kind: String,
    pub version: u32,
    pub instance: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub components: Vec<ComponentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: Tick,
    pub entities: Vec<EntitySnapshot>,
}

/// Snapshot id to the id the entity received on restore
pub type IdRemap = BTreeMap<EntityId, EntityId>;

impl WorldSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn component_count(&self) -> usize {
        self.entities.iter().map(|e| e.components.len()).sum()
    }
}

impl EntityStore {
    /// Every entity with every component instance, ids ascending
    pub fn snapshot(&self) -> Result<Vec<EntitySnapshot>> {
        let mut entities: Vec<EntitySnapshot> = self
            .entities()
            .map(|id| EntitySnapshot {
                id,
                components: Vec::new(),
            })
            .collect();

        // slots_iter yields entities in the same ascending order
        let mut cursor = 0;
        for (entity, kind, slot) in self.slots_iter() {
            while entities[cursor].id != entity {
                cursor += 1;
            }
            entities[cursor].components.push(ComponentRecord {
                kind: kind.name().to_string(),
                version: slot.value.version(),
                instance: slot.instance,
                scope: slot.scope.clone(),
                data: slot.value.to_json()?,
            });
        }
        Ok(entities)
    }

    /// Recreate snapshot entities under fresh ids. Every record is decoded and
    /// validated first; on any failure nothing is created.
    pub fn restore(&mut self, entities: &[EntitySnapshot]) -> Result<IdRemap> {
        let mut decoded = Vec::with_capacity(entities.len());
        for snapshot in entities {
            let mut slots = Vec::with_capacity(snapshot.components.len());
            for record in &snapshot.components {
                let kind = self
                    .registry()
                    .lookup(&record.kind)
                    .ok_or_else(|| SimError::UnknownComponentKind(record.kind.clone()))?;
                let expected = self.registry().version(kind).unwrap_or(record.version);
                if record.version != expected {
                    return Err(SimError::Validation {
                        entity: Some(snapshot.id),
                        kind,
                        reason: format!("schema version {} does not match registered {}", record.version, expected),
                    });
                }
                let value = self.registry().decode(&record.kind, &record.data, Some(snapshot.id))?;
                slots.push(ComponentSlot::with_instance(value, record.scope.clone(), record.instance));
            }
            decoded.push((snapshot.id, slots));
        }

        let mut remap = IdRemap::new();
        let mut created = Vec::with_capacity(decoded.len());
        for (old, slots) in decoded {
            let new = self.create_entity();
            created.push(new);
            for slot in slots {
                if let Err(e) = self.attach_slot(new, slot) {
                    // Duplicate single-instance records only show up here
                    for entity in created {
                        self.destroy_entity(entity)?;
                    }
                    return Err(e);
                }
            }
            remap.insert(old, new);
        }

        tracing::debug!(entities = remap.len(), "Restored snapshot");
        Ok(remap)
    }
}
