//! Composite ("chimeric") entities
//!
//! An entity governed by several instances of one kind (two genetic lineages
//! in one body) stores each instance under its own [`InstanceId`]. The
//! [`InstanceBlend`] component records which instances co-exist and how much
//! each contributes, so content systems can blend or pick a dominant one.

use serde::{Deserialize, Serialize};

use crate::core::types::InstanceId;
use crate::ecs::component::{Component, ComponentKind};

/// One co-existing instance and its contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendEntry {
    /// Kind name of the blended instance
    pub kind: String,
    pub instance: InstanceId,
    /// Relative contribution (not required to sum to 1)
    pub weight: f32,
    /// Higher priority wins when a single instance must govern
    pub priority: i32,
}

/// Coordination record for multi-instance kinds on one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceBlend {
    pub entries: Vec<BlendEntry>,
}

impl Component for InstanceBlend {
    const KIND: ComponentKind = ComponentKind::new("instance_blend");
}

impl InstanceBlend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style add
    pub fn with(mut self, kind: ComponentKind, instance: InstanceId, weight: f32, priority: i32) -> Self {
        self.set(kind, instance, weight, priority);
        self
    }

    /// Insert or replace the entry for `instance`
    pub fn set(&mut self, kind: ComponentKind, instance: InstanceId, weight: f32, priority: i32) {
        match self.entries.iter_mut().find(|e| e.instance == instance) {
            Some(entry) => {
                entry.kind = kind.name().to_string();
                entry.weight = weight;
                entry.priority = priority;
            }
            None => self.entries.push(BlendEntry {
                kind: kind.name().to_string(),
                instance,
                weight,
                priority,
            }),
        }
    }

    /// Drop the entry for an instance; returns whether one existed
    pub fn remove_instance(&mut self, instance: InstanceId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.instance != instance);
        self.entries.len() != before
    }

    pub fn entries_for(&self, kind: ComponentKind) -> impl Iterator<Item = &BlendEntry> {
        self.entries.iter().filter(move |e| e.kind == kind.name())
    }

    /// Weights for one kind normalized to sum to 1; empty if all weights are zero
    pub fn normalized_weights(&self, kind: ComponentKind) -> Vec<(InstanceId, f32)> {
        let total: f32 = self.entries_for(kind).map(|e| e.weight).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        self.entries_for(kind)
            .map(|e| (e.instance, e.weight / total))
            .collect()
    }

    /// Governing instance for a kind: highest priority, then highest weight
    pub fn dominant(&self, kind: ComponentKind) -> Option<InstanceId> {
        self.entries_for(kind)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.weight.total_cmp(&b.weight))
            })
            .map(|e| e.instance)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (i, entry) in self.entries.iter().enumerate() {
            if !(entry.weight.is_finite() && entry.weight >= 0.0) {
                return Err(format!(
                    "blend weight for {} must be finite and non-negative, got {}",
                    entry.instance, entry.weight
                ));
            }
            if self.entries[..i].iter().any(|e| e.instance == entry.instance) {
                return Err(format!("instance {} listed twice", entry.instance));
            }
        }
        Ok(())
    }
}
