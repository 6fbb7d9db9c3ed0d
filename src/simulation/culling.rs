//! Activity culling
//!
//! Relevance of a positioned entity is `max(0, 1 - d / radius)` over every
//! point of interest, where `d` is the distance to that point. An entity is
//! active when its relevance is strictly above the threshold. Entities
//! without a position, or holding an always-active kind, are always active.
//!
//! Culling only narrows which entities systems process; it never removes
//! anything from the store or the spatial index.

use ahash::AHashSet;
use rayon::prelude::*;

use crate::core::config::RuntimeConfig;
use crate::core::types::{EntityId, Vec2};
use crate::ecs::component::{AlwaysActive, Component, ComponentKind};
use crate::ecs::store::EntityStore;

#[derive(Debug, Clone)]
pub struct ActivityPolicy {
    pub enabled: bool,
    pub relevance_radius: f32,
    pub relevance_threshold: f32,
    /// Positioned populations above this size are scored in parallel
    pub parallel_threshold: usize,
    points_of_interest: Vec<Vec2>,
    always_active: Vec<ComponentKind>,
}

impl ActivityPolicy {
    pub fn new(relevance_radius: f32, relevance_threshold: f32) -> Self {
        Self {
            enabled: true,
            relevance_radius,
            relevance_threshold,
            parallel_threshold: 1000,
            points_of_interest: Vec::new(),
            always_active: vec![AlwaysActive::KIND],
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            enabled: config.culling.enabled,
            parallel_threshold: config.parallel_threshold,
            ..Self::new(config.culling.relevance_radius, config.culling.relevance_threshold)
        }
    }

    /// Policy that keeps every entity active
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1.0, 0.0)
        }
    }

    pub fn points_of_interest(&self) -> &[Vec2] {
        &self.points_of_interest
    }

    pub fn set_points_of_interest(&mut self, points: Vec<Vec2>) {
        self.points_of_interest = points;
    }

    pub fn add_point_of_interest(&mut self, point: Vec2) {
        self.points_of_interest.push(point);
    }

    pub fn clear_points_of_interest(&mut self) {
        self.points_of_interest.clear();
    }

    /// Entities holding `kind` are never culled
    pub fn mark_always_active(&mut self, kind: ComponentKind) {
        if !self.always_active.contains(&kind) {
            self.always_active.push(kind);
        }
    }

    pub fn relevance_at(&self, pos: Vec2) -> f32 {
        self.points_of_interest
            .iter()
            .map(|poi| (1.0 - pos.distance(poi) / self.relevance_radius).max(0.0))
            .fold(0.0, f32::max)
    }

    fn is_pinned(&self, store: &EntityStore, entity: EntityId) -> bool {
        self.always_active.iter().any(|kind| store.has_kind(entity, *kind))
    }

    /// Relevance score of one entity
    pub fn relevance(&self, store: &EntityStore, entity: EntityId) -> f32 {
        match store.position_of(entity) {
            Some(pos) if !self.is_pinned(store, entity) => self.relevance_at(pos),
            _ => 1.0,
        }
    }

    /// Score every positioned entity and collect the culled ones
    pub fn evaluate(&self, store: &EntityStore) -> ActiveSet {
        if !self.enabled || self.points_of_interest.is_empty() {
            return ActiveSet::default();
        }

        let positioned: Vec<(EntityId, Vec2)> = store.spatial().positions().collect();
        let culls = |&(entity, pos): &(EntityId, Vec2)| {
            self.relevance_at(pos) <= self.relevance_threshold && !self.is_pinned(store, entity)
        };

        let culled: AHashSet<EntityId> = if positioned.len() > self.parallel_threshold {
            // PARALLEL: scoring is independent per entity
            positioned
                .par_iter()
                .filter(|item| culls(item))
                .map(|(entity, _)| *entity)
                .collect::<Vec<_>>()
                .into_iter()
                .collect()
        } else {
            positioned
                .iter()
                .filter(|item| culls(item))
                .map(|(entity, _)| *entity)
                .collect()
        };

        tracing::debug!(
            positioned = positioned.len(),
            culled = culled.len(),
            "Evaluated activity"
        );
        ActiveSet { culled }
    }
}

impl Default for ActivityPolicy {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

/// Result of one culling pass
#[derive(Debug, Clone, Default)]
pub struct ActiveSet {
    culled: AHashSet<EntityId>,
}

impl ActiveSet {
    pub fn is_active(&self, entity: EntityId) -> bool {
        !self.culled.contains(&entity)
    }

    pub fn culled_count(&self) -> usize {
        self.culled.len()
    }
}
