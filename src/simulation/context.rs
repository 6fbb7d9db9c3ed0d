//! Per-tick, per-system view of the world
//!
//! The scheduler builds a fresh [`SystemContext`] for each system on each
//! tick, so nothing obtained through it outlives the tick. Structural changes
//! (spawn, destroy, attach, detach) go through [`SystemContext::commands`] and
//! are applied after the system returns; component values can be updated in
//! place through [`SystemContext::components`].

use crate::core::error::{Result, SimError};
use crate::core::types::{EntityId, SystemId, Tick, Vec2};
use crate::ecs::commands::{CommandBuffer, Commands};
use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::store::{EntityStore, RequireSet};
use crate::events::bus::{EventBus, OwnerId};
use crate::events::scoped::ScopedEventBus;
use crate::spatial::index::SpatialHit;

/// A per-entity error that was logged and skipped
#[derive(Debug)]
pub struct EntityFailure {
    pub entity: EntityId,
    pub error: SimError,
}

pub struct SystemContext<'w> {
    tick: Tick,
    system: SystemId,
    owner: OwnerId,
    active: &'w [EntityId],
    store: &'w mut EntityStore,
    bus: &'w mut EventBus,
    commands: &'w mut CommandBuffer,
    failures: Vec<EntityFailure>,
}

impl<'w> SystemContext<'w> {
    pub fn new(
        tick: Tick,
        system: SystemId,
        owner: OwnerId,
        active: &'w [EntityId],
        store: &'w mut EntityStore,
        bus: &'w mut EventBus,
        commands: &'w mut CommandBuffer,
    ) -> Self {
        Self {
            tick,
            system,
            owner,
            active,
            store,
            bus,
            commands,
            failures: Vec::new(),
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn system_id(&self) -> SystemId {
        self.system
    }

    /// Entities holding the system's required kinds, after culling, ascending
    pub fn active_entities(&self) -> &'w [EntityId] {
        self.active
    }

    /// Read-only store access for queries the helpers below don't cover
    pub fn store(&self) -> &EntityStore {
        &*self.store
    }

    pub fn components(&mut self, entity: EntityId) -> EntityComponents<'_> {
        EntityComponents {
            entity,
            store: &mut *self.store,
        }
    }

    /// Run `f` for every active entity. An error for one entity is logged and
    /// recorded, and the loop moves on. Returns how many entities succeeded.
    pub fn for_each_active(&mut self, mut f: impl FnMut(&mut Self, EntityId) -> Result<()>) -> usize {
        let active = self.active;
        let mut succeeded = 0;
        for &entity in active {
            if !self.store.contains(entity) {
                continue;
            }
            match f(self, entity) {
                Ok(()) => succeeded += 1,
                Err(e) => self.record_failure(entity, e),
            }
        }
        succeeded
    }

    /// Log and keep a per-entity error without failing the system
    pub fn record_failure(&mut self, entity: EntityId, error: SimError) {
        tracing::warn!(
            system = %self.system,
            entity = %entity,
            kind = error.kind().map(|k| k.name()).unwrap_or("-"),
            error = %error,
            "Entity update failed"
        );
        self.failures.push(EntityFailure { entity, error });
    }

    pub fn failures(&self) -> &[EntityFailure] {
        &self.failures
    }

    pub(crate) fn into_failures(self) -> Vec<EntityFailure> {
        self.failures
    }

    // ========================================================================
    // Spatial helpers
    // ========================================================================

    pub fn position_of(&self, entity: EntityId) -> Option<Vec2> {
        self.store.position_of(entity)
    }

    pub fn in_radius(&self, center: Vec2, radius: f32, kinds: &[ComponentKind]) -> Vec<SpatialHit> {
        self.store.entities_in_radius(center, radius, kinds)
    }

    /// Entities around `entity`'s own position, excluding itself. Empty if the
    /// entity has no indexed position.
    pub fn nearby(&self, entity: EntityId, radius: f32, kinds: &[ComponentKind]) -> Vec<SpatialHit> {
        match self.store.position_of(entity) {
            Some(center) => self
                .store
                .entities_in_radius_where(center, radius, kinds, |e| e != entity),
            None => Vec::new(),
        }
    }

    pub fn nearest(&self, center: Vec2, kinds: &[ComponentKind]) -> Option<SpatialHit> {
        self.store.nearest(center, kinds)
    }

    /// Closest other entity to `entity`
    pub fn nearest_to(&self, entity: EntityId, kinds: &[ComponentKind]) -> Option<SpatialHit> {
        let center = self.store.position_of(entity)?;
        self.store.nearest_where(center, kinds, None, |e| e != entity)
    }

    pub fn exists_within(&self, center: Vec2, radius: f32, kinds: &[ComponentKind]) -> bool {
        self.store.exists_in_radius(center, radius, kinds)
    }

    pub fn count_within(&self, center: Vec2, radius: f32, kinds: &[ComponentKind]) -> usize {
        self.store.count_in_radius(center, radius, kinds)
    }

    // ========================================================================
    // Events and deferred mutation
    // ========================================================================

    pub fn events(&mut self) -> ScopedEventBus<'_> {
        ScopedEventBus::new(self.bus, self.owner)
    }

    pub fn commands(&mut self) -> Commands<'_> {
        Commands::new(self.store, self.commands)
    }
}

/// Component accessor for one entity
pub struct EntityComponents<'c> {
    entity: EntityId,
    store: &'c mut EntityStore,
}

impl<'c> EntityComponents<'c> {
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Fails with `MissingComponent` naming this entity and the kind
    pub fn require<T: Component>(&self) -> Result<&T> {
        self.store.require::<T>(self.entity)
    }

    pub fn require_all<'a, Q: RequireSet<'a>>(&'a self) -> Result<Q> {
        self.store.require_all::<Q>(self.entity)
    }

    pub fn optional<T: Component>(&self) -> Option<&T> {
        self.store.get::<T>(self.entity)
    }

    pub fn has<T: Component>(&self) -> bool {
        self.store.has::<T>(self.entity)
    }

    pub fn update<T: Component>(&mut self, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.store.update::<T>(self.entity, f)
    }

    pub fn set<T: Component>(&mut self, value: T) -> Result<()> {
        self.store.set::<T>(self.entity, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::Position;
    use crate::ecs::registry::ComponentRegistry;
    use crate::events::bus::Event;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Energy(f32);

    impl Component for Energy {
        const KIND: ComponentKind = ComponentKind::new("energy");
    }

    #[derive(Debug, Clone)]
    struct Tired(EntityId);

    impl Event for Tired {
        const KIND: &'static str = "tired";
    }

    struct Fixture {
        store: EntityStore,
        bus: EventBus,
        commands: CommandBuffer,
        owner: OwnerId,
    }

    fn fixture() -> Fixture {
        let mut registry = ComponentRegistry::new();
        registry.register(|_: &Energy| Ok(()), || Energy(1.0)).unwrap();
        let mut bus = EventBus::default();
        let owner = bus.register_owner("test");
        Fixture {
            store: EntityStore::new(registry, 10.0),
            bus,
            commands: CommandBuffer::new(),
            owner,
        }
    }

    #[test]
    fn test_for_each_active_skips_failures() {
        let mut fx = fixture();
        let a = fx.store.create_entity();
        let b = fx.store.create_entity();
        let c = fx.store.create_entity();
        fx.store.attach(a, Energy(1.0)).unwrap();
        fx.store.attach(c, Energy(2.0)).unwrap();
        let active = vec![a, b, c];

        let mut ctx = SystemContext::new(
            3,
            SystemId("drain"),
            fx.owner,
            &active,
            &mut fx.store,
            &mut fx.bus,
            &mut fx.commands,
        );
        let ok = ctx.for_each_active(|ctx, e| {
            ctx.components(e).update::<Energy>(|en| Energy(en.0 - 0.5))
        });

        assert_eq!(ok, 2);
        assert_eq!(ctx.failures().len(), 1);
        assert_eq!(ctx.failures()[0].entity, b);
        assert_eq!(ctx.failures()[0].error.kind(), Some(Energy::KIND));
        assert_eq!(fx.store.get::<Energy>(c), Some(&Energy(1.5)));
    }

    #[test]
    fn test_nearby_excludes_self() {
        let mut fx = fixture();
        let me = fx.store.create_entity();
        let other = fx.store.create_entity();
        fx.store.attach(me, Position::new(0.0, 0.0)).unwrap();
        fx.store.attach(other, Position::new(3.0, 4.0)).unwrap();
        let unplaced = fx.store.create_entity();

        let ctx = SystemContext::new(0, SystemId("t"), fx.owner, &[], &mut fx.store, &mut fx.bus, &mut fx.commands);
        let hits = ctx.nearby(me, 10.0, &[]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity, other);
        assert_eq!(hits[0].distance, 5.0);

        assert_eq!(ctx.nearest_to(me, &[]).map(|h| h.entity), Some(other));
        assert!(ctx.nearby(unplaced, 10.0, &[]).is_empty());
        assert!(ctx.nearest_to(unplaced, &[]).is_none());
        assert_eq!(ctx.count_within(Vec2::ZERO, 10.0, &[]), 2);
        assert!(ctx.exists_within(Vec2::new(3.0, 4.0), 0.0, &[]));
    }

    #[test]
    fn test_commands_are_deferred() {
        let mut fx = fixture();
        let e = fx.store.create_entity();

        let mut ctx = SystemContext::new(0, SystemId("t"), fx.owner, &[], &mut fx.store, &mut fx.bus, &mut fx.commands);
        let spawned = ctx.commands().spawn(Default::default());
        ctx.commands().destroy(e);
        assert!(ctx.store().contains(e));
        assert!(!ctx.store().contains(spawned));

        assert_eq!(fx.commands.len(), 2);
    }

    #[test]
    fn test_events_are_scoped_to_owner() {
        let mut fx = fixture();
        let other = fx.bus.register_owner("other");
        fx.bus.subscribe::<Tired>(other, 0, |_| {});

        let mut ctx = SystemContext::new(0, SystemId("t"), fx.owner, &[], &mut fx.store, &mut fx.bus, &mut fx.commands);
        let mut events = ctx.events();
        events.subscribe::<Tired>(0, |_| {});
        events.emit(Tired(EntityId(1)));
        assert_eq!(events.cleanup(), 1);

        assert_eq!(fx.bus.subscriptions_of(other), 1);
        assert_eq!(fx.bus.pending(), 1);
    }

    #[test]
    fn test_components_accessor() {
        let mut fx = fixture();
        let e = fx.store.create_entity();
        fx.store.attach(e, Position::new(1.0, 1.0)).unwrap();

        let mut ctx = SystemContext::new(0, SystemId("t"), fx.owner, &[], &mut fx.store, &mut fx.bus, &mut fx.commands);
        let mut components = ctx.components(e);
        assert!(components.has::<Position>());
        assert!(components.optional::<Energy>().is_none());
        assert!(components.require::<Energy>().is_err());

        components.set(Position::new(2.0, 2.0)).unwrap();
        let (pos,) = components.require_all::<(&Position,)>().unwrap();
        assert_eq!(pos.0, Vec2::new(2.0, 2.0));
        assert_eq!(ctx.position_of(e), Some(Vec2::new(2.0, 2.0)));
    }
}
