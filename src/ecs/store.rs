//! Entity store - owns entities and their attached component instances
//!
//! Every write is validated through the [`ComponentRegistry`]. Writes to the
//! `position` kind update the owned [`SpatialIndex`] in the same call, so the
//! index is never stale once a mutation returns.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;

use crate::core::config::RuntimeConfig;
use crate::core::error::{Result, SimError};
use crate::core::types::{EntityId, InstanceId, Vec2};
use crate::ecs::component::{
    Component, ComponentKind, ComponentSlot, ErasedComponent, InstanceInfo, Position,
};
use crate::ecs::composite::InstanceBlend;
use crate::ecs::registry::{ComponentRegistry, Multiplicity};
use crate::spatial::index::{SpatialHit, SpatialIndex};

#[derive(Debug, Default)]
struct EntityRecord {
    /// Single-instance kinds hold exactly one slot
    components: BTreeMap<ComponentKind, Vec<ComponentSlot>>,
}

/// Typed tuple of required components, see [`EntityStore::require_all`]
pub trait RequireSet<'a>: Sized {
    fn fetch(store: &'a EntityStore, entity: EntityId) -> Result<Self>;
}

macro_rules! impl_require_set {
    ($($t:ident),+) => {
        impl<'a, $($t: Component),+> RequireSet<'a> for ($(&'a $t,)+) {
            fn fetch(store: &'a EntityStore, entity: EntityId) -> Result<Self> {
                // Fields are fetched left to right, so the first absent kind is reported
                Ok(($(store.require::<$t>(entity)?,)+))
            }
        }
    };
}

impl_require_set!(A);
impl_require_set!(A, B);
impl_require_set!(A, B, C);
impl_require_set!(A, B, C, D);
impl_require_set!(A, B, C, D, E);

/// The entity-component store
pub struct EntityStore {
    registry: ComponentRegistry,
    entities: BTreeMap<EntityId, EntityRecord>,
    by_kind: AHashMap<ComponentKind, BTreeSet<EntityId>>,
    spatial: SpatialIndex,
    /// Ids handed out by `reserve_entity` that have not been materialized yet
    reserved: BTreeSet<EntityId>,
    next_id: u64,
}

impl EntityStore {
    pub fn new(registry: ComponentRegistry, chunk_size: f32) -> Self {
        Self {
            registry,
            entities: BTreeMap::new(),
            by_kind: AHashMap::new(),
            spatial: SpatialIndex::new(chunk_size),
            reserved: BTreeSet::new(),
            next_id: 1,
        }
    }

    pub fn with_config(registry: ComponentRegistry, config: &RuntimeConfig) -> Self {
        Self::new(registry, config.chunk_size)
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    // ========================================================================
    // Entity lifecycle
    // ========================================================================

    pub fn create_entity(&mut self) -> EntityId {
        let id = self.allocate_id();
        self.entities.insert(id, EntityRecord::default());
        id
    }

    /// Hand out an id now; the entity exists once [`materialize`](Self::materialize) runs
    pub fn reserve_entity(&mut self) -> EntityId {
        let id = self.allocate_id();
        self.reserved.insert(id);
        id
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create the record for a reserved id. Each reservation materializes at
    /// most once; live, destroyed and unknown ids are rejected.
    pub fn materialize(&mut self, entity: EntityId) -> Result<()> {
        if !self.reserved.remove(&entity) {
            return Err(SimError::EntityNotFound(entity));
        }
        self.entities.insert(entity, EntityRecord::default());
        Ok(())
    }

    pub fn is_reserved(&self, entity: EntityId) -> bool {
        self.reserved.contains(&entity)
    }

    /// Remove an entity and every component it holds; returns the kinds it had
    pub fn destroy_entity(&mut self, entity: EntityId) -> Result<Vec<ComponentKind>> {
        let record = self
            .entities
            .remove(&entity)
            .ok_or(SimError::EntityNotFound(entity))?;

        let kinds: Vec<ComponentKind> = record.components.keys().copied().collect();
        for kind in &kinds {
            if let Some(members) = self.by_kind.get_mut(kind) {
                members.remove(&entity);
            }
        }
        self.spatial.remove(entity);
        Ok(kinds)
    }

    // ========================================================================
    // Attach
    // ========================================================================

    /// Attach a component. Fails with `DuplicateComponent` if a single-instance
    /// kind is already present and with `Validation` if the registry rejects it;
    /// in both cases the entity is unchanged.
    pub fn attach<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        self.attach_boxed(entity, Box::new(value), None).map(|_| ())
    }

    /// Attach the kind's registered default value
    pub fn attach_default<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        let value = self.registry.default_of::<T>()?;
        self.attach(entity, value)
    }

    /// Attach one more instance of a multi-instance kind
    pub fn attach_instance<T: Component>(
        &mut self,
        entity: EntityId,
        value: T,
        scope: Option<&str>,
    ) -> Result<InstanceId> {
        match self.registry.multiplicity(T::KIND) {
            Some(Multiplicity::Multi) => {}
            Some(Multiplicity::Single) => return Err(SimError::NotMultiInstance(T::KIND)),
            None => return Err(SimError::UnknownComponentKind(T::KIND.to_string())),
        }
        self.attach_boxed(entity, Box::new(value), scope.map(str::to_string))
    }

    /// Type-erased attach used by deferred commands and loaders
    pub fn attach_boxed(
        &mut self,
        entity: EntityId,
        value: Box<dyn ErasedComponent>,
        scope: Option<String>,
    ) -> Result<InstanceId> {
        self.attach_slot(entity, ComponentSlot::new(value, scope))
    }

    pub(crate) fn attach_slot(&mut self, entity: EntityId, slot: ComponentSlot) -> Result<InstanceId> {
        let kind = slot.value.kind();
        self.registry.check_erased(slot.value.as_ref(), Some(entity))?;
        Self::check_indexable(&self.spatial, entity, slot.value.as_ref())?;
        let multiplicity = self
            .registry
            .multiplicity(kind)
            .ok_or_else(|| SimError::UnknownComponentKind(kind.to_string()))?;

        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(SimError::EntityNotFound(entity))?;

        let slots = record.components.entry(kind).or_default();
        if multiplicity == Multiplicity::Single && !slots.is_empty() {
            return Err(SimError::DuplicateComponent { entity, kind });
        }

        let instance = slot.instance;
        slots.push(slot);
        self.by_kind.entry(kind).or_default().insert(entity);

        if kind == Position::KIND {
            self.sync_spatial(entity);
        }
        Ok(instance)
    }

    // ========================================================================
    // Read
    // ========================================================================

    fn slots(&self, entity: EntityId, kind: ComponentKind) -> Option<&[ComponentSlot]> {
        self.entities
            .get(&entity)?
            .components
            .get(&kind)
            .map(Vec::as_slice)
    }

    /// Component value, or `None` if absent. For multi-instance kinds this is
    /// the first attached instance.
    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.slots(entity, T::KIND)?.first()?.downcast::<T>()
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.has_kind(entity, T::KIND)
    }

    pub fn has_kind(&self, entity: EntityId, kind: ComponentKind) -> bool {
        self.slots(entity, kind).map_or(false, |s| !s.is_empty())
    }

    /// Component value or `MissingComponent` naming the entity and kind
    pub fn require<T: Component>(&self, entity: EntityId) -> Result<&T> {
        let record = self
            .entities
            .get(&entity)
            .ok_or(SimError::EntityNotFound(entity))?;
        record
            .components
            .get(&T::KIND)
            .and_then(|slots| slots.first())
            .ok_or(SimError::MissingComponent {
                entity,
                kind: T::KIND,
            })?
            .downcast::<T>()
            .ok_or(SimError::KindTypeMismatch(T::KIND))
    }

    /// Fetch several components at once:
    /// `let (pos, hunger) = store.require_all::<(&Position, &Hunger)>(id)?;`
    pub fn require_all<'a, Q: RequireSet<'a>>(&'a self, entity: EntityId) -> Result<Q> {
        Q::fetch(self, entity)
    }

    /// Check kinds by tag; the error names the first absent kind
    pub fn require_kinds(&self, entity: EntityId, kinds: &[ComponentKind]) -> Result<()> {
        if !self.contains(entity) {
            return Err(SimError::EntityNotFound(entity));
        }
        match kinds.iter().find(|kind| !self.has_kind(entity, **kind)) {
            Some(kind) => Err(SimError::MissingComponent {
                entity,
                kind: *kind,
            }),
            None => Ok(()),
        }
    }

    /// Every instance of a kind with its identity
    pub fn instances<T: Component>(
        &self,
        entity: EntityId,
    ) -> impl Iterator<Item = (InstanceInfo<'_>, &T)> + '_ {
        self.slots(entity, T::KIND)
            .unwrap_or(&[])
            .iter()
            .filter_map(|slot| {
                let value = slot.downcast::<T>()?;
                let info = InstanceInfo {
                    id: slot.instance,
                    scope: slot.scope.as_deref(),
                };
                Some((info, value))
            })
    }

    pub fn instance<T: Component>(&self, entity: EntityId, instance: InstanceId) -> Option<&T> {
        self.slots(entity, T::KIND)?
            .iter()
            .find(|slot| slot.instance == instance)?
            .downcast::<T>()
    }

    /// Kinds present on an entity, in name order
    pub fn kinds_of(&self, entity: EntityId) -> Vec<ComponentKind> {
        self.entities
            .get(&entity)
            .map(|r| r.components.keys().copied().collect())
            .unwrap_or_default()
    }

    /// All entity ids in ascending order
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Entities holding every listed kind, ascending. Cost follows the rarest kind.
    pub fn entities_with(&self, kinds: &[ComponentKind]) -> Vec<EntityId> {
        if kinds.is_empty() {
            return self.entities().collect();
        }
        let mut sets = Vec::with_capacity(kinds.len());
        for kind in kinds {
            match self.by_kind.get(kind) {
                Some(set) if !set.is_empty() => sets.push(set),
                _ => return Vec::new(),
            }
        }
        sets.sort_by_key(|set| set.len());
        let Some((smallest, rest)) = sets.split_first() else {
            return Vec::new();
        };
        smallest
            .iter()
            .copied()
            .filter(|e| rest.iter().all(|set| set.contains(e)))
            .collect()
    }

    pub fn count_with(&self, kind: ComponentKind) -> usize {
        self.by_kind.get(&kind).map_or(0, BTreeSet::len)
    }

    fn has_all(&self, entity: EntityId, kinds: &[ComponentKind]) -> bool {
        kinds.iter().all(|kind| self.has_kind(entity, *kind))
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Replace a component with `f(current)`. The result is validated; if it is
    /// rejected the stored value is left untouched.
    pub fn update<T: Component>(&mut self, entity: EntityId, f: impl FnOnce(&T) -> T) -> Result<()> {
        let slot = self
            .entities
            .get_mut(&entity)
            .ok_or(SimError::EntityNotFound(entity))?
            .components
            .get_mut(&T::KIND)
            .and_then(|slots| slots.first_mut())
            .ok_or(SimError::MissingComponent {
                entity,
                kind: T::KIND,
            })?;
        Self::apply_update(&self.registry, &self.spatial, entity, slot, f)?;

        if T::KIND == Position::KIND {
            self.sync_spatial(entity);
        }
        Ok(())
    }

    /// Update one instance of a multi-instance kind
    pub fn update_instance<T: Component>(
        &mut self,
        entity: EntityId,
        instance: InstanceId,
        f: impl FnOnce(&T) -> T,
    ) -> Result<()> {
        let slots = self
            .entities
            .get_mut(&entity)
            .ok_or(SimError::EntityNotFound(entity))?
            .components
            .get_mut(&T::KIND)
            .ok_or(SimError::MissingComponent {
                entity,
                kind: T::KIND,
            })?;
        let slot = slots
            .iter_mut()
            .find(|slot| slot.instance == instance)
            .ok_or(SimError::InstanceNotFound {
                entity,
                kind: T::KIND,
                instance,
            })?;
        Self::apply_update(&self.registry, &self.spatial, entity, slot, f)?;

        if T::KIND == Position::KIND {
            self.sync_spatial(entity);
        }
        Ok(())
    }

    /// Overwrite an existing component
    pub fn set<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        self.update::<T>(entity, move |_| value)
    }

    fn apply_update<T: Component>(
        registry: &ComponentRegistry,
        spatial: &SpatialIndex,
        entity: EntityId,
        slot: &mut ComponentSlot,
        f: impl FnOnce(&T) -> T,
    ) -> Result<()> {
        let current = slot
            .downcast::<T>()
            .ok_or(SimError::KindTypeMismatch(T::KIND))?;
        let next = f(current);
        registry.check(&next, Some(entity))?;
        Self::check_indexable(spatial, entity, &next)?;
        slot.value = Box::new(next);
        Ok(())
    }

    /// Positions must fit the spatial index's chunk arithmetic
    fn check_indexable(spatial: &SpatialIndex, entity: EntityId, value: &dyn ErasedComponent) -> Result<()> {
        match value.as_any().downcast_ref::<Position>() {
            Some(Position(pos)) if !spatial.accepts(*pos) => Err(SimError::Validation {
                entity: Some(entity),
                kind: Position::KIND,
                reason: format!("({}, {}) is outside the indexable range", pos.x, pos.y),
            }),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Detach
    // ========================================================================

    /// Remove a kind entirely and return its (first) value
    pub fn detach<T: Component>(&mut self, entity: EntityId) -> Result<T> {
        let mut slots = self.take_kind(entity, T::KIND)?;
        let first = slots.swap_remove(0);
        first
            .value
            .into_any()
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| SimError::KindTypeMismatch(T::KIND))
    }

    /// Remove a kind entirely by tag
    pub fn detach_kind(&mut self, entity: EntityId, kind: ComponentKind) -> Result<()> {
        self.take_kind(entity, kind).map(|_| ())
    }

    /// Remove one instance of a multi-instance kind. Blend entries that refer
    /// to the instance are dropped with it.
    pub fn detach_instance<T: Component>(&mut self, entity: EntityId, instance: InstanceId) -> Result<T> {
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(SimError::EntityNotFound(entity))?;
        let slots = record
            .components
            .get_mut(&T::KIND)
            .ok_or(SimError::MissingComponent {
                entity,
                kind: T::KIND,
            })?;
        let idx = slots
            .iter()
            .position(|slot| slot.instance == instance)
            .ok_or(SimError::InstanceNotFound {
                entity,
                kind: T::KIND,
                instance,
            })?;

        let slot = slots.remove(idx);
        if slots.is_empty() {
            record.components.remove(&T::KIND);
            if let Some(members) = self.by_kind.get_mut(&T::KIND) {
                members.remove(&entity);
            }
        }

        if self.has::<InstanceBlend>(entity) {
            self.update::<InstanceBlend>(entity, |blend| {
                let mut pruned = blend.clone();
                pruned.remove_instance(instance);
                pruned
            })?;
        }
        if T::KIND == Position::KIND {
            self.sync_spatial(entity);
        }

        slot.value
            .into_any()
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| SimError::KindTypeMismatch(T::KIND))
    }

    fn take_kind(&mut self, entity: EntityId, kind: ComponentKind) -> Result<Vec<ComponentSlot>> {
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(SimError::EntityNotFound(entity))?;
        let slots = record
            .components
            .remove(&kind)
            .filter(|slots| !slots.is_empty())
            .ok_or(SimError::MissingComponent { entity, kind })?;
        if let Some(members) = self.by_kind.get_mut(&kind) {
            members.remove(&entity);
        }
        if kind == Position::KIND {
            self.sync_spatial(entity);
        }
        Ok(slots)
    }

    // ========================================================================
    // Spatial
    // ========================================================================

    /// Re-index an entity from its current position component
    fn sync_spatial(&mut self, entity: EntityId) {
        match self.get::<Position>(entity).map(|p| p.0) {
            Some(pos) => {
                self.spatial.upsert(entity, pos);
            }
            None => {
                self.spatial.remove(entity);
            }
        }
    }

    /// Indexed position; `None` if the entity was destroyed or has no position
    pub fn position_of(&self, entity: EntityId) -> Option<Vec2> {
        self.spatial.position(entity)
    }

    /// Entities within `radius` holding every kind in `kinds`, nearest first
    pub fn entities_in_radius(&self, center: Vec2, radius: f32, kinds: &[ComponentKind]) -> Vec<SpatialHit> {
        self.spatial
            .query_radius(center, radius, |e| self.has_all(e, kinds))
    }

    /// Radius query with an extra predicate evaluated after the kind filter
    pub fn entities_in_radius_where(
        &self,
        center: Vec2,
        radius: f32,
        kinds: &[ComponentKind],
        mut predicate: impl FnMut(EntityId) -> bool,
    ) -> Vec<SpatialHit> {
        self.spatial
            .query_radius(center, radius, |e| self.has_all(e, kinds) && predicate(e))
    }

    pub fn nearest(&self, center: Vec2, kinds: &[ComponentKind]) -> Option<SpatialHit> {
        self.spatial.nearest(center, None, |e| self.has_all(e, kinds))
    }

    pub fn nearest_where(
        &self,
        center: Vec2,
        kinds: &[ComponentKind],
        max_radius: Option<f32>,
        mut predicate: impl FnMut(EntityId) -> bool,
    ) -> Option<SpatialHit> {
        self.spatial
            .nearest(center, max_radius, |e| self.has_all(e, kinds) && predicate(e))
    }

    pub fn exists_in_radius(&self, center: Vec2, radius: f32, kinds: &[ComponentKind]) -> bool {
        self.spatial.exists(center, radius, |e| self.has_all(e, kinds))
    }

    pub fn count_in_radius(&self, center: Vec2, radius: f32, kinds: &[ComponentKind]) -> usize {
        self.spatial.count(center, radius, |e| self.has_all(e, kinds))
    }

    // ========================================================================
    // Raw access for persistence
    // ========================================================================

    /// Every stored slot as `(entity, kind, slot)`, entities and kinds ascending
    pub(crate) fn slots_iter(&self) -> impl Iterator<Item = (EntityId, ComponentKind, &ComponentSlot)> + '_ {
        self.entities.iter().flat_map(|(entity, record)| {
            record
                .components
                .iter()
                .flat_map(move |(kind, slots)| slots.iter().map(move |slot| (*entity, *kind, slot)))
        })
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("entities", &self.entities.len())
            .field("indexed", &self.spatial.len())
            .field("reserved", &self.reserved.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
