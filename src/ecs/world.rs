//! ECS World - the entity store, the event bus and the tick counter

use crate::core::config::RuntimeConfig;
use crate::core::error::{Result, SimError};
use crate::core::types::{EntityId, Tick};
use crate::ecs::commands::{Command, CommandBuffer, EntityBuilder};
use crate::ecs::registry::ComponentRegistry;
use crate::ecs::snapshot::{IdRemap, WorldSnapshot};
use crate::ecs::store::EntityStore;
use crate::events::bus::EventBus;
use crate::events::types::{ComponentDetached, EntityDestroyed};

/// The simulation world containing all entities
pub struct World {
    pub current_tick: Tick,
    pub store: EntityStore,
    pub bus: EventBus,
    config: RuntimeConfig,
}

impl World {
    /// Fails if the configuration is invalid
    pub fn new(config: RuntimeConfig, registry: ComponentRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current_tick: 0,
            store: EntityStore::with_config(registry, &config),
            bus: EventBus::new(config.history_capacity),
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn entity_count(&self) -> usize {
        self.store.len()
    }

    pub fn advance_tick(&mut self) {
        self.current_tick += 1;
        self.bus.set_tick(self.current_tick);
    }

    /// Create an entity with all of the builder's components. If any
    /// component is rejected the entity is not created.
    pub fn spawn(&mut self, builder: EntityBuilder) -> Result<EntityId> {
        let entity = self.store.reserve_entity();
        self.build(entity, builder)?;
        Ok(entity)
    }

    fn build(&mut self, entity: EntityId, builder: EntityBuilder) -> Result<()> {
        // Only a fresh reservation materializes, so the rollback below never
        // touches an entity that existed before this call
        self.store.materialize(entity)?;
        for (value, scope) in builder.components {
            if let Err(e) = self.store.attach_boxed(entity, value, scope) {
                self.store.destroy_entity(entity)?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Destroy now and queue an [`EntityDestroyed`] notification
    pub fn destroy_entity(&mut self, entity: EntityId) -> Result<()> {
        let kinds = self.store.destroy_entity(entity)?;
        self.bus.emit(EntityDestroyed { entity, kinds });
        Ok(())
    }

    /// Apply recorded commands in order. A failing command is skipped and
    /// its error returned; later commands still apply.
    pub fn apply_commands(&mut self, buffer: &mut CommandBuffer) -> Vec<SimError> {
        let mut errors = Vec::new();
        for command in buffer.drain() {
            let result = match command {
                Command::Spawn { entity, builder } => self.build(entity, builder),
                Command::Destroy { entity } => self.destroy_entity(entity),
                Command::Attach { entity, value, scope } => {
                    self.store.attach_boxed(entity, value, scope).map(|_| ())
                }
                Command::Detach { entity, kind } => self
                    .store
                    .detach_kind(entity, kind)
                    .map(|()| self.bus.emit(ComponentDetached { entity, kind })),
            };
            if let Err(e) = result {
                errors.push(e);
            }
        }
        errors
    }

    pub fn snapshot(&self) -> Result<WorldSnapshot> {
        Ok(WorldSnapshot {
            tick: self.current_tick,
            entities: self.store.snapshot()?,
        })
    }

    /// Restore snapshot entities into this world and adopt its tick
    pub fn restore(&mut self, snapshot: &WorldSnapshot) -> Result<IdRemap> {
        let remap = self.store.restore(&snapshot.entities)?;
        self.current_tick = snapshot.tick;
        self.bus.set_tick(snapshot.tick);
        Ok(remap)
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("current_tick", &self.current_tick)
            .field("store", &self.store)
            .field("bus", &self.bus)
            .finish()
    }
}
