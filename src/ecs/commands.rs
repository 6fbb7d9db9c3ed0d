//! Deferred structural mutations
//!
//! Systems iterate the store while they run, so spawning, destroying,
//! attaching and detaching are recorded as [`Command`]s and applied by the
//! scheduler once the system's update has returned. Commands apply in the
//! order they were recorded.

use crate::core::types::EntityId;
use crate::ecs::component::{Component, ComponentKind, ErasedComponent};
use crate::ecs::store::EntityStore;

/// Component list for a new entity
#[derive(Debug, Default)]
pub struct EntityBuilder {
    pub(crate) components: Vec<(Box<dyn ErasedComponent>, Option<String>)>,
}

impl EntityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.components.push((Box::new(value), None));
        self
    }

    /// Add a scoped instance of a multi-instance kind
    pub fn with_instance<T: Component>(mut self, value: T, scope: &str) -> Self {
        self.components.push((Box::new(value), Some(scope.to_string())));
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[derive(Debug)]
pub enum Command {
    /// Materialize a reserved id with the builder's components
    Spawn { entity: EntityId, builder: EntityBuilder },
    Destroy { entity: EntityId },
    Attach {
        entity: EntityId,
        value: Box<dyn ErasedComponent>,
        scope: Option<String>,
    },
    /// Removes every instance of the kind
    Detach { entity: EntityId, kind: ComponentKind },
}

impl Command {
    pub fn entity(&self) -> EntityId {
        match self {
            Command::Spawn { entity, .. }
            | Command::Destroy { entity }
            | Command::Attach { entity, .. }
            | Command::Detach { entity, .. } => *entity,
        }
    }
}

#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn destroy(&mut self, entity: EntityId) {
        self.push(Command::Destroy { entity });
    }

    pub fn attach<T: Component>(&mut self, entity: EntityId, value: T) {
        self.push(Command::Attach {
            entity,
            value: Box::new(value),
            scope: None,
        });
    }

    pub fn attach_instance<T: Component>(&mut self, entity: EntityId, value: T, scope: Option<&str>) {
        self.push(Command::Attach {
            entity,
            value: Box::new(value),
            scope: scope.map(str::to_string),
        });
    }

    pub fn detach<T: Component>(&mut self, entity: EntityId) {
        self.detach_kind(entity, T::KIND);
    }

    pub fn detach_kind(&mut self, entity: EntityId, kind: ComponentKind) {
        self.push(Command::Detach { entity, kind });
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Take the recorded commands in order, leaving the buffer empty
    pub fn drain(&mut self) -> std::vec::Drain<'_, Command> {
        self.commands.drain(..)
    }
}

/// Recording handle that can also reserve ids for spawned entities
pub struct Commands<'a> {
    store: &'a mut EntityStore,
    buffer: &'a mut CommandBuffer,
}

impl<'a> Commands<'a> {
    pub fn new(store: &'a mut EntityStore, buffer: &'a mut CommandBuffer) -> Self {
        Self { store, buffer }
    }

    /// The returned id is valid immediately but the entity only exists once
    /// the buffer is applied
    pub fn spawn(&mut self, builder: EntityBuilder) -> EntityId {
        let entity = self.store.reserve_entity();
        self.buffer.push(Command::Spawn { entity, builder });
        entity
    }

    pub fn destroy(&mut self, entity: EntityId) {
        self.buffer.destroy(entity);
    }

    pub fn attach<T: Component>(&mut self, entity: EntityId, value: T) {
        self.buffer.attach(entity, value);
    }

    pub fn attach_instance<T: Component>(&mut self, entity: EntityId, value: T, scope: Option<&str>) {
        self.buffer.attach_instance(entity, value, scope);
    }

    pub fn detach<T: Component>(&mut self, entity: EntityId) {
        self.buffer.detach::<T>(entity);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
