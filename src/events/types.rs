//! Event kinds emitted by the runtime itself

use crate::core::types::EntityId;
use crate::ecs::component::ComponentKind;
use crate::events::bus::{Event, EventPriority};

/// An entity was destroyed; `kinds` lists what it held
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDestroyed {
    pub entity: EntityId,
    pub kinds: Vec<ComponentKind>,
}

impl Event for EntityDestroyed {
    const KIND: &'static str = "entity_destroyed";
    const PRIORITY: EventPriority = EventPriority::High;
}

/// A component kind was removed by a deferred detach
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDetached {
    pub entity: EntityId,
    pub kind: ComponentKind,
}

impl Event for ComponentDetached {
    const KIND: &'static str = "component_detached";
}
