//! Agent Runtime - entity-component store, spatial index, event bus and
//! tick scheduler for agent-based simulations

pub mod core;
pub mod ecs;
pub mod events;
pub mod simulation;
pub mod spatial;

pub use crate::core::{Result, RuntimeConfig, SimError};
pub use crate::core::types::{EntityId, InstanceId, SystemId, Tick, Vec2};
pub use crate::ecs::{Component, ComponentKind, ComponentRegistry, EntityBuilder, EntityStore, World};
pub use crate::events::{Event, EventBus, EventPriority, EventRecord};
pub use crate::simulation::{run_simulation_tick, FnSystem, Scheduler, System, SystemContext, SystemDescriptor};
