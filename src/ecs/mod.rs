pub mod commands;
pub mod component;
pub mod composite;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod world;

pub use commands::{Command, CommandBuffer, Commands, EntityBuilder};
pub use component::{AlwaysActive, Component, ComponentKind, ErasedComponent, InstanceInfo, Position};
pub use composite::{BlendEntry, InstanceBlend};
pub use registry::{ComponentRegistry, Multiplicity};
pub use snapshot::{ComponentRecord, EntitySnapshot, IdRemap, WorldSnapshot};
pub use store::{EntityStore, RequireSet};
pub use world::World;
