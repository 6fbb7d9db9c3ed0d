pub mod config;
pub mod error;
pub mod types;

pub use config::{CullingConfig, RuntimeConfig};
pub use error::{Result, SimError};
pub use types::{EntityId, InstanceId, SystemId, Tick, Vec2};
