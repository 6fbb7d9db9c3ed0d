pub mod context;
pub mod culling;
pub mod scheduler;
pub mod system;
pub mod tick;

pub use context::{EntityComponents, EntityFailure, SystemContext};
pub use culling::{ActiveSet, ActivityPolicy};
pub use scheduler::{Scheduler, SystemState};
pub use system::{FnSystem, System, SystemDescriptor};
pub use tick::{run_simulation_tick, run_ticks, SystemFailure, TickReport};
