//! System abstraction
//!
//! A system is a unit of per-tick logic. It declares a [`SystemDescriptor`]
//! (ordering, required kinds, throttle, culling opt-in) and runs against a
//! [`SystemContext`] that the scheduler rebuilds every tick. [`FnSystem`]
//! covers systems that need no state of their own beyond a closure.

use std::fmt;

use crate::core::error::Result;
use crate::core::types::SystemId;
use crate::ecs::component::ComponentKind;
use crate::events::scoped::ScopedEventBus;
use crate::simulation::context::SystemContext;

/// Scheduling metadata for a system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDescriptor {
    pub id: SystemId,
    /// Lower runs earlier; equal priorities run in registration order
    pub priority: i32,
    /// Kinds an entity must hold to appear in the active list
    pub required: Vec<ComponentKind>,
    /// Minimum ticks between runs; 0 runs every tick
    pub throttle: u64,
    /// Whether activity culling narrows the active list
    pub culled: bool,
}

impl SystemDescriptor {
    pub fn new(id: &'static str, priority: i32) -> Self {
        Self {
            id: SystemId(id),
            priority,
            required: Vec::new(),
            throttle: 0,
            culled: false,
        }
    }

    pub fn requires(mut self, kinds: &[ComponentKind]) -> Self {
        self.required.extend_from_slice(kinds);
        self
    }

    pub fn every(mut self, ticks: u64) -> Self {
        self.throttle = ticks;
        self
    }

    pub fn culled(mut self) -> Self {
        self.culled = true;
        self
    }
}

/// A unit of logic run by the [`Scheduler`](crate::simulation::scheduler::Scheduler)
pub trait System {
    fn descriptor(&self) -> SystemDescriptor;

    /// Called once on registration; subscriptions made here belong to the system
    fn init(&mut self, _events: &mut ScopedEventBus<'_>) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()>;

    /// Called on removal. Subscriptions still held afterwards are released
    /// by the scheduler and logged as a leak.
    fn teardown(&mut self, _events: &mut ScopedEventBus<'_>) {}
}

/// A [`System`] backed by a closure
pub struct FnSystem<F>
where
    F: FnMut(&mut SystemContext<'_>) -> Result<()>,
{
    descriptor: SystemDescriptor,
    f: F,
}

impl<F> FnSystem<F>
where
    F: FnMut(&mut SystemContext<'_>) -> Result<()>,
{
    pub fn new(descriptor: SystemDescriptor, f: F) -> Self {
        Self { descriptor, f }
    }
}

impl<F> System for FnSystem<F>
where
    F: FnMut(&mut SystemContext<'_>) -> Result<()>,
{
    fn descriptor(&self) -> SystemDescriptor {
        self.descriptor.clone()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
        (self.f)(ctx)
    }
}

impl<F> fmt::Debug for FnSystem<F>
where
    F: FnMut(&mut SystemContext<'_>) -> Result<()>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSystem")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
