//! System scheduler
//!
//! Systems run in ascending priority, ties in registration order. Each system
//! moves Idle -> Due -> Running -> Idle; it becomes due when
//! `tick - last_run >= throttle`, or immediately if it has never run.

use std::fmt;

use crate::core::config::RuntimeConfig;
use crate::core::error::{Result, SimError};
use crate::core::types::{EntityId, SystemId, Tick};
use crate::ecs::commands::CommandBuffer;
use crate::ecs::world::World;
use crate::events::bus::OwnerId;
use crate::events::scoped::ScopedEventBus;
use crate::simulation::context::SystemContext;
use crate::simulation::culling::{ActiveSet, ActivityPolicy};
use crate::simulation::system::{System, SystemDescriptor};
use crate::simulation::tick::{SystemFailure, TickReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    Due,
    Running,
}

/// Whether a system last run at `last_run` is due at `tick`
pub fn is_due(last_run: Option<Tick>, tick: Tick, throttle: u64) -> bool {
    match last_run {
        None => true,
        Some(last) => tick.saturating_sub(last) >= throttle,
    }
}

struct ScheduledSystem {
    system: Box<dyn System>,
    descriptor: SystemDescriptor,
    owner: OwnerId,
    order: u64,
    state: SystemState,
    last_run: Option<Tick>,
    runs: u64,
}

pub struct Scheduler {
    /// Kept sorted by (priority, order)
    systems: Vec<ScheduledSystem>,
    policy: ActivityPolicy,
    commands: CommandBuffer,
    next_order: u64,
}

impl Scheduler {
    pub fn new(policy: ActivityPolicy) -> Self {
        Self {
            systems: Vec::new(),
            policy,
            commands: CommandBuffer::new(),
            next_order: 0,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(ActivityPolicy::from_config(config))
    }

    pub fn policy(&self) -> &ActivityPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut ActivityPolicy {
        &mut self.policy
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Register a system and run its `init`. Duplicate ids are a
    /// configuration error.
    pub fn add_system(&mut self, system: impl System + 'static, world: &mut World) -> Result<()> {
        self.add_boxed(Box::new(system), world)
    }

    pub fn add_boxed(&mut self, mut system: Box<dyn System>, world: &mut World) -> Result<()> {
        let descriptor = system.descriptor();
        let id = descriptor.id;
        if self.systems.iter().any(|s| s.descriptor.id == id) {
            return Err(SimError::DuplicateSystem(id));
        }

        let owner = world.bus.register_owner(id.0);
        if let Err(e) = system.init(&mut ScopedEventBus::new(&mut world.bus, owner)) {
            world.bus.unsubscribe_all(owner);
            world.bus.release_owner(owner);
            return Err(e.in_system(id));
        }

        let order = self.next_order;
        self.next_order += 1;
        let at = self
            .systems
            .partition_point(|s| (s.descriptor.priority, s.order) <= (descriptor.priority, order));

        tracing::info!(
            system = %id,
            priority = descriptor.priority,
            throttle = descriptor.throttle,
            culled = descriptor.culled,
            "Registered system"
        );
        self.systems.insert(
            at,
            ScheduledSystem {
                system,
                descriptor,
                owner,
                order,
                state: SystemState::Idle,
                last_run: None,
                runs: 0,
            },
        );
        Ok(())
    }

    /// Tear a system down and release any subscriptions it still holds
    pub fn remove_system(&mut self, id: SystemId, world: &mut World) -> Result<()> {
        let index = self
            .systems
            .iter()
            .position(|s| s.descriptor.id == id)
            .ok_or(SimError::UnknownSystem(id))?;
        let mut entry = self.systems.remove(index);

        entry
            .system
            .teardown(&mut ScopedEventBus::new(&mut world.bus, entry.owner));
        let leaked = world.bus.unsubscribe_all(entry.owner);
        if leaked > 0 {
            tracing::warn!(system = %id, leaked, "System left subscriptions after teardown");
        }
        world.bus.release_owner(entry.owner);
        Ok(())
    }

    /// Remove every system, highest priority first
    pub fn shutdown(&mut self, world: &mut World) {
        let ids: Vec<SystemId> = self.systems.iter().rev().map(|s| s.descriptor.id).collect();
        for id in ids {
            // Ids were just read from the list, so removal cannot miss
            let _ = self.remove_system(id, world);
        }
    }

    /// System ids in execution order
    pub fn system_ids(&self) -> Vec<SystemId> {
        self.systems.iter().map(|s| s.descriptor.id).collect()
    }

    fn find(&self, id: SystemId) -> Option<&ScheduledSystem> {
        self.systems.iter().find(|s| s.descriptor.id == id)
    }

    pub fn state(&self, id: SystemId) -> Option<SystemState> {
        self.find(id).map(|s| s.state)
    }

    pub fn last_run(&self, id: SystemId) -> Option<Tick> {
        self.find(id).and_then(|s| s.last_run)
    }

    pub fn run_count(&self, id: SystemId) -> Option<u64> {
        self.find(id).map(|s| s.runs)
    }

    pub fn descriptor(&self, id: SystemId) -> Option<&SystemDescriptor> {
        self.find(id).map(|s| &s.descriptor)
    }

    /// Mark systems due at `tick` and return them in execution order
    pub fn plan(&mut self, tick: Tick) -> Vec<SystemId> {
        let mut due = Vec::new();
        for entry in &mut self.systems {
            entry.state = if is_due(entry.last_run, tick, entry.descriptor.throttle) {
                due.push(entry.descriptor.id);
                SystemState::Due
            } else {
                SystemState::Idle
            };
        }
        due
    }

    /// Run every due system for the world's current tick, applying each
    /// system's deferred commands before the next one starts
    pub(crate) fn run_due(&mut self, world: &mut World, report: &mut TickReport) {
        let tick = world.current_tick;
        let due = self.plan(tick);
        report.throttled = self.systems.len() - due.len();
        if due.is_empty() {
            return;
        }

        let needs_culling = self
            .systems
            .iter()
            .any(|s| s.state == SystemState::Due && s.descriptor.culled);
        let active_set = if needs_culling {
            self.policy.evaluate(&world.store)
        } else {
            ActiveSet::default()
        };
        report.culled = active_set.culled_count();

        let Self { systems, commands, .. } = self;
        for entry in systems.iter_mut().filter(|s| s.state == SystemState::Due) {
            let id = entry.descriptor.id;
            let active: Vec<EntityId> = world
                .store
                .entities_with(&entry.descriptor.required)
                .into_iter()
                .filter(|e| !entry.descriptor.culled || active_set.is_active(*e))
                .collect();

            entry.state = SystemState::Running;
            tracing::debug!(system = %id, tick, active = active.len(), "Running system");

            let mut ctx = SystemContext::new(
                tick,
                id,
                entry.owner,
                &active,
                &mut world.store,
                &mut world.bus,
                commands,
            );
            let result = entry.system.update(&mut ctx);
            let entity_failures = ctx.into_failures();

            report
                .failures
                .extend(entity_failures.into_iter().map(|f| SystemFailure {
                    system: id,
                    entity: Some(f.entity),
                    error: f.error,
                }));
            if let Err(error) = result {
                tracing::error!(system = %id, tick, error = %error, "System update failed");
                report.failures.push(SystemFailure {
                    system: id,
                    entity: error.entity(),
                    error,
                });
            }

            // Commands recorded before a failure still apply
            for error in world.apply_commands(commands) {
                tracing::warn!(system = %id, error = %error, "Deferred command failed");
                report.failures.push(SystemFailure {
                    system: id,
                    entity: error.entity(),
                    error,
                });
            }

            entry.last_run = Some(tick);
            entry.runs += 1;
            entry.state = SystemState::Idle;
            report.ran.push(id);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(ActivityPolicy::default())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("systems", &self.system_ids())
            .field("policy", &self.policy)
            .finish()
    }
}
