//! Tick driver - one simulation step
//!
//! Order within a tick:
//! relevance pass -> due systems in priority order (each followed by its
//! deferred commands) -> event flush -> tick advance.

use std::fmt;

use crate::core::error::SimError;
use crate::core::types::{EntityId, SystemId, Tick};
use crate::ecs::world::World;
use crate::simulation::scheduler::Scheduler;

/// An error raised while running a system, with the entity it concerns
#[derive(Debug)]
pub struct SystemFailure {
    pub system: SystemId,
    pub entity: Option<EntityId>,
    pub error: SimError,
}

impl fmt::Display for SystemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity {
            Some(entity) => write!(f, "system `{}` failed for {}: {}", self.system, entity, self.error),
            None => write!(f, "system `{}` failed: {}", self.system, self.error),
        }
    }
}

/// What happened during one tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: Tick,
    /// Systems that ran, in execution order
    pub ran: Vec<SystemId>,
    /// Systems skipped by their throttle
    pub throttled: usize,
    /// Entities excluded by activity culling
    pub culled: usize,
    pub failures: Vec<SystemFailure>,
    /// Queued events delivered at the end of the tick
    pub events_delivered: usize,
}

impl TickReport {
    pub fn new(tick: Tick) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    pub fn ran(&self, system: SystemId) -> bool {
        self.ran.contains(&system)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run one tick of the simulation
pub fn run_simulation_tick(world: &mut World, scheduler: &mut Scheduler) -> TickReport {
    let tick = world.current_tick;
    world.bus.set_tick(tick);

    let mut report = TickReport::new(tick);
    scheduler.run_due(world, &mut report);
    report.events_delivered = world.bus.flush();

    tracing::debug!(
        tick,
        ran = report.ran.len(),
        throttled = report.throttled,
        culled = report.culled,
        failures = report.failures.len(),
        events = report.events_delivered,
        "Tick complete"
    );

    world.advance_tick();
    report
}

/// Run `ticks` ticks and return every report
pub fn run_ticks(world: &mut World, scheduler: &mut Scheduler, ticks: u64) -> Vec<TickReport> {
    (0..ticks).map(|_| run_simulation_tick(world, scheduler)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeConfig;
    use crate::core::types::Vec2;
    use crate::ecs::commands::EntityBuilder;
    use crate::ecs::component::{AlwaysActive, Component, ComponentKind, Position};
    use crate::ecs::registry::ComponentRegistry;
    use crate::events::bus::{Event, EventRecord};
    use crate::simulation::context::SystemContext;
    use crate::simulation::system::{FnSystem, SystemDescriptor};
    use serde::{Deserialize, Serialize};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter(u32);

    impl Component for Counter {
        const KIND: ComponentKind = ComponentKind::new("counter");
    }

    #[derive(Debug, Clone)]
    struct Counted(u32);

    impl Event for Counted {
        const KIND: &'static str = "counted";
    }

    fn world() -> World {
        let mut registry = ComponentRegistry::new();
        registry.register(|_: &Counter| Ok(()), || Counter(0)).unwrap();
        World::new(RuntimeConfig::default(), registry).unwrap()
    }

    #[test]
    fn test_tick_advances_and_reports() {
        let mut world = world();
        let mut scheduler = Scheduler::default();
        scheduler
            .add_system(FnSystem::new(SystemDescriptor::new("noop", 0), |_ctx: &mut SystemContext<'_>| Ok(())), &mut world)
            .unwrap();

        let reports = run_ticks(&mut world, &mut scheduler, 3);
        assert_eq!(world.current_tick, 3);
        assert_eq!(reports.iter().map(|r| r.tick).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(reports.iter().all(|r| r.ran(SystemId("noop")) && r.is_clean()));
    }

    #[test]
    fn test_missing_component_fails_entity_not_tick() {
        let mut world = world();
        let good = world.spawn(EntityBuilder::new().with(Counter(0))).unwrap();
        let bad = world.spawn(EntityBuilder::new().with(AlwaysActive)).unwrap();

        let mut scheduler = Scheduler::default();
        scheduler
            .add_system(
                FnSystem::new(SystemDescriptor::new("count", 0), |ctx: &mut SystemContext<'_>| {
                    let all: Vec<_> = ctx.store().entities().collect();
                    for entity in all {
                        let result = ctx.components(entity).update::<Counter>(|c| Counter(c.0 + 1));
                        if let Err(e) = result {
                            ctx.record_failure(entity, e);
                        }
                    }
                    Ok(())
                }),
                &mut world,
            )
            .unwrap();

        let report = run_simulation_tick(&mut world, &mut scheduler);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entity, Some(bad));
        assert!(report.failures[0].to_string().contains("count"));
        assert_eq!(world.store.get::<Counter>(good), Some(&Counter(1)));
    }

    #[test]
    fn test_failed_system_does_not_stop_later_systems() {
        let mut world = world();
        let mut scheduler = Scheduler::default();
        scheduler
            .add_system(
                FnSystem::new(SystemDescriptor::new("broken", 0), |_ctx: &mut SystemContext<'_>| {
                    Err(SimError::Config("bad state".into()))
                }),
                &mut world,
            )
            .unwrap();
        scheduler
            .add_system(FnSystem::new(SystemDescriptor::new("after", 1), |_ctx: &mut SystemContext<'_>| Ok(())), &mut world)
            .unwrap();

        let report = run_simulation_tick(&mut world, &mut scheduler);
        assert_eq!(report.ran, vec![SystemId("broken"), SystemId("after")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].system, SystemId("broken"));
    }

    #[test]
    fn test_spawned_entities_visible_to_later_systems() {
        let mut world = world();
        let mut scheduler = Scheduler::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        scheduler
            .add_system(
                FnSystem::new(SystemDescriptor::new("spawner", 0), |ctx: &mut SystemContext<'_>| {
                    ctx.commands().spawn(EntityBuilder::new().with(Counter(7)));
                    Ok(())
                }),
                &mut world,
            )
            .unwrap();
        scheduler
            .add_system(
                FnSystem::new(
                    SystemDescriptor::new("reader", 1).requires(&[Counter::KIND]),
                    move |ctx: &mut SystemContext<'_>| {
                        sink.borrow_mut().push(ctx.active_entities().len());
                        Ok(())
                    },
                ),
                &mut world,
            )
            .unwrap();

        run_ticks(&mut world, &mut scheduler, 2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_queued_events_delivered_at_tick_end() {
        let mut world = world();
        let owner = world.bus.register_owner("observer");
        let heard = Rc::new(RefCell::new(Vec::new()));
        let sink = heard.clone();
        world
            .bus
            .subscribe::<Counted>(owner, 0, move |r: &EventRecord<Counted>| sink.borrow_mut().push((r.tick, r.payload.0)));

        let observed_during_tick = Rc::new(RefCell::new(Vec::new()));
        let seen = observed_during_tick.clone();
        let heard_seen = heard.clone();

        let mut scheduler = Scheduler::default();
        scheduler
            .add_system(
                FnSystem::new(SystemDescriptor::new("emitter", 0), |ctx: &mut SystemContext<'_>| {
                    let tick = ctx.tick() as u32;
                    ctx.events().emit(Counted(tick));
                    Ok(())
                }),
                &mut world,
            )
            .unwrap();
        scheduler
            .add_system(
                FnSystem::new(SystemDescriptor::new("observer", 1), move |_ctx: &mut SystemContext<'_>| {
                    seen.borrow_mut().push(heard_seen.borrow().len());
                    Ok(())
                }),
                &mut world,
            )
            .unwrap();

        let report = run_simulation_tick(&mut world, &mut scheduler);
        assert_eq!(report.events_delivered, 1);
        run_simulation_tick(&mut world, &mut scheduler);

        assert_eq!(*observed_during_tick.borrow(), vec![0, 1]);
        assert_eq!(*heard.borrow(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_culled_systems_skip_far_entities() {
        let mut world = world();
        let near = world
            .spawn(EntityBuilder::new().with(Position::new(1.0, 0.0)).with(Counter(0)))
            .unwrap();
        let far = world
            .spawn(EntityBuilder::new().with(Position::new(5000.0, 0.0)).with(Counter(0)))
            .unwrap();

        let mut scheduler = Scheduler::default();
        scheduler.policy_mut().add_point_of_interest(Vec2::ZERO);
        for (name, culled) in [("culled", true), ("everyone", false)] {
            let mut descriptor = SystemDescriptor::new(name, 0).requires(&[Counter::KIND]);
            descriptor.culled = culled;
            scheduler
                .add_system(
                    FnSystem::new(descriptor, |ctx: &mut SystemContext<'_>| {
                        ctx.for_each_active(|ctx, e| ctx.components(e).update::<Counter>(|c| Counter(c.0 + 1)));
                        Ok(())
                    }),
                    &mut world,
                )
                .unwrap();
        }

        let report = run_simulation_tick(&mut world, &mut scheduler);
        assert_eq!(report.culled, 1);
        assert_eq!(world.store.get::<Counter>(near), Some(&Counter(2)));
        assert_eq!(world.store.get::<Counter>(far), Some(&Counter(1)));
        assert!(world.store.position_of(far).is_some());
    }
}
