//! End-to-end tests: store, spatial queries, events and the tick loop together

use std::cell::RefCell;
use std::rc::Rc;

use agent_runtime::core::types::{EntityId, SystemId, Vec2};
use agent_runtime::core::RuntimeConfig;
use agent_runtime::ecs::{Component, ComponentKind, ComponentRegistry, EntityBuilder, Position, World};
use agent_runtime::events::{Event, EventPriority, EventRecord};
use agent_runtime::simulation::{run_simulation_tick, run_ticks, FnSystem, Scheduler, SystemContext, SystemDescriptor};
use agent_runtime::SimError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Resource {
    amount: f32,
}

impl Component for Resource {
    const KIND: ComponentKind = ComponentKind::new("resource");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Energy(f32);

impl Component for Energy {
    const KIND: ComponentKind = ComponentKind::new("energy");
}

#[derive(Debug, Clone)]
struct Signal(&'static str);

impl Event for Signal {
    const KIND: &'static str = "signal";
    const IMMEDIATE: bool = true;
}

fn registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry
        .register(
            |r: &Resource| {
                if r.amount >= 0.0 {
                    Ok(())
                } else {
                    Err(format!("amount must be non-negative, got {}", r.amount))
                }
            },
            || Resource { amount: 0.0 },
        )
        .unwrap();
    registry.register(|_: &Energy| Ok(()), || Energy(100.0)).unwrap();
    registry
}

fn world() -> World {
    World::new(RuntimeConfig::default(), registry()).unwrap()
}

fn resource_at(world: &mut World, x: f32, y: f32) -> EntityId {
    world
        .spawn(
            EntityBuilder::new()
                .with(Position::new(x, y))
                .with(Resource { amount: 10.0 }),
        )
        .unwrap()
}

#[test]
fn test_radius_query_returns_nearest_first() {
    let mut world = world();
    let origin = resource_at(&mut world, 0.0, 0.0);
    let near = resource_at(&mut world, 5.0, 0.0);
    let _far = resource_at(&mut world, 100.0, 100.0);
    // Positioned but not a resource
    world.spawn(EntityBuilder::new().with(Position::new(1.0, 1.0))).unwrap();

    let hits = world.store.entities_in_radius(Vec2::ZERO, 10.0, &[Resource::KIND]);
    let found: Vec<_> = hits.iter().map(|h| (h.entity, h.distance)).collect();
    assert_eq!(found, vec![(origin, 0.0), (near, 5.0)]);

    assert_eq!(world.store.count_in_radius(Vec2::ZERO, 10.0, &[Resource::KIND]), 2);
    assert!(!world.store.exists_in_radius(Vec2::new(50.0, 50.0), 10.0, &[Resource::KIND]));
}

#[test]
fn test_moved_entity_leaves_old_neighbourhood() {
    let mut world = world();
    let mover = resource_at(&mut world, 0.0, 0.0);

    world.store.set(mover, Position::new(400.0, 400.0)).unwrap();

    assert!(world.store.entities_in_radius(Vec2::ZERO, 10.0, &[]).is_empty());
    let hits = world.store.entities_in_radius(Vec2::new(400.0, 400.0), 1.0, &[]);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity, mover);
    assert!(world.store.spatial().check_consistency().is_ok());

    world.destroy_entity(mover).unwrap();
    assert_eq!(world.store.position_of(mover), None);
    assert!(world.store.spatial().is_empty());
}

#[test]
fn test_throttled_system_effects_visible_to_later_system() {
    let mut world = world();
    let agent = world.spawn(EntityBuilder::new().with(Energy(0.0))).unwrap();

    let observed = Rc::new(RefCell::new(Vec::new()));
    let sink = observed.clone();
    let mut scheduler = Scheduler::default();
    scheduler
        .add_system(
            FnSystem::new(
                SystemDescriptor::new("recharge", 10).requires(&[Energy::KIND]).every(5),
                |ctx: &mut SystemContext<'_>| {
                    ctx.for_each_active(|ctx, e| ctx.components(e).update::<Energy>(|en| Energy(en.0 + 1.0)));
                    Ok(())
                },
            ),
            &mut world,
        )
        .unwrap();
    scheduler
        .add_system(
            FnSystem::new(
                SystemDescriptor::new("observe", 20).requires(&[Energy::KIND]),
                move |ctx: &mut SystemContext<'_>| {
                    let tick = ctx.tick();
                    for &e in ctx.active_entities() {
                        let energy = ctx.store().require::<Energy>(e)?.0;
                        sink.borrow_mut().push((tick, energy));
                    }
                    Ok(())
                },
            ),
            &mut world,
        )
        .unwrap();

    let reports = run_ticks(&mut world, &mut scheduler, 7);

    let recharge_ticks: Vec<_> = reports
        .iter()
        .filter(|r| r.ran(SystemId("recharge")))
        .map(|r| r.tick)
        .collect();
    assert_eq!(recharge_ticks, vec![0, 5]);
    assert!(reports.iter().all(|r| r.ran(SystemId("observe"))));
    assert_eq!(
        *observed.borrow(),
        vec![(0, 1.0), (1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0), (5, 2.0), (6, 2.0)]
    );
    assert_eq!(world.store.get::<Energy>(agent), Some(&Energy(2.0)));
}

#[test]
fn test_throttle_runs_once_per_interval() {
    let mut world = world();
    let mut scheduler = Scheduler::default();
    scheduler
        .add_system(
            FnSystem::new(SystemDescriptor::new("slow", 0).every(4), |_ctx: &mut SystemContext<'_>| Ok(())),
            &mut world,
        )
        .unwrap();

    run_ticks(&mut world, &mut scheduler, 12);
    assert_eq!(scheduler.run_count(SystemId("slow")), Some(3));
    assert_eq!(scheduler.last_run(SystemId("slow")), Some(8));
}

#[test]
fn test_component_lifecycle() {
    let mut world = world();
    let e = world.store.create_entity();

    world.store.attach(e, Energy(5.0)).unwrap();
    assert_eq!(world.store.require::<Energy>(e).unwrap(), &Energy(5.0));

    world.store.update::<Energy>(e, |en| Energy(en.0 * 2.0)).unwrap();
    assert_eq!(world.store.get::<Energy>(e), Some(&Energy(10.0)));

    assert_eq!(world.store.detach::<Energy>(e).unwrap(), Energy(10.0));
    match world.store.require::<Energy>(e) {
        Err(SimError::MissingComponent { entity, kind }) => {
            assert_eq!(entity, e);
            assert_eq!(kind, Energy::KIND);
        }
        other => panic!("expected MissingComponent, got {:?}", other),
    }
}

#[test]
fn test_invalid_write_leaves_store_untouched() {
    let mut world = world();
    let e = resource_at(&mut world, 0.0, 0.0);

    let err = world
        .store
        .update::<Resource>(e, |_| Resource { amount: -1.0 })
        .unwrap_err();
    assert!(matches!(err, SimError::Validation { .. }));
    assert_eq!(world.store.get::<Resource>(e), Some(&Resource { amount: 10.0 }));

    let before = world.entity_count();
    let result = world.spawn(
        EntityBuilder::new()
            .with(Position::new(3.0, 3.0))
            .with(Resource { amount: -5.0 }),
    );
    assert!(result.is_err());
    assert_eq!(world.entity_count(), before);
    assert_eq!(world.store.count_in_radius(Vec2::new(3.0, 3.0), 1.0, &[]), 0);
}

#[test]
fn test_immediate_event_overtakes_queue() {
    let mut world = world();
    let owner = world.bus.register_owner("listener");
    let order = Rc::new(RefCell::new(Vec::new()));
    let sink = order.clone();
    world
        .bus
        .subscribe::<Signal>(owner, 0, move |r: &EventRecord<Signal>| sink.borrow_mut().push(r.payload.0));

    world.bus.emit(Signal("A"));
    world.bus.emit(Signal("B"));
    assert_eq!(world.bus.emit_immediate(Signal("C")).unwrap(), 1);
    world.bus.flush();

    assert_eq!(*order.borrow(), vec!["C", "A", "B"]);
}

#[test]
fn test_queued_priority_beats_enqueue_order() {
    let mut world = world();
    let owner = world.bus.register_owner("listener");
    let order = Rc::new(RefCell::new(Vec::new()));
    let sink = order.clone();
    world
        .bus
        .subscribe::<Signal>(owner, 0, move |r: &EventRecord<Signal>| sink.borrow_mut().push(r.payload.0));

    world.bus.emit_with_priority(None, EventPriority::Low, Signal("low"));
    world.bus.emit(Signal("normal"));
    world.bus.emit_with_priority(None, EventPriority::Critical, Signal("critical"));
    world.bus.flush();

    assert_eq!(*order.borrow(), vec!["critical", "normal", "low"]);
}

#[test]
fn test_unsubscribe_all_is_idempotent() {
    let mut world = world();
    let owner = world.bus.register_owner("temporary");
    let hits = Rc::new(RefCell::new(0));
    for _ in 0..3 {
        let sink = hits.clone();
        world
            .bus
            .subscribe::<Signal>(owner, 0, move |_: &EventRecord<Signal>| *sink.borrow_mut() += 1);
    }

    assert_eq!(world.bus.unsubscribe_all(owner), 3);
    assert_eq!(world.bus.unsubscribe_all(owner), 0);

    world.bus.emit(Signal("ignored"));
    world.bus.flush();
    assert_eq!(*hits.borrow(), 0);
}

#[test]
fn test_removed_system_releases_subscriptions() {
    let mut world = world();
    let mut scheduler = Scheduler::default();
    let baseline = world.bus.subscription_count();
    scheduler
        .add_system(
            FnSystem::new(SystemDescriptor::new("chatty", 0), |ctx: &mut SystemContext<'_>| {
                ctx.events().subscribe::<Signal>(0, |_: &EventRecord<Signal>| {});
                Ok(())
            }),
            &mut world,
        )
        .unwrap();

    run_ticks(&mut world, &mut scheduler, 3);
    assert_eq!(world.bus.subscription_count(), baseline + 3);

    scheduler.remove_system(SystemId("chatty"), &mut world).unwrap();
    assert_eq!(world.bus.subscription_count(), baseline);
}

#[test]
fn test_snapshot_restore_preserves_state() {
    let mut source = world();
    let a = resource_at(&mut source, 1.0, 2.0);
    let b = source
        .spawn(EntityBuilder::new().with(Energy(42.0)))
        .unwrap();
    source.store.destroy_entity(a).unwrap();
    let c = resource_at(&mut source, -3.0, 4.0);

    let json = source.snapshot().unwrap().to_json().unwrap();

    let mut target = world();
    let snapshot = agent_runtime::ecs::WorldSnapshot::from_json(&json).unwrap();
    let remap = target.restore(&snapshot).unwrap();

    assert_eq!(remap.len(), 2);
    let b2 = remap[&b];
    let c2 = remap[&c];
    assert_eq!(target.store.get::<Energy>(b2), Some(&Energy(42.0)));
    assert_eq!(target.store.get::<Resource>(c2), Some(&Resource { amount: 10.0 }));
    assert_eq!(target.store.position_of(c2), Some(Vec2::new(-3.0, 4.0)));
    let hits = target.store.entities_in_radius(Vec2::new(-3.0, 4.0), 0.5, &[Resource::KIND]);
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_snapshot_with_unknown_kind_is_rejected() {
    let mut source = world();
    resource_at(&mut source, 0.0, 0.0);
    let json = source.snapshot().unwrap().to_json().unwrap();

    let mut bare = World::new(RuntimeConfig::default(), ComponentRegistry::new()).unwrap();
    let snapshot = agent_runtime::ecs::WorldSnapshot::from_json(&json).unwrap();
    let err = bare.restore(&snapshot).unwrap_err();
    assert!(matches!(err, SimError::UnknownComponentKind(ref k) if k == "resource"));
    assert_eq!(bare.entity_count(), 0);
}

#[test]
fn test_far_entities_are_culled_until_poi_moves() {
    let mut world = world();
    let far = world
        .spawn(
            EntityBuilder::new()
                .with(Position::new(1_000.0, 0.0))
                .with(Energy(0.0)),
        )
        .unwrap();

    let mut scheduler = Scheduler::default();
    scheduler.policy_mut().add_point_of_interest(Vec2::ZERO);
    scheduler
        .add_system(
            FnSystem::new(
                SystemDescriptor::new("tick_energy", 0).requires(&[Energy::KIND]).culled(),
                |ctx: &mut SystemContext<'_>| {
                    ctx.for_each_active(|ctx, e| ctx.components(e).update::<Energy>(|en| Energy(en.0 + 1.0)));
                    Ok(())
                },
            ),
            &mut world,
        )
        .unwrap();

    let report = run_simulation_tick(&mut world, &mut scheduler);
    assert_eq!(report.culled, 1);
    assert_eq!(world.store.get::<Energy>(far), Some(&Energy(0.0)));

    scheduler.policy_mut().set_points_of_interest(vec![Vec2::new(1_000.0, 0.0)]);
    run_simulation_tick(&mut world, &mut scheduler);
    assert_eq!(world.store.get::<Energy>(far), Some(&Energy(1.0)));
}
