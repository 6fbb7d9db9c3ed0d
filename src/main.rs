//! Headless demo runner
//!
//! Seeds a world with wandering agents and food sources, runs needs,
//! movement, foraging and regrowth systems for a number of ticks and prints a
//! summary.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use agent_runtime::core::{Result, RuntimeConfig};
use agent_runtime::core::types::{EntityId, Vec2};
use agent_runtime::ecs::{Component, ComponentKind, ComponentRegistry, EntityBuilder, Position, World};
use agent_runtime::events::{Event, EventPriority, EventRecord, ScopedEventBus};
use agent_runtime::simulation::{run_simulation_tick, Scheduler, System, SystemContext, SystemDescriptor};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Headless agent runtime demo
#[derive(Parser, Debug)]
#[command(name = "agent-runtime")]
#[command(about = "Run a foraging simulation on the agent runtime and print a summary")]
struct Args {
    /// Number of ticks to simulate
    #[arg(long, default_value_t = 500)]
    ticks: u64,

    /// Number of foraging agents
    #[arg(long, default_value_t = 200)]
    agents: usize,

    /// Number of initial food sources
    #[arg(long, default_value_t = 60)]
    resources: usize,

    /// Side length of the square world
    #[arg(long, default_value_t = 400.0)]
    world_size: f32,

    /// Random seed for deterministic runs
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Runtime configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log every tick at debug level
    #[arg(long, short = 'v')]
    verbose: bool,
}

// ============================================================================
// Demo components and events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Hunger {
    level: f32,
    rate: f32,
}

impl Component for Hunger {
    const KIND: ComponentKind = ComponentKind::new("hunger");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Wander {
    heading: Vec2,
    speed: f32,
}

impl Component for Wander {
    const KIND: ComponentKind = ComponentKind::new("wander");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Food {
    amount: f32,
}

impl Component for Food {
    const KIND: ComponentKind = ComponentKind::new("food");
}

#[derive(Debug, Clone)]
struct Foraged {
    food: EntityId,
    amount: f32,
}

impl Event for Foraged {
    const KIND: &'static str = "foraged";
}

#[derive(Debug, Clone)]
struct Starving;

impl Event for Starving {
    const KIND: &'static str = "starving";
    const PRIORITY: EventPriority = EventPriority::High;
    const IMMEDIATE: bool = true;
}

fn registry() -> Result<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    registry.register(
        |h: &Hunger| {
            if (0.0..=1.0).contains(&h.level) && h.rate >= 0.0 {
                Ok(())
            } else {
                Err(format!("hunger {} / rate {} out of range", h.level, h.rate))
            }
        },
        || Hunger { level: 0.0, rate: 0.005 },
    )?;
    registry.register(
        |w: &Wander| {
            if w.heading.is_finite() && w.speed >= 0.0 {
                Ok(())
            } else {
                Err("heading must be finite and speed non-negative".to_string())
            }
        },
        || Wander { heading: Vec2::new(1.0, 0.0), speed: 1.0 },
    )?;
    registry.register(
        |f: &Food| {
            if f.amount >= 0.0 {
                Ok(())
            } else {
                Err(format!("negative food amount {}", f.amount))
            }
        },
        || Food { amount: 1.0 },
    )?;
    Ok(registry)
}

fn random_point(rng: &mut ChaCha8Rng, size: f32) -> Vec2 {
    Vec2::new(rng.gen_range(0.0..size), rng.gen_range(0.0..size))
}

fn random_heading(rng: &mut ChaCha8Rng) -> Vec2 {
    let angle = rng.gen_range(0.0..std::f32::consts::TAU);
    Vec2::new(angle.cos(), angle.sin())
}

// ============================================================================
// Demo systems
// ============================================================================

/// Hunger grows every tick; crossing 1.0 raises an immediate alarm
struct NeedsSystem;

impl System for NeedsSystem {
    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new("needs", 0).requires(&[Hunger::KIND]).culled()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
        ctx.for_each_active(|ctx, agent| {
            let hunger = ctx.components(agent).require::<Hunger>()?.clone();
            let level = (hunger.level + hunger.rate).min(1.0);
            ctx.components(agent).set(Hunger { level, ..hunger.clone() })?;
            if level >= 1.0 && hunger.level < 1.0 {
                ctx.events().emit_immediate_from(agent, Starving)?;
            }
            Ok(())
        });
        Ok(())
    }
}

/// Hungry agents head for the nearest food; the rest wander
struct MovementSystem {
    rng: ChaCha8Rng,
    world_size: f32,
}

impl System for MovementSystem {
    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new("movement", 10)
            .requires(&[Position::KIND, Wander::KIND, Hunger::KIND])
            .culled()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
        let rng = &mut self.rng;
        let size = self.world_size;
        ctx.for_each_active(|ctx, agent| {
            let (pos, wander, hunger) = ctx
                .components(agent)
                .require_all::<(&Position, &Wander, &Hunger)>()
                .map(|(p, w, h)| (p.0, w.clone(), h.level))?;

            let target = if hunger > 0.5 {
                ctx.nearest(pos, &[Food::KIND])
                    .and_then(|hit| ctx.position_of(hit.entity))
            } else {
                None
            };

            let heading = match target {
                Some(food) => (food - pos).normalize(),
                None if rng.gen_bool(0.05) => random_heading(rng),
                None => wander.heading,
            };
            let next = pos + heading * wander.speed;
            let clamped = Vec2::new(next.x.clamp(0.0, size), next.y.clamp(0.0, size));

            let mut components = ctx.components(agent);
            components.set(Position(clamped))?;
            components.set(Wander { heading, ..wander })
        });
        Ok(())
    }
}

/// Agents next to food eat from it; empty food sources are removed
struct ForageSystem;

impl System for ForageSystem {
    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new("forage", 20)
            .requires(&[Position::KIND, Hunger::KIND])
            .every(2)
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
        ctx.for_each_active(|ctx, agent| {
            let hunger = ctx.components(agent).require::<Hunger>()?.level;
            if hunger < 0.2 {
                return Ok(());
            }
            let Some(hit) = ctx.nearby(agent, 2.0, &[Food::KIND]).into_iter().next() else {
                return Ok(());
            };

            let available = ctx.components(hit.entity).require::<Food>()?.amount;
            let eaten = available.min(hunger);
            if eaten <= 0.0 {
                return Ok(());
            }
            ctx.components(hit.entity).set(Food { amount: available - eaten })?;
            ctx.components(agent).update::<Hunger>(|h| Hunger {
                level: (h.level - eaten).max(0.0),
                ..h.clone()
            })?;
            if available - eaten <= f32::EPSILON {
                ctx.commands().destroy(hit.entity);
            }
            ctx.events().emit_from(agent, Foraged { food: hit.entity, amount: eaten });
            Ok(())
        });
        Ok(())
    }
}

/// Periodically grows new food at random spots
struct RegrowthSystem {
    rng: ChaCha8Rng,
    world_size: f32,
    per_run: usize,
}

impl System for RegrowthSystem {
    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new("regrowth", 30).every(25)
    }

    fn init(&mut self, events: &mut ScopedEventBus<'_>) -> Result<()> {
        events.subscribe::<Foraged>(0, |record: &EventRecord<Foraged>| {
            tracing::trace!(food = %record.payload.food, amount = record.payload.amount, "Food eaten");
        });
        Ok(())
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
        for _ in 0..self.per_run {
            let at = random_point(&mut self.rng, self.world_size);
            ctx.commands().spawn(
                EntityBuilder::new()
                    .with(Position(at))
                    .with(Food { amount: self.rng.gen_range(0.5..2.0) }),
            );
        }
        Ok(())
    }

    fn teardown(&mut self, events: &mut ScopedEventBus<'_>) {
        events.cleanup();
    }
}

// ============================================================================
// Runner
// ============================================================================

#[derive(Debug, Default)]
struct Summary {
    foraged: u64,
    eaten: f32,
    starving: u64,
    failures: usize,
    events: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    tracing::info!(?config, "Agent runtime demo starting");

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let mut world = World::new(config.clone(), registry()?)?;

    for _ in 0..args.agents {
        let at = random_point(&mut rng, args.world_size);
        let heading = random_heading(&mut rng);
        world.spawn(
            EntityBuilder::new()
                .with(Position(at))
                .with(Wander { heading, speed: rng.gen_range(0.5..1.5) })
                .with(Hunger { level: rng.gen_range(0.0..0.5), rate: 0.004 }),
        )?;
    }
    for _ in 0..args.resources {
        let at = random_point(&mut rng, args.world_size);
        world.spawn(EntityBuilder::new().with(Position(at)).with(Food { amount: 1.5 }))?;
    }

    let summary = Rc::new(RefCell::new(Summary::default()));
    let observer = world.bus.register_owner("summary");
    let sink = summary.clone();
    world.bus.subscribe::<Foraged>(observer, 100, move |r: &EventRecord<Foraged>| {
        let mut s = sink.borrow_mut();
        s.foraged += 1;
        s.eaten += r.payload.amount;
    });
    let sink = summary.clone();
    world.bus.subscribe::<Starving>(observer, 100, move |_: &EventRecord<Starving>| {
        sink.borrow_mut().starving += 1;
    });

    let mut scheduler = Scheduler::from_config(&config);
    let centre = Vec2::new(args.world_size / 2.0, args.world_size / 2.0);
    scheduler.policy_mut().add_point_of_interest(centre);

    scheduler.add_system(NeedsSystem, &mut world)?;
    scheduler.add_system(
        MovementSystem {
            rng: ChaCha8Rng::seed_from_u64(args.seed.wrapping_add(1)),
            world_size: args.world_size,
        },
        &mut world,
    )?;
    scheduler.add_system(ForageSystem, &mut world)?;
    scheduler.add_system(
        RegrowthSystem {
            rng: ChaCha8Rng::seed_from_u64(args.seed.wrapping_add(2)),
            world_size: args.world_size,
            per_run: (args.resources / 10).max(1),
        },
        &mut world,
    )?;

    for _ in 0..args.ticks {
        let report = run_simulation_tick(&mut world, &mut scheduler);
        let mut s = summary.borrow_mut();
        s.failures += report.failures.len();
        s.events += report.events_delivered;
        for failure in &report.failures {
            tracing::debug!(%failure, "Tick failure");
        }
    }

    let agents = world.store.entities_with(&[Hunger::KIND]);
    let mean_hunger = if agents.is_empty() {
        0.0
    } else {
        agents
            .iter()
            .filter_map(|&a| world.store.get::<Hunger>(a))
            .map(|h| h.level)
            .sum::<f32>()
            / agents.len() as f32
    };
    let food_left = world.store.count_with(Food::KIND);

    scheduler.shutdown(&mut world);
    world.bus.unsubscribe_all(observer);
    world.bus.release_owner(observer);

    let s = summary.borrow();
    println!("=== Agent Runtime Demo ===");
    println!("ticks:          {}", world.current_tick);
    println!("entities:       {}", world.entity_count());
    println!("agents:         {}", agents.len());
    println!("food sources:   {}", food_left);
    println!("mean hunger:    {:.3}", mean_hunger);
    println!("forage events:  {} ({:.1} eaten)", s.foraged, s.eaten);
    println!("starvations:    {}", s.starving);
    println!("events flushed: {}", s.events);
    println!("failures:       {}", s.failures);
    Ok(())
}
