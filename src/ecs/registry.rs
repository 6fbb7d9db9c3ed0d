//! Component registry - declares component kinds, their validators and
//! default factories.
//!
//! Kinds are registered once at startup. Registering a kind twice is a
//! configuration error rather than a silent overwrite: every entity already
//! holding that kind's data would otherwise be reinterpreted.

use std::any::{Any, TypeId};

use ahash::AHashMap;

use crate::core::error::{Result, SimError};
use crate::core::types::EntityId;
use crate::ecs::component::{AlwaysActive, Component, ComponentKind, ErasedComponent, Position};
use crate::ecs::composite::InstanceBlend;

/// How many instances of a kind one entity may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    Single,
    /// Instances keyed by instance id (composite organisms)
    Multi,
}

type Validator = Box<dyn Fn(&dyn Any) -> std::result::Result<(), String> + Send + Sync>;
type Factory = Box<dyn Fn() -> Box<dyn ErasedComponent> + Send + Sync>;
type Decoder =
    Box<dyn Fn(&serde_json::Value) -> std::result::Result<Box<dyn ErasedComponent>, String> + Send + Sync>;

struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    version: u32,
    multiplicity: Multiplicity,
    validator: Validator,
    factory: Factory,
    decoder: Decoder,
}

/// Registry of component kinds
pub struct ComponentRegistry {
    kinds: AHashMap<ComponentKind, Registration>,
}

impl ComponentRegistry {
    /// Registry pre-populated with the runtime's built-in kinds
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.install_builtins();
        registry
    }

    /// Registry without built-ins; the store needs `position` for spatial indexing
    pub fn empty() -> Self {
        Self {
            kinds: AHashMap::new(),
        }
    }

    fn install_builtins(&mut self) {
        let builtins = [
            self.register(
                |p: &Position| {
                    if !p.0.is_finite() {
                        Err(format!("non-finite coordinates ({}, {})", p.0.x, p.0.y))
                    } else if p.0.x.abs() > Position::MAX_COORDINATE
                        || p.0.y.abs() > Position::MAX_COORDINATE
                    {
                        Err(format!("coordinates ({}, {}) out of range", p.0.x, p.0.y))
                    } else {
                        Ok(())
                    }
                },
                Position::default,
            ),
            self.register(|_: &AlwaysActive| Ok(()), || AlwaysActive),
            self.register(InstanceBlend::validate, InstanceBlend::default),
        ];
        debug_assert!(builtins.iter().all(|r| r.is_ok()));
    }

    /// Register a single-instance kind
    pub fn register<T: Component>(
        &mut self,
        validator: impl Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Result<()> {
        self.insert::<T>(Multiplicity::Single, validator, factory)
    }

    /// Register a kind an entity may hold several instances of
    pub fn register_multi<T: Component>(
        &mut self,
        validator: impl Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Result<()> {
        self.insert::<T>(Multiplicity::Multi, validator, factory)
    }

    /// Register a single-instance kind that accepts any value and defaults via `Default`
    pub fn register_default<T: Component + Default>(&mut self) -> Result<()> {
        self.insert::<T>(Multiplicity::Single, |_: &T| Ok(()), T::default)
    }

    fn insert<T: Component>(
        &mut self,
        multiplicity: Multiplicity,
        validator: impl Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Result<()> {
        if self.kinds.contains_key(&T::KIND) {
            return Err(SimError::KindAlreadyRegistered(T::KIND));
        }

        let validator: Validator = Box::new(move |value: &dyn Any| match value.downcast_ref::<T>() {
            Some(typed) => validator(typed),
            None => Err(format!("expected {}", std::any::type_name::<T>())),
        });
        let factory: Factory = Box::new(move || Box::new(factory()) as Box<dyn ErasedComponent>);
        let decoder: Decoder = Box::new(|value: &serde_json::Value| {
            let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
            Ok(Box::new(typed) as Box<dyn ErasedComponent>)
        });

        self.kinds.insert(
            T::KIND,
            Registration {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                version: T::VERSION,
                multiplicity,
                validator,
                factory,
                decoder,
            },
        );
        tracing::debug!(kind = %T::KIND, version = T::VERSION, ?multiplicity, "registered component kind");
        Ok(())
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Resolve a kind name (e.g. from a save file) to its registered tag
    pub fn lookup(&self, name: &str) -> Option<ComponentKind> {
        self.kinds.get_key_value(name).map(|(kind, _)| *kind)
    }

    pub fn multiplicity(&self, kind: ComponentKind) -> Option<Multiplicity> {
        self.kinds.get(&kind).map(|r| r.multiplicity)
    }

    pub fn version(&self, kind: ComponentKind) -> Option<u32> {
        self.kinds.get(&kind).map(|r| r.version)
    }

    /// Rust type registered for a kind, for diagnostics
    pub fn type_name(&self, kind: ComponentKind) -> Option<&'static str> {
        self.kinds.get(&kind).map(|r| r.type_name)
    }

    /// All registered kinds in name order
    pub fn kinds(&self) -> Vec<ComponentKind> {
        let mut kinds: Vec<_> = self.kinds.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Validate a self-describing payload: true if it decodes as the kind's
    /// type and passes the kind's validator
    pub fn validate(&self, kind: &str, data: &serde_json::Value) -> bool {
        self.decode(kind, data, None).is_ok()
    }

    /// Decode and validate a payload into a boxed component
    pub fn decode(
        &self,
        kind: &str,
        data: &serde_json::Value,
        entity: Option<EntityId>,
    ) -> Result<Box<dyn ErasedComponent>> {
        let (tag, registration) = self
            .kinds
            .get_key_value(kind)
            .ok_or_else(|| SimError::UnknownComponentKind(kind.to_string()))?;

        let value = (registration.decoder)(data).map_err(|reason| SimError::Validation {
            entity,
            kind: *tag,
            reason,
        })?;
        self.check_erased(value.as_ref(), entity)?;
        Ok(value)
    }

    /// Validate a typed value against its registration
    pub fn check<T: Component>(&self, value: &T, entity: Option<EntityId>) -> Result<()> {
        self.check_erased(value, entity)
    }

    pub(crate) fn check_erased(
        &self,
        value: &dyn ErasedComponent,
        entity: Option<EntityId>,
    ) -> Result<()> {
        let kind = value.kind();
        let registration = self
            .kinds
            .get(&kind)
            .ok_or_else(|| SimError::UnknownComponentKind(kind.to_string()))?;

        if registration.type_id != value.as_any().type_id() {
            return Err(SimError::KindTypeMismatch(kind));
        }

        (registration.validator)(value.as_any()).map_err(|reason| SimError::Validation {
            entity,
            kind,
            reason,
        })
    }

    /// Build the default instance of a kind through its factory
    pub fn default_for(&self, kind: &str) -> Result<Box<dyn ErasedComponent>> {
        self.kinds
            .get(kind)
            .map(|r| (r.factory)())
            .ok_or_else(|| SimError::UnknownComponentKind(kind.to_string()))
    }

    /// Typed variant of [`default_for`](Self::default_for)
    pub fn default_of<T: Component>(&self) -> Result<T> {
        let boxed = self.default_for(T::KIND.name())?;
        boxed
            .into_any()
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| SimError::KindTypeMismatch(T::KIND))
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
