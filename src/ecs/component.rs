//! Component contract, kind tags and type-erased component storage
//!
//! A component is plain data: it carries a kind tag and a schema version and
//! holds no behavior and no reference back to its owning entity. The kind tag
//! plus version plus JSON payload is the self-describing record that loaders
//! validate through the same registry the runtime uses.

use std::any::Any;
use std::borrow::Borrow;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::types::{InstanceId, Vec2};

/// Name tag identifying a component kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ComponentKind(&'static str);

impl ComponentKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// Hash of the newtype equals the hash of the inner str, so map lookups by &str work
impl Borrow<str> for ComponentKind {
    fn borrow(&self) -> &str {
        self.0
    }
}

/// Compile-time contract for a component kind
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Hunger { level: f32 }
///
/// impl Component for Hunger {
///     const KIND: ComponentKind = ComponentKind::new("hunger");
/// }
/// ```
pub trait Component: Any + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync {
    const KIND: ComponentKind;
    const VERSION: u32 = 1;
}

/// Object-safe view over any [`Component`], used by the store, the registry
/// factories and deferred commands.
pub trait ErasedComponent: Any + fmt::Debug + Send + Sync {
    fn kind(&self) -> ComponentKind;
    fn version(&self) -> u32;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
    fn clone_boxed(&self) -> Box<dyn ErasedComponent>;
}

impl<T: Component> ErasedComponent for T {
    fn kind(&self) -> ComponentKind {
        T::KIND
    }

    fn version(&self) -> u32 {
        T::VERSION
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    fn clone_boxed(&self) -> Box<dyn ErasedComponent> {
        Box::new(self.clone())
    }
}

/// One stored component instance
#[derive(Debug)]
pub(crate) struct ComponentSlot {
    pub instance: InstanceId,
    pub scope: Option<String>,
    pub value: Box<dyn ErasedComponent>,
}

impl ComponentSlot {
    pub fn new(value: Box<dyn ErasedComponent>, scope: Option<String>) -> Self {
        Self {
            instance: InstanceId::new(),
            scope,
            value,
        }
    }

    pub fn with_instance(value: Box<dyn ErasedComponent>, scope: Option<String>, instance: InstanceId) -> Self {
        Self {
            instance,
            scope,
            value,
        }
    }

    pub fn downcast<T: Component>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }
}

/// Identity of one instance of a multi-instance kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceInfo<'a> {
    pub id: InstanceId,
    /// Which subsystem or tissue the instance governs, if scoped
    pub scope: Option<&'a str>,
}

// ============================================================================
// Built-in components
// ============================================================================

/// World position; the only kind the spatial index tracks
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position(pub Vec2);

impl Position {
    /// Largest coordinate magnitude the built-in validator accepts
    pub const MAX_COORDINATE: f32 = 1.0e13;

    pub fn new(x: f32, y: f32) -> Self {
        Self(Vec2::new(x, y))
    }
}

impl Component for Position {
    const KIND: ComponentKind = ComponentKind::new("position");
}

/// Marker for entities that are never culled (player agents, quest actors)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AlwaysActive;

impl Component for AlwaysActive {
    const KIND: ComponentKind = ComponentKind::new("always_active");
}
