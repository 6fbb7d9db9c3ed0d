use thiserror::Error;

use crate::core::types::{EntityId, InstanceId, SystemId};
use crate::ecs::component::ComponentKind;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("{entity} is missing required component `{kind}`")]
    MissingComponent { entity: EntityId, kind: ComponentKind },

    #[error("{entity} already has component `{kind}`")]
    DuplicateComponent { entity: EntityId, kind: ComponentKind },

    #[error("component `{kind}` rejected{}: {reason}", .entity.map(|e| format!(" for {}", e)).unwrap_or_default())]
    Validation {
        entity: Option<EntityId>,
        kind: ComponentKind,
        reason: String,
    },

    #[error("unknown component kind `{0}`")]
    UnknownComponentKind(String),

    #[error("component kind `{0}` is already registered")]
    KindAlreadyRegistered(ComponentKind),

    #[error("component kind `{0}` is registered for a different Rust type")]
    KindTypeMismatch(ComponentKind),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("{entity} has no instance {instance} of `{kind}`")]
    InstanceNotFound {
        entity: EntityId,
        kind: ComponentKind,
        instance: InstanceId,
    },

    #[error("component kind `{0}` does not allow multiple instances")]
    NotMultiInstance(ComponentKind),

    #[error("system `{0}` is already registered")]
    DuplicateSystem(SystemId),

    #[error("system `{0}` is not registered")]
    UnknownSystem(SystemId),

    #[error("event kind `{0}` is not declared for immediate delivery")]
    ImmediateNotAllowed(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("system `{system}` failed: {source}")]
    System {
        system: SystemId,
        #[source]
        source: Box<SimError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl SimError {
    /// Errors that must block simulation start rather than be skipped per entity
    pub fn is_configuration(&self) -> bool {
        match self {
            SimError::KindAlreadyRegistered(_)
            | SimError::KindTypeMismatch(_)
            | SimError::UnknownComponentKind(_)
            | SimError::DuplicateSystem(_)
            | SimError::Config(_)
            | SimError::TomlError(_) => true,
            SimError::System { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// Entity the failure is about, if any
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            SimError::MissingComponent { entity, .. }
            | SimError::DuplicateComponent { entity, .. }
            | SimError::InstanceNotFound { entity, .. } => Some(*entity),
            SimError::Validation { entity, .. } => *entity,
            SimError::EntityNotFound(entity) => Some(*entity),
            SimError::System { source, .. } => source.entity(),
            _ => None,
        }
    }

    /// Component kind the failure is about, if any
    pub fn kind(&self) -> Option<ComponentKind> {
        match self {
            SimError::MissingComponent { kind, .. }
            | SimError::DuplicateComponent { kind, .. }
            | SimError::Validation { kind, .. }
            | SimError::InstanceNotFound { kind, .. } => Some(*kind),
            SimError::KindAlreadyRegistered(kind)
            | SimError::KindTypeMismatch(kind)
            | SimError::NotMultiInstance(kind) => Some(*kind),
            SimError::System { source, .. } => source.kind(),
            _ => None,
        }
    }

    /// Attach the name of the system that raised this error
    pub fn in_system(self, system: SystemId) -> SimError {
        match self {
            already @ SimError::System { .. } => already,
            other => SimError::System {
                system,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
