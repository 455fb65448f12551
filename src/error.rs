use std::fmt;

use thiserror::Error;

use crate::scene::{LightId, LightType};

/// What kind of named resource a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Shader,
    UniformBlock,
    StorageBlock,
    Mesh,
    ShadowMap,
    Scene,
    UniformField,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Shader => "shader",
            ResourceKind::UniformBlock => "uniform block",
            ResourceKind::StorageBlock => "storage block",
            ResourceKind::Mesh => "mesh",
            ResourceKind::ShadowMap => "shadow map",
            ResourceKind::Scene => "scene",
            ResourceKind::UniformField => "uniform field",
        };
        f.write_str(name)
    }
}

/// Hard failures of the frame pipeline.
///
/// None of these are retried: a frame that hits one is abandoned and the error
/// unwinds to the driver, which reports it and shuts down.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{kind} `{name}` not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("shadow map for light {light:?} was created for a {cached:?} light, got {found:?}")]
    LightTypeMismatch {
        light: LightId,
        cached: LightType,
        found: LightType,
    },

    #[error("unrecognized uniform field type `{0}`")]
    UnknownFieldType(String),

    #[error("uniform field `{field}` expects {expected}, got {found}")]
    FieldTypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("no free binding points left (limit {0})")]
    BindingPointsExhausted(u32),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("failed to import `{path}`: {message}")]
    Import { path: String, message: String },
}

impl RenderError {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        RenderError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        RenderError::Precondition(message.into())
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
