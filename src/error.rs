//! Error hierarchy for the coupling runtime
//!
//! The numeric kernels themselves never fail; everything here is raised at
//! the boundary where configuration, registry and submodels meet.

use thiserror::Error;

/// Root error type for coupled simulation failures.
#[derive(Error, Debug)]
pub enum CouplingError {
    /// Configuration is structurally valid YAML but semantically wrong.
    #[error("config error: {0}")]
    Config(String),

    /// Failed to parse the model description.
    #[error("failed to parse model YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Reading the model description or writing results failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serializing simulation results failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A component names an implementation nobody registered.
    #[error("component '{component}' uses unknown implementation '{implementation}'")]
    UnknownImplementation {
        component: String,
        implementation: String,
    },

    /// Components and conduits do not form a macro/micro pair.
    #[error("topology error: {0}")]
    Topology(String),

    /// A state or parameter handed across the boundary is unusable.
    #[error("validation error: {0}")]
    Validation(String),

    /// Micro model returned a state of a different length.
    #[error("micro model '{component}' returned {got} samples, expected {expected}")]
    ShapeMismatch {
        component: String,
        expected: usize,
        got: usize,
    },
}

pub type CouplingResult<T> = Result<T, CouplingError>;
