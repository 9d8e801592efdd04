//! Error types for model validation and execution

use thiserror::Error;

use crate::registry::FileKey;

/// Errors surfaced by the model layer
#[derive(Debug, Error)]
pub enum Error {
    /// The argument set failed validation; the message lists every warning
    #[error("Arguments are invalid:\n{0}")]
    Validation(String),

    /// Arguments were handed over as something other than a JSON object
    #[error("Arguments must be a JSON object")]
    ArgumentsNotAnObject,

    /// A required argument is absent or empty past the validation boundary
    #[error("Missing required argument '{0}'")]
    MissingArgument(&'static str),

    /// An argument is present but unusable
    #[error("Invalid value for '{key}': {reason}")]
    InvalidArgument { key: &'static str, reason: String },

    /// The orchestrator asked for a path the registry never built
    #[error("No registry entry for output '{0}'")]
    MissingRegistryEntry(FileKey),

    /// Raster or vector I/O failure
    #[error("Core error: {0}")]
    Core(#[from] routedem_core::Error),

    /// Task scheduling or execution failure
    #[error("Task error: {0}")]
    TaskGraph(#[from] routedem_taskgraph::Error),

    /// Filesystem failure outside raster I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
