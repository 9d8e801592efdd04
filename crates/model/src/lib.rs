//! # RouteDEM Model
//!
//! Orchestration layer for threshold-range routing runs: a declarative
//! model specification, argument validation, and a task-graph executor
//! that sweeps the routing primitives across a range of flow-accumulation
//! thresholds.
//!
//! The flow is: callers build an [`ArgumentSet`], [`validate`] it (or let
//! [`execute`] do so), and receive a [`FileRegistry`] mapping each output
//! identifier to the file the run produced.
//!
//! ```no_run
//! use routedem_model::{execute, ArgumentSet};
//! use serde_json::json;
//!
//! let args = ArgumentSet::from_json(json!({
//!     "workspace_dir": "/data/run",
//!     "dem_path": "/data/dem.tif",
//!     "algorithm": "d8",
//!     "threshold_flow_accumulation_range": "100:1000:100",
//!     "calculate_slope": true,
//! }))?;
//! let registry = execute(&args)?;
//! for (key, path) in registry.iter() {
//!     println!("{} -> {}", key, path.display());
//! }
//! # Ok::<(), routedem_model::Error>(())
//! ```

pub mod args;
pub mod config;
pub mod error;
pub mod range;
pub mod registry;
pub mod spec;
pub mod tasks;
pub mod validation;

pub use args::ArgumentSet;
pub use config::{RoutingAlgorithm, RunConfig};
pub use error::{Error, Result};
pub use range::{RangeFormatError, ThresholdRange};
pub use registry::{FileKey, FileRegistry};
pub use spec::{InputKind, InputSpec, ModelSpec, OutputSpec, MODEL_SPEC, RANGE_PATTERN};
pub use tasks::{execute, execute_json};
pub use validation::{
    format_warnings, invalid_keys, validate, ValidationWarning, INVALID_RANGE_MSG,
};
