//! Static model specification
//!
//! One declarative table of every input and output the model knows about.
//! The validator walks the inputs; the file registry walks the outputs.
//! Conditional behavior lives in plain predicate functions over typed data,
//! so nothing downstream interprets strings.

use routedem_core::FieldSpec;
use routedem_routing::hydrology::{STRAHLER_FIELDS, SUBWATERSHED_FIELDS};

use crate::args::ArgumentSet;
use crate::config::{RoutingAlgorithm, RunConfig};

/// Pattern a threshold range string must match before parsing
pub const RANGE_PATTERN: &str = "^[0-9]+:[0-9]+:[1-9][0-9]*$";

/// Placeholder substituted with the threshold value in per-threshold templates
pub const THRESHOLD_PLACEHOLDER: &str = "{tfa}";

/// Type constraint on one input value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Boolean,
    /// Path to a directory; it does not have to exist yet
    Directory,
    FreeText,
    Integer { minimum: i64 },
    OptionSet { options: &'static [&'static str] },
    /// String constrained by a regular expression
    Pattern { regexp: &'static str },
    /// Path to an existing, readable raster file
    RasterFile,
}

/// One model input
#[derive(Debug, Clone, Copy)]
pub struct InputSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub required: bool,
    pub kind: InputKind,
    /// When present and false for the current arguments, the input does not
    /// apply to this run and its checks are skipped
    pub allowed: Option<fn(&ArgumentSet) -> bool>,
}

/// One model output file
#[derive(Debug, Clone, Copy)]
pub struct OutputSpec {
    pub id: &'static str,
    /// File name template; per-threshold templates embed [`THRESHOLD_PLACEHOLDER`]
    pub template: &'static str,
    pub per_threshold: bool,
    /// The output is materialized exactly when this holds for the run
    pub created_if: fn(&RunConfig) -> bool,
    /// Attribute schema for vector outputs; empty for rasters
    pub fields: &'static [FieldSpec],
}

/// The full declarative model description
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub model_id: &'static str,
    pub model_title: &'static str,
    pub inputs: &'static [InputSpec],
    pub outputs: &'static [OutputSpec],
}

impl ModelSpec {
    pub fn get_input(&self, id: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|input| input.id == id)
    }

    pub fn get_output(&self, id: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|output| output.id == id)
    }
}

fn algorithm_is_d8(args: &ArgumentSet) -> bool {
    args.get_str("algorithm")
        .map(|text| text.eq_ignore_ascii_case("d8"))
        .unwrap_or(false)
}

fn always(_: &RunConfig) -> bool {
    true
}

fn slope_requested(config: &RunConfig) -> bool {
    config.calculate_slope
}

fn downslope_requested(config: &RunConfig) -> bool {
    config.calculate_downslope_distance
}

fn stream_order_created(config: &RunConfig) -> bool {
    config.algorithm == RoutingAlgorithm::D8 && config.calculate_stream_order
}

fn subwatersheds_created(config: &RunConfig) -> bool {
    stream_order_created(config) && config.calculate_subwatersheds
}

pub static MODEL_SPEC: ModelSpec = ModelSpec {
    model_id: "routedem_tfa_range",
    model_title: "RouteDEM Flow Threshold Range",
    inputs: &[
        InputSpec {
            id: "workspace_dir",
            name: "workspace",
            required: true,
            kind: InputKind::Directory,
            allowed: None,
        },
        InputSpec {
            id: "results_suffix",
            name: "file suffix",
            required: false,
            kind: InputKind::FreeText,
            allowed: None,
        },
        InputSpec {
            id: "n_workers",
            name: "taskgraph n_workers parameter",
            required: false,
            kind: InputKind::Integer { minimum: -1 },
            allowed: None,
        },
        InputSpec {
            id: "dem_path",
            name: "digital elevation model",
            required: true,
            kind: InputKind::RasterFile,
            allowed: None,
        },
        InputSpec {
            id: "dem_band_index",
            name: "band index",
            required: false,
            kind: InputKind::Integer { minimum: 1 },
            allowed: None,
        },
        InputSpec {
            id: "algorithm",
            name: "routing algorithm",
            required: true,
            kind: InputKind::OptionSet {
                options: &["d8", "mfd"],
            },
            allowed: None,
        },
        InputSpec {
            id: "threshold_flow_accumulation_range",
            name: "threshold flow accumulation range",
            required: true,
            kind: InputKind::Pattern {
                regexp: RANGE_PATTERN,
            },
            allowed: None,
        },
        InputSpec {
            id: "calculate_downslope_distance",
            name: "calculate distance to stream",
            required: false,
            kind: InputKind::Boolean,
            allowed: None,
        },
        InputSpec {
            id: "calculate_slope",
            name: "calculate slope",
            required: false,
            kind: InputKind::Boolean,
            allowed: None,
        },
        InputSpec {
            id: "calculate_stream_order",
            name: "calculate strahler stream orders",
            required: false,
            kind: InputKind::Boolean,
            allowed: Some(algorithm_is_d8),
        },
        InputSpec {
            id: "calculate_subwatersheds",
            name: "delineate subwatersheds",
            required: false,
            kind: InputKind::Boolean,
            allowed: None,
        },
    ],
    outputs: &[
        OutputSpec {
            id: "filled",
            template: "filled.tif",
            per_threshold: false,
            created_if: always,
            fields: &[],
        },
        OutputSpec {
            id: "flow_direction",
            template: "flow_direction.tif",
            per_threshold: false,
            created_if: always,
            fields: &[],
        },
        OutputSpec {
            id: "flow_accumulation",
            template: "flow_accumulation.tif",
            per_threshold: false,
            created_if: always,
            fields: &[],
        },
        OutputSpec {
            id: "slope",
            template: "slope.tif",
            per_threshold: false,
            created_if: slope_requested,
            fields: &[],
        },
        OutputSpec {
            id: "stream_mask",
            template: "stream_mask_tfa_{tfa}.tif",
            per_threshold: true,
            created_if: always,
            fields: &[],
        },
        OutputSpec {
            id: "downslope_distance",
            template: "downslope_distance_tfa_{tfa}.tif",
            per_threshold: true,
            created_if: downslope_requested,
            fields: &[],
        },
        OutputSpec {
            id: "strahler_stream_order",
            template: "strahler_stream_order_tfa_{tfa}.gpkg",
            per_threshold: true,
            created_if: stream_order_created,
            fields: &STRAHLER_FIELDS,
        },
        OutputSpec {
            id: "subwatersheds",
            template: "subwatersheds_tfa_{tfa}.gpkg",
            per_threshold: true,
            created_if: subwatersheds_created,
            fields: &SUBWATERSHED_FIELDS,
        },
    ],
};
