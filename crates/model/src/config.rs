//! Resolved run configuration
//!
//! [`RunConfig`] is the typed form of a validated argument set. Defaults are
//! applied here (band index 1, synchronous n_workers, empty suffix) so the
//! orchestrator and the output predicates never look at raw JSON again.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::args::ArgumentSet;
use crate::error::{Error, Result};
use crate::range::{RangeFormatError, ThresholdRange};

/// The two supported flow-routing families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingAlgorithm {
    /// Single flow direction, steepest descent
    D8,
    /// Multiple flow direction, Quinn proportional shares
    Mfd,
}

impl RoutingAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingAlgorithm::D8 => "d8",
            RoutingAlgorithm::Mfd => "mfd",
        }
    }
}

impl FromStr for RoutingAlgorithm {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        if text.eq_ignore_ascii_case("d8") {
            Ok(RoutingAlgorithm::D8)
        } else if text.eq_ignore_ascii_case("mfd") {
            Ok(RoutingAlgorithm::Mfd)
        } else {
            Err(Error::InvalidArgument {
                key: "algorithm",
                reason: format!("unknown routing algorithm '{}'", text),
            })
        }
    }
}

impl fmt::Display for RoutingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed configuration for one model run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workspace_dir: PathBuf,
    /// Resolved suffix, already carrying its leading underscore (or empty)
    pub file_suffix: String,
    pub n_workers: i32,
    pub dem_path: PathBuf,
    /// 1-based band of the DEM file to route
    pub band_index: usize,
    pub algorithm: RoutingAlgorithm,
    /// Flow-accumulation thresholds, one batch of outputs per value
    pub thresholds: Vec<u64>,
    pub calculate_slope: bool,
    pub calculate_downslope_distance: bool,
    pub calculate_stream_order: bool,
    pub calculate_subwatersheds: bool,
}

impl RunConfig {
    /// Resolve a validated argument set into typed configuration.
    ///
    /// Assumes validation already passed; a missing required key still
    /// surfaces as an error rather than a panic.
    pub fn from_args(args: &ArgumentSet) -> Result<Self> {
        let workspace_dir = PathBuf::from(require_str(args, "workspace_dir")?);
        let dem_path = PathBuf::from(require_str(args, "dem_path")?);
        let algorithm: RoutingAlgorithm = require_str(args, "algorithm")?.parse()?;

        let range: ThresholdRange = require_str(args, "threshold_flow_accumulation_range")?
            .parse()
            .map_err(|e: RangeFormatError| Error::InvalidArgument {
                key: "threshold_flow_accumulation_range",
                reason: e.to_string(),
            })?;

        // Absent, null, zero and negative all fall back to band 1.
        let band_index = match args.get_int("dem_band_index") {
            Some(band) if band > 0 => band as usize,
            _ => 1,
        };

        let n_workers = args
            .get_int("n_workers")
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(-1);

        Ok(Self {
            workspace_dir,
            file_suffix: file_suffix(args.get_str("results_suffix").unwrap_or("")),
            n_workers,
            dem_path,
            band_index,
            algorithm,
            thresholds: range.values().collect(),
            calculate_slope: args.get_bool("calculate_slope"),
            calculate_downslope_distance: args.get_bool("calculate_downslope_distance"),
            calculate_stream_order: args.get_bool("calculate_stream_order"),
            calculate_subwatersheds: args.get_bool("calculate_subwatersheds"),
        })
    }
}

fn require_str<'a>(args: &'a ArgumentSet, key: &'static str) -> Result<&'a str> {
    args.get_str(key)
        .filter(|text| !text.trim().is_empty())
        .ok_or(Error::MissingArgument(key))
}

/// Resolve the results suffix: non-empty values get one leading underscore.
pub(crate) fn file_suffix(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('_') {
        trimmed.to_string()
    } else {
        format!("_{}", trimmed)
    }
}
