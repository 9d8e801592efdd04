//! Execution orchestrator
//!
//! Turns a validated argument set into a dependency graph of routing tasks
//! and runs it to completion. Tasks communicate exclusively through files in
//! the workspace: each closure reads the rasters it needs, computes, and
//! writes its outputs to paths taken from the [`FileRegistry`]. The graph
//! guarantees a producer finishes before any consumer starts.

use std::fs;
use std::path::Path;

use tracing::info;

use routedem_core::io::{read_geotiff, write_geotiff, write_gpkg, GpkgGeometry};
use routedem_core::Raster;
use routedem_routing::hydrology::{
    calculate_subwatershed_boundary, downslope_distance_d8, downslope_distance_mfd,
    extract_strahler_streams_d8, extract_streams_d8, extract_streams_mfd, fill_pits,
    flow_accumulation_d8, flow_accumulation_mfd, flow_direction_d8, flow_direction_mfd,
    strahler_segments, FillPitsParams, MfdParams, StrahlerParams, SubwatershedParams,
    STRAHLER_FIELDS, SUBWATERSHED_FIELDS,
};
use routedem_routing::terrain::{slope, SlopeParams, SlopeUnits};
use routedem_taskgraph::{TaskGraph, TaskId};

use crate::args::ArgumentSet;
use crate::config::{RoutingAlgorithm, RunConfig};
use crate::error::{Error, Result};
use crate::registry::{FileKey, FileRegistry};
use crate::spec::MODEL_SPEC;
use crate::validation::{format_warnings, validate};

/// Strahler order at which a watercourse keeps its own river id
const RIVER_ORDER: u32 = 5;

/// Validate, schedule and run the full model.
///
/// Returns the registry of output files actually created. The run fails on
/// the first task error; files written by already-finished tasks remain in
/// the workspace.
pub fn execute(args: &ArgumentSet) -> Result<FileRegistry> {
    let warnings = validate(args);
    if !warnings.is_empty() {
        return Err(Error::Validation(format_warnings(&warnings)));
    }

    let config = RunConfig::from_args(args)?;
    fs::create_dir_all(&config.workspace_dir)?;

    let registry = FileRegistry::build(&MODEL_SPEC, &config);
    let mut graph = TaskGraph::new(config.n_workers);

    info!("Using DEM band index {}", config.band_index);

    if config.calculate_slope {
        let dem_path = config.dem_path.clone();
        let band = config.band_index;
        let out = registry.path(FileKey::global("slope"))?;
        graph.add_task("calculate_slope", &[], move || {
            let dem: Raster<f64> = read_geotiff(&dem_path, Some(band))?;
            let params = SlopeParams {
                units: SlopeUnits::Percent,
                z_factor: 1.0,
            };
            let percent = slope(&dem, params)?;
            write_geotiff(&percent, &out)?;
            Ok(())
        })?;
    }

    let fill_task = {
        let dem_path = config.dem_path.clone();
        let band = config.band_index;
        let out = registry.path(FileKey::global("filled"))?;
        graph.add_task("fill_pits", &[], move || {
            let dem: Raster<f64> = read_geotiff(&dem_path, Some(band))?;
            let filled = fill_pits(&dem, FillPitsParams::default())?;
            write_geotiff(&filled, &out)?;
            Ok(())
        })?
    };

    info!("calculating flow direction");
    let flow_dir_task = {
        let filled_path = registry.path(FileKey::global("filled"))?;
        let out = registry.path(FileKey::global("flow_direction"))?;
        let algorithm = config.algorithm;
        graph.add_task(
            format!("flow_dir_{}", algorithm),
            &[fill_task],
            move || {
                let filled: Raster<f64> = read_geotiff(&filled_path, None)?;
                match algorithm {
                    RoutingAlgorithm::D8 => {
                        let directions = flow_direction_d8(&filled)?;
                        write_geotiff(&directions, &out)?;
                    }
                    RoutingAlgorithm::Mfd => {
                        let directions = flow_direction_mfd(&filled, MfdParams::default())?;
                        write_geotiff(&directions, &out)?;
                    }
                }
                Ok(())
            },
        )?
    };

    info!("calculating flow accumulation");
    let flow_accum_task = {
        let dir_path = registry.path(FileKey::global("flow_direction"))?;
        let out = registry.path(FileKey::global("flow_accumulation"))?;
        let algorithm = config.algorithm;
        graph.add_task(
            format!("flow_accumulation_{}", algorithm),
            &[flow_dir_task],
            move || {
                let accumulation = match algorithm {
                    RoutingAlgorithm::D8 => {
                        let directions: Raster<u8> = read_geotiff(&dir_path, None)?;
                        flow_accumulation_d8(&directions)?
                    }
                    RoutingAlgorithm::Mfd => {
                        let directions: Raster<i32> = read_geotiff(&dir_path, None)?;
                        flow_accumulation_mfd(&directions)?
                    }
                };
                write_geotiff(&accumulation, &out)?;
                Ok(())
            },
        )?
    };

    info!("flow threshold values: {:?}", config.thresholds);
    for &tfa in &config.thresholds {
        let stream_task = {
            let accum_path = registry.path(FileKey::global("flow_accumulation"))?;
            let dir_path = registry.path(FileKey::global("flow_direction"))?;
            let out = registry.path(FileKey::tfa("stream_mask", tfa))?;
            let algorithm = config.algorithm;
            let dependencies: Vec<TaskId> = match algorithm {
                RoutingAlgorithm::D8 => vec![flow_accum_task],
                RoutingAlgorithm::Mfd => vec![flow_accum_task, flow_dir_task],
            };
            graph.add_task(
                format!("extract_streams_tfa_{}", tfa),
                &dependencies,
                move || {
                    let accumulation: Raster<f64> = read_geotiff(&accum_path, None)?;
                    let mask = match algorithm {
                        RoutingAlgorithm::D8 => extract_streams_d8(&accumulation, tfa as f64)?,
                        RoutingAlgorithm::Mfd => {
                            let directions: Raster<i32> = read_geotiff(&dir_path, None)?;
                            extract_streams_mfd(&accumulation, &directions, tfa as f64)?
                        }
                    };
                    write_geotiff(&mask, &out)?;
                    Ok(())
                },
            )?
        };

        if config.calculate_downslope_distance {
            let dir_path = registry.path(FileKey::global("flow_direction"))?;
            let mask_path = registry.path(FileKey::tfa("stream_mask", tfa))?;
            let out = registry.path(FileKey::tfa("downslope_distance", tfa))?;
            let algorithm = config.algorithm;
            graph.add_task(
                format!("downslope_distance_tfa_{}", tfa),
                &[flow_dir_task, stream_task],
                move || {
                    let mask: Raster<u8> = read_geotiff(&mask_path, None)?;
                    let distance = match algorithm {
                        RoutingAlgorithm::D8 => {
                            let directions: Raster<u8> = read_geotiff(&dir_path, None)?;
                            downslope_distance_d8(&directions, &mask)?
                        }
                        RoutingAlgorithm::Mfd => {
                            let directions: Raster<i32> = read_geotiff(&dir_path, None)?;
                            downslope_distance_mfd(&directions, &mask)?
                        }
                    };
                    write_geotiff(&distance, &out)?;
                    Ok(())
                },
            )?;
        }

        // Stream ordering is defined for single-direction routing only.
        if config.algorithm == RoutingAlgorithm::D8 && config.calculate_stream_order {
            let strahler_task = {
                let dir_path = registry.path(FileKey::global("flow_direction"))?;
                let accum_path = registry.path(FileKey::global("flow_accumulation"))?;
                let filled_path = registry.path(FileKey::global("filled"))?;
                let out = registry.path(FileKey::tfa("strahler_stream_order", tfa))?;
                graph.add_task(
                    format!("strahler_stream_order_tfa_{}", tfa),
                    &[fill_task, flow_dir_task, flow_accum_task],
                    move || {
                        let directions: Raster<u8> = read_geotiff(&dir_path, None)?;
                        let accumulation: Raster<f64> = read_geotiff(&accum_path, None)?;
                        let filled: Raster<f64> = read_geotiff(&filled_path, None)?;
                        let params = StrahlerParams {
                            threshold: tfa as f64,
                            river_order: RIVER_ORDER,
                        };
                        let streams =
                            extract_strahler_streams_d8(&directions, &accumulation, &filled, &params)?;
                        write_gpkg(
                            &streams,
                            &out,
                            &layer_name(&out),
                            GpkgGeometry::LineString,
                            &STRAHLER_FIELDS,
                            filled.crs(),
                        )?;
                        Ok(())
                    },
                )?
            };

            if config.calculate_subwatersheds {
                let dir_path = registry.path(FileKey::global("flow_direction"))?;
                let accum_path = registry.path(FileKey::global("flow_accumulation"))?;
                let filled_path = registry.path(FileKey::global("filled"))?;
                let out = registry.path(FileKey::tfa("subwatersheds", tfa))?;
                graph.add_task(
                    format!("subwatersheds_tfa_{}", tfa),
                    &[flow_dir_task, strahler_task],
                    move || {
                        let directions: Raster<u8> = read_geotiff(&dir_path, None)?;
                        let accumulation: Raster<f64> = read_geotiff(&accum_path, None)?;
                        let filled: Raster<f64> = read_geotiff(&filled_path, None)?;
                        let params = StrahlerParams {
                            threshold: tfa as f64,
                            river_order: RIVER_ORDER,
                        };
                        let segments =
                            strahler_segments(&directions, &accumulation, &filled, &params)?;
                        let basins = calculate_subwatershed_boundary(
                            &directions,
                            &segments,
                            &SubwatershedParams::default(),
                        )?;
                        write_gpkg(
                            &basins,
                            &out,
                            &layer_name(&out),
                            GpkgGeometry::Polygon,
                            &SUBWATERSHED_FIELDS,
                            directions.crs(),
                        )?;
                        Ok(())
                    },
                )?;
            }
        }
    }

    graph.close();
    graph.join()?;

    Ok(registry)
}

/// Layer named after the file stem, suffix and threshold included
fn layer_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("layer")
        .to_string()
}

/// Convenience wrapper building the argument set from a JSON value
pub fn execute_json(value: serde_json::Value) -> Result<FileRegistry> {
    let args = ArgumentSet::from_json(value)?;
    execute(&args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_name_from_path() {
        assert_eq!(
            layer_name(Path::new("/tmp/w/strahler_stream_order_tfa_2_foo.gpkg")),
            "strahler_stream_order_tfa_2_foo"
        );
        assert_eq!(layer_name(Path::new("subwatersheds_tfa_4.gpkg")), "subwatersheds_tfa_4");
    }

    #[test]
    fn test_execute_rejects_invalid_args() {
        let args = ArgumentSet::new();
        match execute(&args) {
            Err(Error::Validation(message)) => {
                assert!(message.contains("dem_path"));
                assert!(message.contains("Key is missing from the arguments"));
            }
            other => panic!(
                "expected validation failure, got {:?}",
                other.map(|r| r.len())
            ),
        }
    }
}
