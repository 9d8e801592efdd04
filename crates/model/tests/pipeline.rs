//! End-to-end runs of the threshold-range model over a synthetic valley DEM.
//!
//! The fixture is a two-band GeoTIFF on a 2 m grid: band 1 is a flat surface
//! of ones, band 2 a valley draining north along column 4 whose floor hides
//! a two-cell pit behind the 1.3 outlet row. Every test drives the model the
//! way a caller would, through `execute` with JSON arguments, then inspects
//! the workspace it produced.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

use routedem_core::io::{read_geotiff, write_geotiff_bands};
use routedem_core::raster::{GeoTransform, Raster};
use routedem_model::validation::{
    invalid_keys, validate, INVALID_RANGE_MSG, NOT_A_RASTER_MSG,
};
use routedem_model::{execute, ArgumentSet, FileKey};
use routedem_routing::hydrology::{strahler_segments, StrahlerParams, STRAHLER_FIELDS};

/// Ten rows by nine columns, two bands. Band 2 rises away from the valley
/// floor in every row and gains 0.1 of lift per row southward, so water runs
/// north; cells (1,4) and (2,4) sit below the 1.3 pour level and must fill.
fn make_dem(path: &Path) {
    let transform = GeoTransform::new(2.0, -2.0, 2.0, -2.0);

    let mut ones = Raster::filled(10, 9, 1.0_f64);
    ones.set_transform(transform);
    ones.set_nodata(Some(-1.0));

    let mut data = vec![5.0, 4.0, 3.0, 2.0, 1.3, 1.3, 3.0, 4.0, 5.0];
    for row in 1..10 {
        let lift = 1.0 + 0.1 * row as f64;
        for base in [4.0, 3.0, 2.0, 1.0, 0.0, 1.0, 2.0, 3.0, 4.0] {
            data.push(base + lift);
        }
    }
    let mut valley = Raster::from_vec(data, 10, 9).expect("fixture dimensions are consistent");
    valley.set_transform(transform);
    valley.set_nodata(Some(-1.0));

    write_geotiff_bands(&[&ones, &valley], path).expect("failed to write the fixture DEM");
}

/// Arguments for a full run: band 2, suffix `foo`, all optional outputs on.
fn full_args(workspace: &Path, dem: &Path, algorithm: &str) -> ArgumentSet {
    ArgumentSet::from_json(json!({
        "workspace_dir": workspace.to_string_lossy(),
        "dem_path": dem.to_string_lossy(),
        "dem_band_index": 2,
        "results_suffix": "foo",
        "algorithm": algorithm,
        "threshold_flow_accumulation_range": "2:5:2",
        "calculate_slope": true,
        "calculate_downslope_distance": true,
        "calculate_stream_order": true,
        "calculate_subwatersheds": true,
    }))
    .expect("arguments are a JSON object")
}

fn workspace_files(dir: &Path) -> BTreeSet<String> {
    fs::read_dir(dir)
        .expect("workspace directory exists")
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn test_d8_run_produces_expected_files() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);
    let workspace = dir.path().join("workspace");

    let registry = execute(&full_args(&workspace, &dem, "d8")).expect("d8 run failed");

    let expected: BTreeSet<String> = [
        "downslope_distance_tfa_2_foo.tif",
        "downslope_distance_tfa_4_foo.tif",
        "filled_foo.tif",
        "flow_accumulation_foo.tif",
        "flow_direction_foo.tif",
        "slope_foo.tif",
        "strahler_stream_order_tfa_2_foo.gpkg",
        "strahler_stream_order_tfa_4_foo.gpkg",
        "stream_mask_tfa_2_foo.tif",
        "stream_mask_tfa_4_foo.tif",
        "subwatersheds_tfa_2_foo.gpkg",
        "subwatersheds_tfa_4_foo.gpkg",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect();

    assert_eq!(registry.len(), expected.len());
    for (key, path) in registry.iter() {
        assert!(path.exists(), "output {} missing at {}", key, path.display());
    }
    assert_eq!(
        workspace_files(&workspace),
        expected,
        "workspace must hold exactly the declared outputs"
    );
}

#[test]
fn test_mfd_run_skips_vector_and_slope_outputs() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);
    let workspace = dir.path().join("workspace");

    let mut args = full_args(&workspace, &dem, "mfd");
    args.set("calculate_slope", json!(false));

    let registry = execute(&args).expect("mfd run failed");

    // Stream order and subwatersheds were requested but are D8-only, and
    // slope was declined, so only the raster chain remains.
    let expected: BTreeSet<String> = [
        "downslope_distance_tfa_2_foo.tif",
        "downslope_distance_tfa_4_foo.tif",
        "filled_foo.tif",
        "flow_accumulation_foo.tif",
        "flow_direction_foo.tif",
        "stream_mask_tfa_2_foo.tif",
        "stream_mask_tfa_4_foo.tif",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect();

    assert_eq!(workspace_files(&workspace), expected);
    assert_eq!(registry.len(), expected.len());
    assert!(registry.get(FileKey::global("slope")).is_none());
    assert!(registry.get(FileKey::tfa("strahler_stream_order", 2)).is_none());
    assert!(registry.get(FileKey::tfa("subwatersheds", 2)).is_none());
}

#[test]
fn test_band_index_defaults_to_first() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);
    let workspace = dir.path().join("workspace");

    // No dem_band_index: band 1 is flat ones, so filling changes nothing.
    let args = ArgumentSet::from_json(json!({
        "workspace_dir": workspace.to_string_lossy(),
        "dem_path": dem.to_string_lossy(),
        "results_suffix": "foo",
        "algorithm": "d8",
        "threshold_flow_accumulation_range": "2:4:1",
    }))
    .unwrap();

    let registry = execute(&args).expect("default-band run failed");

    let filled_path = registry.path(FileKey::global("filled")).unwrap();
    let filled: Raster<f64> = read_geotiff(&filled_path, None).unwrap();
    assert_eq!(filled.shape(), (10, 9));
    for value in filled.data().iter() {
        assert_eq!(*value, 1.0, "flat band 1 must survive filling unchanged");
    }
}

#[test]
fn test_pit_cells_raised_to_pour_level() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);
    let workspace = dir.path().join("workspace");

    let args = ArgumentSet::from_json(json!({
        "workspace_dir": workspace.to_string_lossy(),
        "dem_path": dem.to_string_lossy(),
        "dem_band_index": 2,
        "results_suffix": "foo",
        "algorithm": "d8",
        "threshold_flow_accumulation_range": "2:4:1",
    }))
    .unwrap();

    let registry = execute(&args).expect("pit-filling run failed");

    let source: Raster<f64> = read_geotiff(&dem, Some(2)).unwrap();
    let filled_path = registry.path(FileKey::global("filled")).unwrap();
    let filled: Raster<f64> = read_geotiff(&filled_path, None).unwrap();

    let pour = source.get(0, 4).unwrap();
    assert!(
        source.get(1, 4).unwrap() < pour && source.get(2, 4).unwrap() < pour,
        "fixture must contain a pit below the outlet"
    );

    for row in 0..10 {
        for col in 0..9 {
            let original = source.get(row, col).unwrap();
            let want = if original < pour { pour } else { original };
            assert_relative_eq!(filled.get(row, col).unwrap(), want, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_slope_matches_horn_finite_differences() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);
    let workspace = dir.path().join("workspace");

    let args = ArgumentSet::from_json(json!({
        "workspace_dir": workspace.to_string_lossy(),
        "dem_path": dem.to_string_lossy(),
        "dem_band_index": 2,
        "algorithm": "d8",
        "threshold_flow_accumulation_range": "2:4:1",
        "calculate_slope": true,
    }))
    .unwrap();

    let registry = execute(&args).expect("slope run failed");

    let slope_path = registry.path(FileKey::global("slope")).unwrap();
    let slope: Raster<f64> = read_geotiff(&slope_path, None).unwrap();

    // Valley wall at (5,2): dz/dx = -0.5 and dz/dy = 0.05 on the 2 m grid,
    // so percent slope is sqrt(0.2525) * 100. The east wall mirrors it.
    let expected = (0.25_f64 + 0.0025).sqrt() * 100.0;
    assert_relative_eq!(slope.get(5, 2).unwrap(), expected, epsilon = 1e-3);
    assert_relative_eq!(slope.get(5, 6).unwrap(), expected, epsilon = 1e-3);

    assert!(
        slope.get(0, 0).unwrap().is_nan(),
        "border cells have no 3x3 window"
    );
    assert!(
        slope.get(9, 8).unwrap().is_nan(),
        "border cells have no 3x3 window"
    );
}

#[test]
fn test_stream_mask_and_downslope_distance_agree() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);
    let workspace = dir.path().join("workspace");

    let args = ArgumentSet::from_json(json!({
        "workspace_dir": workspace.to_string_lossy(),
        "dem_path": dem.to_string_lossy(),
        "dem_band_index": 2,
        "algorithm": "d8",
        "threshold_flow_accumulation_range": "2:3:1",
        "calculate_downslope_distance": true,
    }))
    .unwrap();

    let registry = execute(&args).expect("downslope run failed");

    let mask_path = registry.path(FileKey::tfa("stream_mask", 2)).unwrap();
    let mask: Raster<u8> = read_geotiff(&mask_path, None).unwrap();
    let distance_path = registry.path(FileKey::tfa("downslope_distance", 2)).unwrap();
    let distance: Raster<f64> = read_geotiff(&distance_path, None).unwrap();

    let mut stream_cells = 0;
    for row in 0..mask.rows() {
        for col in 0..mask.cols() {
            let flag = mask.get(row, col).unwrap();
            assert!(flag <= 1, "stream mask holds only zeros and ones");
            if flag == 1 {
                stream_cells += 1;
                assert_eq!(
                    distance.get(row, col).unwrap(),
                    0.0,
                    "stream cells sit at distance zero"
                );
            }
        }
    }
    assert!(stream_cells > 0, "threshold 2 must flag some stream cells");
    assert!(
        distance.data().iter().any(|d| *d > 0.0),
        "hillslope cells record a positive walk"
    );
}

#[test]
fn test_validate_flags_unreadable_raster() {
    let dir = TempDir::new().unwrap();
    let fake = dir.path().join("not_a_raster.tif");
    fs::write(&fake, "plain text, not a GeoTIFF").unwrap();

    let args = ArgumentSet::from_json(json!({
        "workspace_dir": dir.path().to_string_lossy(),
        "dem_path": fake.to_string_lossy(),
        "algorithm": "d8",
        "threshold_flow_accumulation_range": "2:5:2",
    }))
    .unwrap();

    let warnings = validate(&args);
    let invalid = invalid_keys(&warnings);
    assert_eq!(invalid.into_iter().collect::<Vec<_>>(), vec!["dem_path"]);

    let message = warnings
        .iter()
        .find(|(keys, _)| keys.contains(&"dem_path"))
        .map(|(_, message)| message.clone())
        .unwrap();
    assert_eq!(message, NOT_A_RASTER_MSG);
}

#[test]
fn test_validate_band_index_type_and_minimum() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("notafile.txt");

    let mut args = ArgumentSet::from_json(json!({
        "workspace_dir": dir.path().to_string_lossy(),
        "dem_path": missing.to_string_lossy(),
        "dem_band_index": [1, 2, 3],
    }))
    .unwrap();

    let expected: BTreeSet<&str> = [
        "algorithm",
        "dem_band_index",
        "dem_path",
        "threshold_flow_accumulation_range",
    ]
    .into_iter()
    .collect();

    assert_eq!(invalid_keys(&validate(&args)), expected);

    args.set("dem_band_index", json!(-5));
    assert_eq!(invalid_keys(&validate(&args)), expected);
}

#[test]
fn test_validate_band_index_against_band_count() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);

    let mut args = ArgumentSet::from_json(json!({
        "workspace_dir": dir.path().to_string_lossy(),
        "dem_path": dem.to_string_lossy(),
        "dem_band_index": 5,
        "algorithm": "d8",
        "threshold_flow_accumulation_range": "2:5:2",
    }))
    .unwrap();

    let warnings = validate(&args);
    let invalid = invalid_keys(&warnings);
    assert_eq!(invalid.into_iter().collect::<Vec<_>>(), vec!["dem_band_index"]);

    let message = warnings
        .iter()
        .find(|(keys, _)| keys.contains(&"dem_band_index"))
        .map(|(_, message)| message.clone())
        .unwrap();
    assert_eq!(message, "Must be between 1 and 2");

    args.set("dem_band_index", json!(2));
    assert!(
        validate(&args).is_empty(),
        "band 2 exists in the fixture and must pass"
    );
}

#[test]
fn test_validate_range_format_and_emptiness() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);

    let mut args = ArgumentSet::from_json(json!({
        "workspace_dir": dir.path().to_string_lossy(),
        "dem_path": dem.to_string_lossy(),
        "algorithm": "d8",
        "threshold_flow_accumulation_range": "2:5:2",
    }))
    .unwrap();

    for bad in ["2:5", "3:4:0"] {
        args.set("threshold_flow_accumulation_range", json!(bad));
        let invalid = invalid_keys(&validate(&args));
        assert_eq!(
            invalid.into_iter().collect::<Vec<_>>(),
            vec!["threshold_flow_accumulation_range"],
            "only the range key may fail for {:?}",
            bad
        );
    }

    // Well-formed but empty: start past stop.
    args.set("threshold_flow_accumulation_range", json!("5:1:2"));
    let warnings = validate(&args);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].0, vec!["threshold_flow_accumulation_range"]);
    assert_eq!(warnings[0].1, INVALID_RANGE_MSG);
}

#[test]
fn test_vector_outputs_match_recomputed_segments() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);
    let workspace = dir.path().join("workspace");

    let args = ArgumentSet::from_json(json!({
        "workspace_dir": workspace.to_string_lossy(),
        "dem_path": dem.to_string_lossy(),
        "dem_band_index": 2,
        "results_suffix": "foo",
        "algorithm": "d8",
        "threshold_flow_accumulation_range": "2:3:1",
        "calculate_stream_order": true,
        "calculate_subwatersheds": true,
    }))
    .unwrap();

    let registry = execute(&args).expect("vector run failed");

    // Rebuild the segments from the rasters the run wrote.
    let directions: Raster<u8> =
        read_geotiff(&registry.path(FileKey::global("flow_direction")).unwrap(), None).unwrap();
    let accumulation: Raster<f64> =
        read_geotiff(&registry.path(FileKey::global("flow_accumulation")).unwrap(), None).unwrap();
    let filled: Raster<f64> =
        read_geotiff(&registry.path(FileKey::global("filled")).unwrap(), None).unwrap();

    let params = StrahlerParams { threshold: 2.0, river_order: 5 };
    let segments = strahler_segments(&directions, &accumulation, &filled, &params)
        .expect("segment extraction failed");
    assert!(!segments.is_empty(), "threshold 2 must produce stream segments");

    let layer = "strahler_stream_order_tfa_2_foo";
    let conn =
        Connection::open(registry.path(FileKey::tfa("strahler_stream_order", 2)).unwrap()).unwrap();

    let registered: String = conn
        .query_row(
            "SELECT table_name FROM gpkg_contents WHERE data_type = 'features'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(registered, layer, "layer must be registered under the file stem");

    let rows: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", layer), [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows as usize, segments.len());

    let mut by_order: BTreeMap<i64, i64> = BTreeMap::new();
    for segment in &segments {
        *by_order.entry(i64::from(segment.order)).or_insert(0) += 1;
    }
    let mut stmt = conn
        .prepare(&format!(
            "SELECT \"order\", COUNT(*) FROM \"{}\" GROUP BY \"order\"",
            layer
        ))
        .unwrap();
    let stored: BTreeMap<i64, i64> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert_eq!(stored, by_order, "per-order segment counts differ");

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{}\")", layer))
        .unwrap();
    let columns: BTreeSet<String> = stmt
        .query_map([], |row| row.get(1))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    for field in STRAHLER_FIELDS {
        assert!(columns.contains(field.name), "missing column {}", field.name);
    }

    // One polygon per segment, none cut short on a grid this small.
    let sub_layer = "subwatersheds_tfa_2_foo";
    let conn =
        Connection::open(registry.path(FileKey::tfa("subwatersheds", 2)).unwrap()).unwrap();
    let polygons: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", sub_layer), [], |row| row.get(0))
        .unwrap();
    assert_eq!(polygons as usize, segments.len());

    let truncated: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM \"{}\" WHERE terminated_early != 0", sub_layer),
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(truncated, 0);

    let null_geometries: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM \"{}\" WHERE geom IS NULL", sub_layer),
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(null_geometries, 0);
}

#[test]
fn test_reruns_reproduce_identical_rasters() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);

    let first = execute(&full_args(&dir.path().join("a"), &dem, "d8")).unwrap();
    let second = execute(&full_args(&dir.path().join("b"), &dem, "d8")).unwrap();

    // GeoPackages embed a last-change timestamp, so only rasters are
    // expected to match byte for byte.
    for (key, path) in first.iter() {
        if path.extension().is_some_and(|ext| ext == "tif") {
            let twin = second.path(key).unwrap();
            assert_eq!(
                fs::read(path).unwrap(),
                fs::read(&twin).unwrap(),
                "raster {} differs between runs",
                key
            );
        }
    }
}

#[test]
fn test_parallel_workers_produce_full_output_set() {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    make_dem(&dem);
    let workspace = dir.path().join("workspace");

    let mut args = full_args(&workspace, &dem, "d8");
    args.set("n_workers", json!(2));

    let registry = execute(&args).expect("parallel run failed");
    assert_eq!(registry.len(), 12);
    for (key, path) in registry.iter() {
        assert!(path.exists(), "output {} missing at {}", key, path.display());
    }
}
