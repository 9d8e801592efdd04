//! Output file registry
//!
//! Built once per run from the model specification and the resolved
//! configuration, then read-only. Every task takes the paths it touches from
//! here, so two tasks can never disagree about where an output lives.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::spec::{ModelSpec, THRESHOLD_PLACEHOLDER};

/// Composite key for one output file: base identifier plus the threshold for
/// per-threshold outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileKey {
    pub id: &'static str,
    pub threshold: Option<u64>,
}

impl FileKey {
    /// Key for a run-global output
    pub fn global(id: &'static str) -> Self {
        Self {
            id,
            threshold: None,
        }
    }

    /// Key for one threshold's instance of a per-threshold output
    pub fn tfa(id: &'static str, threshold: u64) -> Self {
        Self {
            id,
            threshold: Some(threshold),
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.threshold {
            Some(tfa) => write!(f, "{}_tfa_{}", self.id, tfa),
            None => f.write_str(self.id),
        }
    }
}

/// Immutable mapping from output key to file path for one run
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    entries: BTreeMap<FileKey, PathBuf>,
}

impl FileRegistry {
    /// Instantiate every output whose creation predicate holds.
    ///
    /// Per-threshold templates are expanded once per configured threshold;
    /// the resolved suffix lands just before the file extension.
    pub fn build(spec: &ModelSpec, config: &RunConfig) -> Self {
        let mut entries = BTreeMap::new();
        for output in spec.outputs {
            if !(output.created_if)(config) {
                continue;
            }
            if output.per_threshold {
                for &tfa in &config.thresholds {
                    let name = file_name(output.template, Some(tfa), &config.file_suffix);
                    entries.insert(FileKey::tfa(output.id, tfa), config.workspace_dir.join(name));
                }
            } else {
                let name = file_name(output.template, None, &config.file_suffix);
                entries.insert(FileKey::global(output.id), config.workspace_dir.join(name));
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: FileKey) -> Option<&Path> {
        self.entries.get(&key).map(PathBuf::as_path)
    }

    /// Owned path for `key`; an absent key is an orchestration bug surfaced
    /// as an error rather than a panic.
    pub fn path(&self, key: FileKey) -> Result<PathBuf> {
        self.entries
            .get(&key)
            .cloned()
            .ok_or(Error::MissingRegistryEntry(key))
    }

    pub fn contains(&self, key: FileKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileKey, &Path)> {
        self.entries.iter().map(|(key, path)| (*key, path.as_path()))
    }

    pub fn keys(&self) -> impl Iterator<Item = FileKey> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expand a template into a concrete file name
fn file_name(template: &str, tfa: Option<u64>, suffix: &str) -> String {
    let name = match tfa {
        Some(value) => template.replace(THRESHOLD_PLACEHOLDER, &value.to_string()),
        None => template.to_string(),
    };
    match name.rsplit_once('.') {
        Some((stem, extension)) => format!("{}{}.{}", stem, suffix, extension),
        None => format!("{}{}", name, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgumentSet;
    use crate::spec::MODEL_SPEC;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn config(algorithm: &str, suffix: &str, flags: &[&str]) -> RunConfig {
        let mut args = ArgumentSet::from_json(json!({
            "workspace_dir": "/tmp/workspace",
            "dem_path": "/tmp/dem.tif",
            "algorithm": algorithm,
            "threshold_flow_accumulation_range": "2:5:2",
            "results_suffix": suffix,
        }))
        .unwrap();
        for flag in flags {
            args.set(*flag, json!(true));
        }
        RunConfig::from_args(&args).unwrap()
    }

    #[test]
    fn test_file_name_expansion() {
        assert_eq!(file_name("filled.tif", None, ""), "filled.tif");
        assert_eq!(file_name("filled.tif", None, "_foo"), "filled_foo.tif");
        assert_eq!(
            file_name("stream_mask_tfa_{tfa}.tif", Some(2), "_foo"),
            "stream_mask_tfa_2_foo.tif"
        );
        assert_eq!(
            file_name("subwatersheds_tfa_{tfa}.gpkg", Some(40), ""),
            "subwatersheds_tfa_40.gpkg"
        );
    }

    #[test]
    fn test_full_d8_registry() {
        let config = config(
            "d8",
            "foo",
            &[
                "calculate_slope",
                "calculate_downslope_distance",
                "calculate_stream_order",
                "calculate_subwatersheds",
            ],
        );
        let registry = FileRegistry::build(&MODEL_SPEC, &config);

        let names: BTreeSet<String> = registry
            .iter()
            .map(|(_, path)| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        let expected: BTreeSet<String> = [
            "filled_foo.tif",
            "flow_direction_foo.tif",
            "flow_accumulation_foo.tif",
            "slope_foo.tif",
            "stream_mask_tfa_2_foo.tif",
            "stream_mask_tfa_4_foo.tif",
            "downslope_distance_tfa_2_foo.tif",
            "downslope_distance_tfa_4_foo.tif",
            "strahler_stream_order_tfa_2_foo.gpkg",
            "strahler_stream_order_tfa_4_foo.gpkg",
            "subwatersheds_tfa_2_foo.gpkg",
            "subwatersheds_tfa_4_foo.gpkg",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(names, expected, "full d8 run produces twelve outputs");
        assert_eq!(registry.len(), 12);
    }

    #[test]
    fn test_mfd_registry_has_no_vector_outputs() {
        let config = config(
            "mfd",
            "",
            &[
                "calculate_slope",
                "calculate_downslope_distance",
                "calculate_stream_order",
                "calculate_subwatersheds",
            ],
        );
        let registry = FileRegistry::build(&MODEL_SPEC, &config);

        assert!(!registry.contains(FileKey::tfa("strahler_stream_order", 2)));
        assert!(!registry.contains(FileKey::tfa("subwatersheds", 2)));
        assert!(registry.contains(FileKey::tfa("stream_mask", 2)));
        assert_eq!(registry.len(), 8, "four global rasters plus two per-threshold pairs");
    }

    #[test]
    fn test_minimal_registry() {
        let registry = FileRegistry::build(&MODEL_SPEC, &config("d8", "", &[]));
        let keys: Vec<FileKey> = registry.keys().collect();
        assert_eq!(
            keys,
            vec![
                FileKey::global("filled"),
                FileKey::global("flow_accumulation"),
                FileKey::global("flow_direction"),
                FileKey::tfa("stream_mask", 2),
                FileKey::tfa("stream_mask", 4),
            ]
        );
    }

    #[test]
    fn test_path_reports_missing_entries() {
        let registry = FileRegistry::build(&MODEL_SPEC, &config("d8", "", &[]));
        let path = registry.path(FileKey::global("filled")).unwrap();
        assert!(path.starts_with("/tmp/workspace"));

        match registry.path(FileKey::global("slope")) {
            Err(Error::MissingRegistryEntry(key)) => assert_eq!(key.id, "slope"),
            other => panic!("expected missing-entry error, got {:?}", other),
        }
    }

    #[test]
    fn test_key_display() {
        assert_eq!(FileKey::global("filled").to_string(), "filled");
        assert_eq!(FileKey::tfa("stream_mask", 7).to_string(), "stream_mask_tfa_7");
    }
}
