//! Argument validation
//!
//! Walks the model specification's inputs over an untrusted argument set and
//! reports problems as (offending keys, message) pairs. The argument set may
//! be partial or entirely empty; validation degrades to reporting missing
//! keys instead of failing. An empty warning list means the arguments are
//! ready for [`execute`](crate::tasks::execute).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use routedem_core::io::geotiff_band_count;

use crate::args::ArgumentSet;
use crate::range::ThresholdRange;
use crate::spec::{InputKind, MODEL_SPEC};

/// One validation finding: the keys at fault and a human-readable message
pub type ValidationWarning = (Vec<&'static str>, String);

pub const MISSING_KEY_MSG: &str = "Key is missing from the arguments";
pub const MISSING_VALUE_MSG: &str = "Input is required but has no value";
pub const NOT_A_STRING_MSG: &str = "Value must be a string";
pub const NOT_A_BOOLEAN_MSG: &str = "Value must be either true or false";
pub const NOT_AN_INTEGER_MSG: &str = "Value does not represent an integer";
pub const FILE_NOT_FOUND_MSG: &str = "File not found";
pub const NOT_A_RASTER_MSG: &str = "File could not be opened as a raster";
/// Reported when a range string parses but yields zero thresholds
pub const INVALID_RANGE_MSG: &str = "Provided range contains zero items";

/// Validate an argument set against the model specification.
///
/// Checks run per input in specification order, then two cross-field checks:
/// the band index against the DEM's actual band count, and the threshold
/// range against emptiness. A cross-field check is skipped when any key it
/// reads is already invalid on its own.
pub fn validate(args: &ArgumentSet) -> Vec<ValidationWarning> {
    let mut warnings: Vec<ValidationWarning> = Vec::new();

    for input in MODEL_SPEC.inputs {
        if input.allowed.is_some_and(|allowed| !allowed(args)) {
            continue;
        }

        let value = match args.get(input.id) {
            None => {
                if input.required {
                    warnings.push((vec![input.id], MISSING_KEY_MSG.to_string()));
                }
                continue;
            }
            Some(value) => value,
        };

        if !args.is_sufficient(input.id) {
            if input.required {
                warnings.push((vec![input.id], MISSING_VALUE_MSG.to_string()));
            }
            continue;
        }

        if let Some(message) = check_value(&input.kind, value) {
            warnings.push((vec![input.id], message));
        }
    }

    let invalid: BTreeSet<&str> = warnings
        .iter()
        .flat_map(|(keys, _)| keys.iter().copied())
        .collect();

    // Band count check: needs both the path and the index to be usable on
    // their own first.
    if !invalid.contains("dem_band_index")
        && !invalid.contains("dem_path")
        && args.is_sufficient("dem_band_index")
        && args.is_sufficient("dem_path")
    {
        if let (Some(path), Some(band)) = (args.get_str("dem_path"), args.get_int("dem_band_index"))
        {
            if let Ok(count) = geotiff_band_count(path) {
                if band > count as i64 {
                    warnings.push((
                        vec!["dem_band_index"],
                        format!("Must be between 1 and {}", count),
                    ));
                }
            }
        }
    }

    // Emptiness check: the regex cannot express start < stop, so a
    // syntactically valid range still needs a parse.
    if !invalid.contains("threshold_flow_accumulation_range")
        && args.is_sufficient("threshold_flow_accumulation_range")
    {
        if let Some(text) = args.get_str("threshold_flow_accumulation_range") {
            match text.parse::<ThresholdRange>() {
                Ok(range) if range.is_empty() => {
                    warnings.push((
                        vec!["threshold_flow_accumulation_range"],
                        INVALID_RANGE_MSG.to_string(),
                    ));
                }
                Ok(_) => {}
                Err(err) => {
                    warnings.push((vec!["threshold_flow_accumulation_range"], err.to_string()));
                }
            }
        }
    }

    warnings
}

/// Every key named by at least one warning
pub fn invalid_keys(warnings: &[ValidationWarning]) -> BTreeSet<&'static str> {
    warnings
        .iter()
        .flat_map(|(keys, _)| keys.iter().copied())
        .collect()
}

/// Render warnings one per line for error messages and CLI output
pub fn format_warnings(warnings: &[ValidationWarning]) -> String {
    warnings
        .iter()
        .map(|(keys, message)| format!("[{}] {}", keys.join(", "), message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Check one sufficient value against its declared kind
fn check_value(kind: &InputKind, value: &Value) -> Option<String> {
    match kind {
        InputKind::Boolean => match value {
            Value::Bool(_) => None,
            _ => Some(NOT_A_BOOLEAN_MSG.to_string()),
        },
        InputKind::Directory | InputKind::FreeText => match value {
            Value::String(_) => None,
            _ => Some(NOT_A_STRING_MSG.to_string()),
        },
        InputKind::Integer { minimum } => match value.as_i64() {
            None => Some(NOT_AN_INTEGER_MSG.to_string()),
            Some(v) if v < *minimum => Some(format!("Value must be at least {}", minimum)),
            Some(_) => None,
        },
        InputKind::OptionSet { options } => match value {
            Value::String(text) if options.iter().any(|o| o.eq_ignore_ascii_case(text)) => None,
            Value::String(_) => Some(format!("Value must be one of: {}", options.join(", "))),
            _ => Some(NOT_A_STRING_MSG.to_string()),
        },
        InputKind::Pattern { regexp } => match value {
            Value::String(text) if compiled_pattern(regexp).is_match(text) => None,
            Value::String(_) => Some(format!("Value did not match expected pattern {}", regexp)),
            _ => Some(NOT_A_STRING_MSG.to_string()),
        },
        InputKind::RasterFile => match value {
            Value::String(text) => {
                let path = Path::new(text);
                if !path.exists() {
                    Some(FILE_NOT_FOUND_MSG.to_string())
                } else if geotiff_band_count(path).is_err() {
                    Some(NOT_A_RASTER_MSG.to_string())
                } else {
                    None
                }
            }
            _ => Some(NOT_A_STRING_MSG.to_string()),
        },
    }
}

// MODEL_SPEC carries a single pattern-constrained input, so one cached
// compilation covers every call.
fn compiled_pattern(regexp: &'static str) -> &'static Regex {
    static COMPILED: OnceLock<Regex> = OnceLock::new();
    COMPILED.get_or_init(|| Regex::new(regexp).expect("input pattern must compile"))
}
