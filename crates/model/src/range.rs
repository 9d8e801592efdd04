//! Threshold range parsing
//!
//! The flow-accumulation threshold sweep is described by a `start:stop:step`
//! string. Parsing produces the half-open arithmetic sequence
//! `start, start+step, ...` of values strictly below `stop`. An empty
//! sequence (`start >= stop`) is a legal parse; whether that is acceptable
//! is the validator's call, not the parser's.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Ways a `start:stop:step` string can fail to parse
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeFormatError {
    #[error("Range must be start:stop:step, got {0} field(s)")]
    WrongFieldCount(usize),

    #[error("Range field '{0}' is not a non-negative integer")]
    NotAnInteger(String),

    #[error("Range step must be a positive integer")]
    ZeroStep,
}

/// A half-open arithmetic sequence of flow-accumulation thresholds.
///
/// `stop` is never produced, even when `(stop - start)` divides evenly by
/// `step`. The sequence may be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdRange {
    start: u64,
    stop: u64,
    step: u64,
}

impl ThresholdRange {
    /// Build a range, rejecting a zero step.
    pub fn new(start: u64, stop: u64, step: u64) -> Result<Self, RangeFormatError> {
        if step == 0 {
            return Err(RangeFormatError::ZeroStep);
        }
        Ok(Self { start, stop, step })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn stop(&self) -> u64 {
        self.stop
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// True when the sequence holds no values (`start >= stop`)
    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }

    /// Number of values in the sequence
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            ((self.stop - self.start - 1) / self.step + 1) as usize
        }
    }

    /// The threshold values, in ascending order.
    ///
    /// `step` is at least 1 by construction, so `step_by` cannot panic.
    pub fn values(&self) -> impl Iterator<Item = u64> {
        (self.start..self.stop).step_by(self.step as usize)
    }
}

impl FromStr for ThresholdRange {
    type Err = RangeFormatError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = text.split(':').collect();
        if fields.len() != 3 {
            return Err(RangeFormatError::WrongFieldCount(fields.len()));
        }

        let parse_field = |field: &str| -> Result<u64, RangeFormatError> {
            if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RangeFormatError::NotAnInteger(field.to_string()));
            }
            field
                .parse::<u64>()
                .map_err(|_| RangeFormatError::NotAnInteger(field.to_string()))
        };

        let start = parse_field(fields[0])?;
        let stop = parse_field(fields[1])?;
        let step = parse_field(fields[2])?;
        Self::new(start, stop, step)
    }
}

impl fmt::Display for ThresholdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.stop, self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_sequence() {
        let range: ThresholdRange = "2:5:2".parse().unwrap();
        assert_eq!(range.values().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(range.len(), 2, "2:5:2 holds exactly two values");
    }

    #[test]
    fn test_stop_excluded_even_when_divisible() {
        let range: ThresholdRange = "2:6:2".parse().unwrap();
        assert_eq!(
            range.values().collect::<Vec<_>>(),
            vec![2, 4],
            "stop must never appear in the sequence"
        );
    }

    #[test]
    fn test_step_one_from_zero() {
        let range: ThresholdRange = "0:4:1".parse().unwrap();
        assert_eq!(range.values().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_uneven_step() {
        let range: ThresholdRange = "0:10:3".parse().unwrap();
        assert_eq!(range.values().collect::<Vec<_>>(), vec![0, 3, 6, 9]);
        assert_eq!(range.len(), 4);
    }

    #[test]
    fn test_empty_sequence_parses() {
        let range: ThresholdRange = "5:1:2".parse().unwrap();
        assert!(range.is_empty(), "start >= stop is a legal, empty range");
        assert_eq!(range.len(), 0);
        assert_eq!(range.values().count(), 0);
    }

    #[test]
    fn test_equal_start_stop_is_empty() {
        let range: ThresholdRange = "3:3:1".parse().unwrap();
        assert!(range.is_empty());
    }

    #[test]
    fn test_wrong_field_count() {
        assert_eq!(
            "2:5".parse::<ThresholdRange>(),
            Err(RangeFormatError::WrongFieldCount(2))
        );
        assert_eq!(
            "1:2:3:4".parse::<ThresholdRange>(),
            Err(RangeFormatError::WrongFieldCount(4))
        );
        assert_eq!(
            "".parse::<ThresholdRange>(),
            Err(RangeFormatError::WrongFieldCount(1))
        );
    }

    #[test]
    fn test_zero_step_rejected() {
        assert_eq!(
            "3:4:0".parse::<ThresholdRange>(),
            Err(RangeFormatError::ZeroStep)
        );
    }

    #[test]
    fn test_non_integer_fields_rejected() {
        assert_eq!(
            "a:b:c".parse::<ThresholdRange>(),
            Err(RangeFormatError::NotAnInteger("a".to_string()))
        );
        assert_eq!(
            "-1:5:1".parse::<ThresholdRange>(),
            Err(RangeFormatError::NotAnInteger("-1".to_string())),
            "negative numbers are not non-negative integers"
        );
        assert_eq!(
            "1:2.5:1".parse::<ThresholdRange>(),
            Err(RangeFormatError::NotAnInteger("2.5".to_string()))
        );
        assert_eq!(
            "1::1".parse::<ThresholdRange>(),
            Err(RangeFormatError::NotAnInteger(String::new()))
        );
    }

    #[test]
    fn test_display_round_trip() {
        let range: ThresholdRange = "2:5:2".parse().unwrap();
        assert_eq!(range.to_string(), "2:5:2");
    }
}
