//! Boundary argument set
//!
//! Callers hand the model a loose JSON object; nothing about it is trusted
//! until the validator has seen it. [`ArgumentSet`] wraps that object with
//! accessors that never panic on missing or mistyped keys.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// An untyped bag of model arguments keyed by input id
#[derive(Debug, Clone, Default)]
pub struct ArgumentSet {
    values: Map<String, Value>,
}

impl ArgumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            _ => Err(Error::ArgumentsNotAnObject),
        }
    }

    /// Insert or replace one argument
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String value of `key`, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Integer value of `key`. Floats and numeric strings do not count.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    /// Boolean value of `key`; anything but JSON `true` reads as false
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(Value::Bool(true)))
    }

    /// True when `key` carries a usable value: present, not null, and not a
    /// blank string. Insufficient values are treated the same as absent ones
    /// by every downstream consumer.
    pub fn is_sufficient(&self, key: &str) -> bool {
        match self.values.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(_) => true,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl From<Map<String, Value>> for ArgumentSet {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}
