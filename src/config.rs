//! Module option bags
//!
//! A [`ModuleConfig`] carries the named options a module recognizes. Getters
//! return `Ok(None)` for absent keys so defaults stay untouched; a key that
//! is present with the wrong type is a configuration error. Keys a module
//! does not recognize are simply ignored.

use std::collections::BTreeMap;

use crate::PipelineError;

/// A single option value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f32),
    Bool(bool),
    Str(String),
    Floats(Vec<f32>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Floats(_) => "float vector",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Floats(v)
    }
}

impl From<&[f32]> for Value {
    fn from(v: &[f32]) -> Self {
        Value::Floats(v.to_vec())
    }
}

/// Named options for one module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleConfig {
    values: BTreeMap<String, Value>,
}

fn type_error(key: &str, wanted: &str, got: &Value) -> PipelineError {
    PipelineError::Config(format!(
        "option `{}` must be {}, got {}",
        key,
        wanted,
        got.type_name()
    ))
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_owned(), value.into());
    }

    pub fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, PipelineError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(type_error(key, "an int", other)),
        }
    }

    /// Integer option that must be non-negative (widths, dimensions, rates).
    pub fn get_usize(&self, key: &str) -> Result<Option<usize>, PipelineError> {
        match self.get_i64(key)? {
            None => Ok(None),
            Some(v) if v >= 0 => Ok(Some(v as usize)),
            Some(v) => Err(PipelineError::Config(format!(
                "option `{}` must be >= 0, got {}",
                key, v
            ))),
        }
    }

    /// Float option; integers coerce.
    pub fn get_f32(&self, key: &str) -> Result<Option<f32>, PipelineError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Float(v)) => Ok(Some(*v)),
            Some(Value::Int(v)) => Ok(Some(*v as f32)),
            Some(other) => Err(type_error(key, "a float", other)),
        }
    }

    /// Bool option; 0/1 integers coerce.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, PipelineError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Bool(v)) => Ok(Some(*v)),
            Some(Value::Int(0)) => Ok(Some(false)),
            Some(Value::Int(1)) => Ok(Some(true)),
            Some(other) => Err(type_error(key, "a bool", other)),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>, PipelineError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v)),
            Some(other) => Err(type_error(key, "a string", other)),
        }
    }

    pub fn get_floats(&self, key: &str) -> Result<Option<&[f32]>, PipelineError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Floats(v)) => Ok(Some(v)),
            Some(other) => Err(type_error(key, "a float vector", other)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
