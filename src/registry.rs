use crate::{Error, Result};
use anyhow::anyhow;
use std::collections::HashMap;

/// Directory holding per-build and per-board configuration.
pub const FPGA_SERVER_PATH: [&str; 3] = ["", "Servers", "GHz FPGAs"];

/// A value stored in the configuration registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// List of `(name, value)` pairs, as used for build and board parameters.
    Parameters(Vec<(String, i64)>),
}

impl RegistryValue {
    fn kind(&self) -> &'static str {
        match self {
            RegistryValue::Int(_) => "integer",
            RegistryValue::Float(_) => "float",
            RegistryValue::Bool(_) => "bool",
            RegistryValue::Str(_) => "string",
            RegistryValue::Parameters(_) => "parameter list",
        }
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::Config(format!("expected {expected}, found {}", self.kind()))
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            RegistryValue::Int(v) => Ok(*v),
            other => Err(other.mismatch("integer")),
        }
    }

    /// Integers are widened to floats.
    pub fn as_float(&self) -> Result<f64> {
        match self {
            RegistryValue::Float(v) => Ok(*v),
            RegistryValue::Int(v) => Ok(*v as f64),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            RegistryValue::Bool(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            RegistryValue::Str(v) => Ok(v),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_parameters(&self) -> Result<&[(String, i64)]> {
        match self {
            RegistryValue::Parameters(v) => Ok(v),
            other => Err(other.mismatch("parameter list")),
        }
    }
}

impl From<i64> for RegistryValue {
    fn from(value: i64) -> Self {
        RegistryValue::Int(value)
    }
}

impl From<f64> for RegistryValue {
    fn from(value: f64) -> Self {
        RegistryValue::Float(value)
    }
}

impl From<bool> for RegistryValue {
    fn from(value: bool) -> Self {
        RegistryValue::Bool(value)
    }
}

impl From<&str> for RegistryValue {
    fn from(value: &str) -> Self {
        RegistryValue::Str(value.to_string())
    }
}

impl From<Vec<(String, i64)>> for RegistryValue {
    fn from(value: Vec<(String, i64)>) -> Self {
        RegistryValue::Parameters(value)
    }
}

/// Hierarchical, read-only configuration store.
#[allow(async_fn_in_trait)]
pub trait Registry {
    async fn get(&self, path: &[&str], key: &str) -> anyhow::Result<RegistryValue>;
}

/// Registry kept in process memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryRegistry {
    entries: HashMap<(Vec<String>, String), RegistryValue>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: &[&str], key: &str, value: impl Into<RegistryValue>) -> &mut Self {
        let path = path.iter().map(|p| p.to_string()).collect();
        self.entries.insert((path, key.to_string()), value.into());
        self
    }
}

impl Registry for MemoryRegistry {
    async fn get(&self, path: &[&str], key: &str) -> anyhow::Result<RegistryValue> {
        let lookup = (
            path.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            key.to_string(),
        );
        self.entries
            .get(&lookup)
            .cloned()
            .ok_or_else(|| anyhow!("registry key {key} not found in {}", path.join("/")))
    }
}
