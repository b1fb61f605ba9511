//! Read-only configuration store for a batch run.
//!
//! Values come from a TOML file whose nested tables are flattened into dotted
//! keys (`[outcome_code]` + `10 = "..."` becomes `outcome_code.10`). Every
//! value is kept as a string and converted on lookup, so a single file can be
//! read by typed accessors without a fixed schema.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use toml::Value;

use crate::core::failure::RunFailure;
use crate::core::outcome::{OutcomeCatalog, OutcomeCode};
use crate::core::resolver::ResolvePolicy;

/// Keys the launcher reads.
pub mod keys {
    pub const BATCH_ID: &str = "batch_id";
    pub const PROTOCOL_FILE: &str = "protocol_file";
    pub const REQUIRE_PROTOCOL_SINK: &str = "require_protocol_sink";
    pub const HONOR_MANUAL_ABORT: &str = "honor_manual_abort";
    pub const MAX_RUNTIME_SECS: &str = "max_runtime_secs";
    pub const OUTCOME_CODE_PREFIX: &str = "outcome_code.";
}

/// Classification id attached to configuration failures.
pub const CONFIG_CLASSIFICATION_ID: &str = "CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration key '{key}'")]
    MissingKey { key: String },
    #[error("configuration key '{key}' has value '{value}', expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
    #[error("read configuration {path}: {message}")]
    Read { path: PathBuf, message: String },
}

impl From<ConfigError> for RunFailure {
    fn from(err: ConfigError) -> Self {
        RunFailure::framework(
            CONFIG_CLASSIFICATION_ID,
            OutcomeCode::CONFIG_ERROR,
            err.to_string(),
        )
    }
}

/// Flat key/value configuration with typed lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyStore {
    values: BTreeMap<String, String>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML file. A missing or malformed file is a configuration error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let read_error = |message: String| ConfigError::Read {
            path: path.to_path_buf(),
            message,
        };
        let contents = fs::read_to_string(path).map_err(|err| read_error(err.to_string()))?;
        Self::parse(&contents).map_err(|err| read_error(format!("{err:#}")))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(contents).context("parse configuration toml")?;
        let mut store = Self::new();
        flatten("", &table, &mut store.values);
        Ok(store)
    }

    /// Set or replace a value (used for command-line overrides).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingKey {
                key: key.to_string(),
            })
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_i32(&self, key: &str) -> Result<i32, ConfigError> {
        self.parse_required(key, "an integer")
    }

    pub fn get_i32_or(&self, key: &str, default: i32) -> Result<i32, ConfigError> {
        self.parse_optional(key, "an integer", default)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ConfigError> {
        self.parse_required(key, "a long integer")
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        self.parse_optional(key, "a long integer", default)
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        self.parse_required(key, "a number")
    }

    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        self.parse_optional(key, "a number", default)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        self.parse_required(key, "true or false")
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        self.parse_optional(key, "true or false", default)
    }

    /// Baseline outcome codes plus every `outcome_code.<value>` entry.
    pub fn outcome_catalog(&self) -> Result<OutcomeCatalog, ConfigError> {
        let mut catalog = OutcomeCatalog::default();
        for (key, description) in &self.values {
            let Some(raw) = key.strip_prefix(keys::OUTCOME_CODE_PREFIX) else {
                continue;
            };
            let value = raw.trim().parse::<i32>().map_err(|_| ConfigError::InvalidValue {
                key: key.clone(),
                value: raw.to_string(),
                expected: "an integer outcome code in the key",
            })?;
            catalog
                .register(OutcomeCode::new(value, description.clone()))
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.clone(),
                    value: description.clone(),
                    expected: "a non-baseline outcome code",
                })?;
        }
        Ok(catalog)
    }

    pub fn resolve_policy(&self) -> Result<ResolvePolicy, ConfigError> {
        Ok(ResolvePolicy {
            honor_manual_abort: self.get_bool_or(keys::HONOR_MANUAL_ABORT, false)?,
        })
    }

    fn parse_required<T: FromStr>(&self, key: &str, expected: &'static str) -> Result<T, ConfigError> {
        let raw = self.get_string(key)?;
        convert(key, &raw, expected)
    }

    fn parse_optional<T: FromStr>(
        &self,
        key: &str,
        expected: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.values.get(key) {
            Some(raw) => convert(key, raw, expected),
            None => Ok(default),
        }
    }
}

fn convert<T: FromStr>(key: &str, raw: &str, expected: &'static str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        expected,
    })
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Table(nested) => flatten(&full, nested, out),
            Value::String(s) => {
                out.insert(full, s.clone());
            }
            Value::Array(items) => {
                let joined: Vec<String> = items.iter().map(scalar_to_string).collect();
                out.insert(full, joined.join(","));
            }
            other => {
                out.insert(full, scalar_to_string(other));
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
