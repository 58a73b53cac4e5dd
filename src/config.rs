//! Build variables describing one resolution run.
use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::read_to_string, path::Path};

pub const ACTIVE_PLATFORM: &str = "ACTIVE_PLATFORM";
pub const TARGET_ARCH: &str = "TARGET_ARCH";
pub const TARGET: &str = "TARGET";
pub const FLASH_DEFINITION: &str = "FLASH_DEFINITION";
pub const VERSION: &str = "VERSION";

/// Recorded when the environment does not carry a `VERSION` variable.
pub const UNKNOWN_VERSION: &str = "UNKNOWN";

/// The build variables (`ACTIVE_PLATFORM`, `TARGET_ARCH`, `TARGET`, ...) a run is evaluated
/// against. Generators read their required keys at construction time; the orchestrator records
/// the whole map alongside each environment row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildEnv(BTreeMap<String, String>);

impl BuildEnv {
    pub fn new() -> Self {
        BuildEnv::default()
    }

    /// Read a flat TOML table of `KEY = "value"` pairs.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        tracing::debug!("Reading build environment from {:?}", path.as_ref());
        let content = read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, GraphError> {
        self.get(key).ok_or_else(|| {
            GraphError::Config(format!("required build variable {key} is not set"))
        })
    }

    /// `TARGET_ARCH` split on whitespace, e.g. `"IA32 X64"`.
    pub fn target_archs(&self) -> Result<Vec<String>, GraphError> {
        Ok(self
            .require(TARGET_ARCH)?
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// Fail unless `other` carries the same value as `self` for each of `keys`.
    pub fn ensure_same(&self, other: &BuildEnv, keys: &[&str]) -> Result<(), GraphError> {
        for key in keys {
            let (expected, actual) = (self.get(key), other.get(key));
            if expected != actual {
                return Err(GraphError::Config(format!(
                    "build variable {key} is {actual:?} for this run, generator expects {expected:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn version(&self) -> &str {
        self.get(VERSION).unwrap_or(UNKNOWN_VERSION)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BuildEnv {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        BuildEnv(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
