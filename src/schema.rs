//! Schema of the optional `testframe.yaml` / `testframe.toml` run configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// The only config `version` this release reads.
pub const CONFIG_VERSION: u32 = 1;

/// Default pattern test file paths must match during discovery.
pub const DEFAULT_PATTERN: &str = r"_spec\.rs$";

/// Run configuration loaded from the test root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Config format version (currently `1`).
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory searched recursively for test files, relative to the config file.
    #[serde(default)]
    pub test_dir: Option<PathBuf>,

    /// Regular expression a discovered path must match (default: `_spec\.rs$`).
    #[serde(default)]
    pub pattern: Option<String>,

    /// Globals exposed to every case as environment variables.
    /// Values may reference host variables with `${VAR}`.
    #[serde(default)]
    pub globals: BTreeMap<String, String>,

    /// Arbitrary values made available to stages.
    #[serde(default)]
    pub components: HashMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Config {
    pub fn pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or(DEFAULT_PATTERN)
    }
}

/// Generate the JSON Schema for the configuration file.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Config)
}
