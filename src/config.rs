//! Suite configuration.
//!
//! A directory may carry a `lit.yaml` or `lit.toml` override file. Its
//! contents deserialize into [`LocalConfig`], which is merged over the parent
//! directory's [`Config`] to produce the effective configuration for that
//! directory. A `Config` is never mutated after construction; children get a
//! fresh value from [`Config::merge`].

use crate::directive;
use crate::loader::{self, LoadError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error raised while resolving a directory's configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The override file could not be read or parsed.
    #[error("{}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    /// The override file parsed but holds a value that makes no sense.
    #[error("{}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

impl ConfigError {
    /// The override file or directory the error is about.
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Load { path, .. } | ConfigError::Invalid { path, .. } => path,
        }
    }
}

/// Interpreter strategy used to run a directory's tests.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum FormatKind {
    /// RUN lines are executed by the built-in shell interpreter.
    #[default]
    #[serde(rename = "shtest")]
    ShTest,
    /// RUN lines are handed to `/bin/sh -c` after substitution.
    #[serde(rename = "shtest-external")]
    ShTestExternal,
}

/// Where per-test scratch directories are created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(from = "String", into = "String")]
pub enum ExecRoot {
    /// The system temp directory.
    #[default]
    Temp,
    /// `.shlit/<timestamp>/` under the suite source root.
    Local,
    /// A specific directory.
    Path(PathBuf),
}

impl From<String> for ExecRoot {
    fn from(s: String) -> Self {
        match s.as_str() {
            "temp" => ExecRoot::Temp,
            "local" => ExecRoot::Local,
            _ => ExecRoot::Path(PathBuf::from(s)),
        }
    }
}

impl From<ExecRoot> for String {
    fn from(root: ExecRoot) -> String {
        match root {
            ExecRoot::Temp => "temp".to_string(),
            ExecRoot::Local => "local".to_string(),
            ExecRoot::Path(p) => p.display().to_string(),
        }
    }
}

/// Contents of a `lit.yaml` / `lit.toml` override file.
///
/// Every field is optional. Collection fields extend the inherited value
/// unless the matching `clear_*` flag is set, in which case they replace it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    /// Suite name.
    #[serde(default)]
    pub name: Option<String>,

    /// File suffixes (without the dot) that mark a file as a test.
    #[serde(default)]
    pub suffixes: Vec<String>,

    /// Drop inherited suffixes before adding `suffixes`.
    #[serde(default)]
    pub clear_suffixes: bool,

    /// Literal substitutions applied to RUN lines, e.g. `"%cc": "clang"`.
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,

    /// Drop inherited substitutions before adding `substitutions`.
    #[serde(default)]
    pub clear_substitutions: bool,

    /// Environment variables for every command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Drop inherited environment variables before adding `env`.
    #[serde(default)]
    pub clear_env: bool,

    /// Pass the host environment through to commands (default: true).
    #[serde(default)]
    pub inherit_env: Option<bool>,

    /// Directory or file names that are never descended into or run.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Drop inherited exclusions before adding `excludes`.
    #[serde(default)]
    pub clear_excludes: bool,

    /// Per-test timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Interpreter strategy: `shtest` or `shtest-external`.
    #[serde(default)]
    pub format: Option<FormatKind>,

    /// Features available to REQUIRES / UNSUPPORTED / XFAIL.
    #[serde(default)]
    pub features: Vec<String>,

    /// Drop inherited features (including host features) before adding `features`.
    #[serde(default)]
    pub clear_features: bool,

    /// Comment marker that introduces directives (default depends on the suffix).
    #[serde(default)]
    pub comment_marker: Option<String>,

    /// Use the first failing stage's exit code as the pipeline's exit code.
    #[serde(default)]
    pub pipefail: Option<bool>,

    /// Where scratch directories go: "temp", "local", or a path.
    #[serde(default)]
    pub exec_root: Option<ExecRoot>,
}

impl LocalConfig {
    /// Reject values that deserialize fine but cannot be honoured.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name
            && name.trim().is_empty()
        {
            return Err("name must not be empty".to_string());
        }
        if self.suffixes.iter().any(|s| s.trim_start_matches('.').is_empty()) {
            return Err("suffixes must not be empty".to_string());
        }
        if self.substitutions.keys().any(String::is_empty) {
            return Err("substitution keys must not be empty".to_string());
        }
        if let Some(key) = self
            .env
            .keys()
            .find(|k| k.is_empty() || k.contains('='))
        {
            return Err(format!("invalid environment variable name {key:?}"));
        }
        if self.excludes.iter().any(|e| e.is_empty() || e.contains('/')) {
            return Err("excludes must be single path segments".to_string());
        }
        if self.timeout == Some(0) {
            return Err("timeout must be at least 1 second".to_string());
        }
        if let Some(marker) = &self.comment_marker
            && marker.trim().is_empty()
        {
            return Err("comment_marker must not be empty".to_string());
        }
        Ok(())
    }
}

/// Effective configuration of one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub name: String,
    pub suffixes: BTreeSet<String>,
    pub substitutions: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub inherit_env: bool,
    pub excludes: BTreeSet<String>,
    pub timeout: Option<Duration>,
    pub format: FormatKind,
    pub features: BTreeSet<String>,
    pub comment_marker: Option<String>,
    pub pipefail: bool,
    pub source_root: PathBuf,
    pub exec_root: ExecRoot,
}

impl Config {
    /// Built-in defaults for a suite rooted at `source_root`.
    pub fn new(source_root: &Path) -> Self {
        let name = source_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tests".to_string());
        Self {
            name,
            suffixes: BTreeSet::new(),
            substitutions: BTreeMap::new(),
            env: BTreeMap::new(),
            inherit_env: true,
            excludes: BTreeSet::new(),
            timeout: None,
            format: FormatKind::default(),
            features: host_features(),
            comment_marker: None,
            pipefail: false,
            source_root: source_root.to_path_buf(),
            exec_root: ExecRoot::default(),
        }
    }

    /// Merge a directory's overrides over this configuration.
    ///
    /// `dir` is the directory holding the override file; relative
    /// `exec_root` paths are resolved against it.
    pub fn merge(&self, dir: &Path, local: &LocalConfig) -> Config {
        let mut merged = self.clone();

        if let Some(name) = &local.name {
            merged.name = name.clone();
        }

        if local.clear_suffixes {
            merged.suffixes.clear();
        }
        merged.suffixes.extend(
            local
                .suffixes
                .iter()
                .map(|s| s.trim_start_matches('.').to_string()),
        );

        if local.clear_substitutions {
            merged.substitutions.clear();
        }
        merged.substitutions.extend(local.substitutions.clone());

        if local.clear_env {
            merged.env.clear();
        }
        merged.env.extend(local.env.clone());

        if let Some(inherit) = local.inherit_env {
            merged.inherit_env = inherit;
        }

        if local.clear_excludes {
            merged.excludes.clear();
        }
        merged.excludes.extend(local.excludes.iter().cloned());

        if let Some(secs) = local.timeout {
            merged.timeout = Some(Duration::from_secs(secs));
        }

        if let Some(format) = local.format {
            merged.format = format;
        }

        if local.clear_features {
            merged.features.clear();
        }
        merged.features.extend(local.features.iter().cloned());

        if let Some(marker) = &local.comment_marker {
            merged.comment_marker = Some(marker.clone());
        }

        if let Some(pipefail) = local.pipefail {
            merged.pipefail = pipefail;
        }

        if let Some(root) = &local.exec_root {
            merged.exec_root = match root {
                ExecRoot::Path(p) if p.is_relative() => ExecRoot::Path(dir.join(p)),
                other => other.clone(),
            };
        }

        merged
    }

    /// Whether `feature` is available in this configuration.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Whether `path` has one of the configured test suffixes.
    pub fn is_test_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.suffixes.contains(ext))
    }

    /// Comment marker that introduces directives in `path`.
    pub fn comment_marker_for(&self, path: &Path) -> &str {
        self.comment_marker
            .as_deref()
            .unwrap_or_else(|| directive::default_comment_marker(path))
    }

    /// Whether a file or directory name is excluded.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excludes.contains(name)
    }
}

/// Features every configuration starts with.
pub fn host_features() -> BTreeSet<String> {
    let mut features = BTreeSet::new();
    features.insert(std::env::consts::OS.to_string());
    features.insert(std::env::consts::ARCH.to_string());
    if cfg!(unix) {
        features.insert("unix".to_string());
    }
    features
}

/// Resolve the effective configuration of `dir` given its parent's.
pub fn resolve(dir: &Path, parent: &Config) -> Result<Config, ConfigError> {
    let path = match loader::find_local_config(dir) {
        Ok(Some(path)) => path,
        Ok(None) => return Ok(parent.clone()),
        Err(source) => {
            return Err(ConfigError::Load {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let local = loader::load_local_config(&path).map_err(|source| ConfigError::Load {
        path: path.clone(),
        source,
    })?;
    local
        .validate()
        .map_err(|message| ConfigError::Invalid { path, message })?;
    Ok(parent.merge(dir, &local))
}

/// Resolve the configuration of a suite root from the built-in defaults.
pub fn resolve_root(root: &Path) -> Result<Config, ConfigError> {
    resolve(root, &Config::new(root))
}

/// Generate the JSON Schema for override files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(LocalConfig)
}
