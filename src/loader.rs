//! Override-file and test-file loader.
//!
//! Reads `lit.yaml` / `lit.toml` override files and test sources from disk.

use crate::config::LocalConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for loading operations.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Failed to read the file.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse YAML.
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Failed to parse TOML.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    /// More than one override file in the same directory.
    #[error("both lit.yaml and lit.toml present (keep one)")]
    Ambiguous,
    /// Unsupported file extension.
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
}

/// Names of the per-directory override files.
pub const CONFIG_FILENAMES: [&str; 2] = ["lit.yaml", "lit.toml"];

/// Whether `path` names an override file.
pub fn is_config_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| CONFIG_FILENAMES.contains(&f))
}

/// Find the override file in `dir`, if any.
pub fn find_local_config(dir: &Path) -> Result<Option<PathBuf>, LoadError> {
    let found: Vec<PathBuf> = CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect();

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.into_iter().next()),
        _ => Err(LoadError::Ambiguous),
    }
}

/// Load an override file.
pub fn load_local_config(path: &Path) -> Result<LocalConfig, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path)?;

    match ext {
        // An empty file is a valid "no overrides" file.
        _ if contents.trim().is_empty() => Ok(LocalConfig::default()),
        "yaml" | "yml" => Ok(serde_yaml::from_str(&contents)?),
        "toml" => Ok(toml::from_str(&contents)?),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Read a test file. Invalid UTF-8 is replaced rather than rejected.
pub fn read_test_file(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormatKind;
    use tempfile::tempdir;

    #[test]
    fn load_valid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lit.yaml");
        std::fs::write(
            &path,
            r#"
name: shtest-shell
suffixes: [txt]
format: shtest
timeout: 10
env:
  MY_VAR: my_value
"#,
        )
        .unwrap();

        let config = load_local_config(&path).unwrap();
        assert_eq!(config.name.as_deref(), Some("shtest-shell"));
        assert_eq!(config.timeout, Some(10));
        assert_eq!(config.env.get("MY_VAR"), Some(&"my_value".to_string()));
    }

    #[test]
    fn load_valid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lit.toml");
        std::fs::write(
            &path,
            r#"
name = "shtest-shell"
suffixes = ["txt"]
format = "shtest-external"

[substitutions]
"%cc" = "cc -O2"
"#,
        )
        .unwrap();

        let config = load_local_config(&path).unwrap();
        assert_eq!(config.format, Some(FormatKind::ShTestExternal));
        assert_eq!(
            config.substitutions.get("%cc"),
            Some(&"cc -O2".to_string())
        );
    }

    #[test]
    fn load_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lit.yaml");
        std::fs::write(&path, "invalid: [yaml: {").unwrap();

        let result = load_local_config(&path);
        assert!(matches!(result, Err(LoadError::Yaml(_))));
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lit.toml");
        std::fs::write(&path, "suffixes = [toml").unwrap();

        let result = load_local_config(&path);
        assert!(matches!(result, Err(LoadError::Toml(_))));
    }

    #[test]
    fn load_empty_file_is_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lit.yaml");
        std::fs::write(&path, "\n").unwrap();

        assert_eq!(load_local_config(&path).unwrap(), LocalConfig::default());
    }

    #[test]
    fn find_none() {
        let dir = tempdir().unwrap();
        assert!(find_local_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn find_both_is_ambiguous() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("lit.yaml"), "").unwrap();
        std::fs::write(dir.path().join("lit.toml"), "").unwrap();
        assert!(matches!(
            find_local_config(dir.path()),
            Err(LoadError::Ambiguous)
        ));
    }

    #[test]
    fn config_file_names() {
        assert!(is_config_file(Path::new("a/lit.yaml")));
        assert!(is_config_file(Path::new("lit.toml")));
        assert!(!is_config_file(Path::new("lit.txt")));
    }

    #[test]
    fn read_test_file_lossy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.txt");
        std::fs::write(&path, b"# RUN: true\n\xff\n").unwrap();
        let text = read_test_file(&path).unwrap();
        assert!(text.starts_with("# RUN: true"));
    }
}
