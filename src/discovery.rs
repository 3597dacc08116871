//! Test discovery.
//!
//! Walks a suite depth-first in file-name order, resolving each directory's
//! configuration from its parent's as it goes. Discovery is lazy: tests are
//! yielded while the walk is still in progress.

use crate::config::{self, Config, ConfigError};
use crate::loader;
use crate::test::Test;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A directory's override file is broken; its subtree is skipped.
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Walk(#[from] walkdir::Error),
}

impl DiscoveryError {
    pub fn path(&self) -> PathBuf {
        match self {
            DiscoveryError::Config(e) => e.path().to_path_buf(),
            DiscoveryError::Walk(e) => e.path().map(Path::to_path_buf).unwrap_or_default(),
        }
    }
}

/// Lazy iterator over the tests under a root.
pub struct Discovery {
    root_config: Arc<Config>,
    walker: walkdir::IntoIter,
    configs: HashMap<PathBuf, Arc<Config>>,
}

impl Discovery {
    /// Discover tests under `root`, whose own configuration is `config`.
    pub fn new(root: &Path, config: Arc<Config>) -> Self {
        Self {
            root_config: config,
            walker: WalkDir::new(root).sort_by_file_name().into_iter(),
            configs: HashMap::new(),
        }
    }

    /// Resolve the configuration of `path` and start discovering.
    ///
    /// `path` may be a directory or a single test file; for a file, the
    /// directory holding it is the suite root.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let root_dir = if path.is_file() {
            match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            }
        } else {
            path
        };
        let config = config::resolve_root(root_dir)?;
        Ok(Self::new(path, Arc::new(config)))
    }

    /// Configuration of `dir` given its parent's, reusing the parent's when
    /// nothing changed.
    fn enter(&mut self, dir: &Path, parent: Arc<Config>) -> Result<(), ConfigError> {
        let resolved = config::resolve(dir, &parent)?;
        let config = if resolved == *parent {
            parent
        } else {
            debug!(dir = %dir.display(), "configuration override");
            Arc::new(resolved)
        };
        self.configs.insert(dir.to_path_buf(), config);
        Ok(())
    }
}

impl Iterator for Discovery {
    type Item = Result<Test, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };
            let path = entry.path();
            let is_dir = entry.file_type().is_dir();

            if entry.depth() == 0 {
                if is_dir {
                    self.configs
                        .insert(path.to_path_buf(), self.root_config.clone());
                } else if self.root_config.is_test_file(path) {
                    return Some(Ok(Test::new(path.to_path_buf(), self.root_config.clone())));
                }
                continue;
            }

            let Some(parent) = path.parent().and_then(|p| self.configs.get(p)).cloned() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') || parent.is_excluded(&name) {
                if is_dir {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if is_dir {
                let dir = path.to_path_buf();
                if let Err(e) = self.enter(&dir, parent) {
                    warn!(error = %e, "skipping directory with a broken configuration");
                    self.walker.skip_current_dir();
                    return Some(Err(e.into()));
                }
                continue;
            }

            if !loader::is_config_file(path) && parent.is_test_file(path) {
                return Some(Ok(Test::new(path.to_path_buf(), parent)));
            }
        }
    }
}
