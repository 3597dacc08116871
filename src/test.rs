//! Tests and their results.

use crate::config::Config;
use crate::shell::ExecutionResult;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A discovered test file and the configuration of its directory.
///
/// A `Test` never changes once discovered. Its outcome, command log and
/// elapsed time are written once, into the [`TestResult`] that running it
/// produces.
#[derive(Debug, Clone)]
pub struct Test {
    pub path: PathBuf,
    /// Path relative to the suite source root, `/`-separated.
    pub name: String,
    pub config: Arc<Config>,
}

impl Test {
    pub fn new(path: PathBuf, config: Arc<Config>) -> Self {
        let name = display_name(&path, &config.source_root);
        Self { path, name, config }
    }
}

fn display_name(path: &Path, root: &Path) -> String {
    let relative = match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel,
        // The root itself is a single test file.
        _ => path.file_name().map(Path::new).unwrap_or(path),
    };
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Final state of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    Pass,
    Fail,
    ExpectedFail,
    Unsupported,
    Skipped,
    TimedOut,
}

impl Outcome {
    pub const ALL: [Outcome; 6] = [
        Outcome::Pass,
        Outcome::Fail,
        Outcome::ExpectedFail,
        Outcome::Unsupported,
        Outcome::Skipped,
        Outcome::TimedOut,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::ExpectedFail => "XFAIL",
            Outcome::Unsupported => "UNSUPPORTED",
            Outcome::Skipped => "SKIPPED",
            Outcome::TimedOut => "TIMEOUT",
        }
    }

    /// Whether this outcome fails the run.
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Fail | Outcome::TimedOut)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// One executed RUN line.
#[derive(Debug, Clone, Serialize)]
pub struct CommandLog {
    /// Line of the RUN directive in the test file.
    pub line: usize,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

/// Result of running a single test.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub name: String,
    pub path: PathBuf,
    pub outcome: Outcome,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    pub failures: Vec<String>,
    pub commands: Vec<CommandLog>,
}

impl TestResult {
    /// A test that never ran.
    pub fn skipped(test: &Test, reason: impl Into<String>) -> Self {
        Self {
            name: test.name.clone(),
            path: test.path.clone(),
            outcome: Outcome::Skipped,
            duration: Duration::ZERO,
            failures: vec![reason.into()],
            commands: Vec::new(),
        }
    }

    /// Synthetic failed result for a directory whose configuration or
    /// listing could not be loaded.
    pub fn load_failure(path: &Path, message: impl Into<String>) -> Self {
        Self {
            name: format!("<load> {}", path.display()),
            path: path.to_path_buf(),
            outcome: Outcome::Fail,
            duration: Duration::ZERO,
            failures: vec![message.into()],
            commands: Vec::new(),
        }
    }
}

pub(crate) fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_relative_to_the_root() {
        let config = Arc::new(Config::new(Path::new("/suite")));
        let test = Test::new(PathBuf::from("/suite/a/b.txt"), config.clone());
        assert_eq!(test.name, "a/b.txt");

        let root_file = Arc::new(Config::new(Path::new("/suite/only.txt")));
        let test = Test::new(PathBuf::from("/suite/only.txt"), root_file);
        assert_eq!(test.name, "only.txt");
    }

    #[test]
    fn failure_outcomes() {
        let failing: Vec<_> = Outcome::ALL
            .into_iter()
            .filter(|o| o.is_failure())
            .collect();
        assert_eq!(failing, vec![Outcome::Fail, Outcome::TimedOut]);
    }

    #[test]
    fn serializes_labels_and_seconds() {
        let result = TestResult {
            name: "t".into(),
            path: PathBuf::from("t"),
            outcome: Outcome::ExpectedFail,
            duration: Duration::from_millis(1500),
            failures: Vec::new(),
            commands: Vec::new(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "XFAIL");
        assert_eq!(json["duration"], 1.5);
    }
}
