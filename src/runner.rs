//! Test execution engine.
//!
//! Runs one shell test: parses its directives, decides whether it applies to
//! the configuration, executes its RUN lines in a private scratch directory
//! and computes the outcome.

use crate::cancel::{CancelToken, Watchdog};
use crate::check;
use crate::config::{Config, ExecRoot, FormatKind};
use crate::directive::{self, Directive, DirectiveKind};
use crate::format;
use crate::loader;
use crate::shell::parse::parse_line;
use crate::shell::{ShellError, ShellState};
use crate::substitute::Substitutions;
use crate::test::{CommandLog, Outcome, Test, TestResult};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Options that apply to every test of a run, usually from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of tests run at once.
    pub workers: usize,
    /// Overrides the configured per-test timeout.
    pub timeout: Option<Duration>,
    /// Forces pipefail on for every test.
    pub pipefail: bool,
    /// Keep the scratch directory of failing tests.
    pub keep_on_failure: bool,
    /// Overrides the configured exec root.
    pub exec_root: Option<ExecRoot>,
    /// Only run tests whose name contains this string.
    pub filter: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: crate::scheduler::default_workers(),
            timeout: None,
            pipefail: false,
            keep_on_failure: false,
            exec_root: None,
            filter: None,
        }
    }
}

/// Everything a test needs from the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub options: RunOptions,
    pub cancel: CancelToken,
    /// Timestamp naming the `local` exec root of this run.
    pub run_stamp: String,
    /// `local` run directories created so far.
    run_dirs: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl RunContext {
    pub fn new(options: RunOptions, cancel: CancelToken) -> Self {
        Self {
            options,
            cancel,
            run_stamp: chrono::Local::now().format("%Y%m%d-%H%M%S").to_string(),
            run_dirs: Arc::default(),
        }
    }

    /// Remove the `local` run directories of this run that nothing was kept
    /// in, and `.shlit` itself once it is empty. Call after the last test.
    pub fn remove_empty_run_dirs(&self) {
        let dirs = std::mem::take(
            &mut *self
                .run_dirs
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for dir in dirs {
            if std::fs::remove_dir(&dir).is_err() {
                continue;
            }
            debug!(dir = %dir.display(), "removed empty run directory");
            if let Some(parent) = dir.parent() {
                let _ = std::fs::remove_dir(parent);
            }
        }
    }
}

/// Who executes RUN lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    Internal,
    External,
}

/// How the RUN lines of a test ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Passed,
    /// A command failed or the output did not match.
    Failed(String),
    TimedOut,
    Interrupted,
    /// The test could not be executed as written.
    Broken(String),
}

/// Run a test with the format its configuration selects.
pub fn run_test(test: &Test, ctx: &RunContext) -> TestResult {
    let format = format::for_kind(test.config.format);
    debug!(test = %test.name, format = format.name(), "running");
    format.run_test(test, &test.config, ctx)
}

/// Outcome of a finished run, given whether XFAIL applies.
pub fn decide(status: &RunStatus, xfail: bool) -> Outcome {
    match status {
        RunStatus::TimedOut => Outcome::TimedOut,
        RunStatus::Interrupted => Outcome::Skipped,
        RunStatus::Broken(_) => Outcome::Fail,
        RunStatus::Failed(_) if xfail => Outcome::ExpectedFail,
        RunStatus::Failed(_) => Outcome::Fail,
        RunStatus::Passed if xfail => Outcome::Fail,
        RunStatus::Passed => Outcome::Pass,
    }
}

/// Directives of one test, grouped by kind.
struct Directives<'a> {
    runs: Vec<&'a Directive>,
    checks: Vec<&'a Directive>,
    requires: Vec<&'a str>,
    unsupported: Vec<&'a str>,
    xfail: Vec<&'a str>,
}

impl<'a> Directives<'a> {
    fn group(directives: &'a [Directive]) -> Self {
        let mut grouped = Directives {
            runs: Vec::new(),
            checks: Vec::new(),
            requires: Vec::new(),
            unsupported: Vec::new(),
            xfail: Vec::new(),
        };
        for d in directives {
            match d.kind {
                DirectiveKind::Run => grouped.runs.push(d),
                DirectiveKind::Check => grouped.checks.push(d),
                DirectiveKind::Requires => grouped.requires.extend(directive::feature_list(&d.text)),
                DirectiveKind::Unsupported => {
                    grouped.unsupported.extend(directive::feature_list(&d.text))
                }
                DirectiveKind::Xfail => grouped.xfail.extend(directive::feature_list(&d.text)),
            }
        }
        grouped
    }

    /// Why the test does not apply to `config`, if it doesn't.
    fn unsupported_reason(&self, config: &Config) -> Option<String> {
        if let Some(feature) = self
            .unsupported
            .iter()
            .find(|f| **f == "*" || config.has_feature(f))
        {
            return Some(format!("UNSUPPORTED: {feature}"));
        }
        self.requires
            .iter()
            .find(|f| **f != "*" && !config.has_feature(f))
            .map(|feature| format!("missing required feature '{feature}'"))
    }

    fn expects_failure(&self, config: &Config) -> bool {
        self.xfail.iter().any(|f| *f == "*" || config.has_feature(f))
    }
}

/// Run a shell test.
pub fn run_sh_test(
    test: &Test,
    config: &Config,
    ctx: &RunContext,
    interpreter: Interpreter,
) -> TestResult {
    let start = Instant::now();
    let mut result = TestResult {
        name: test.name.clone(),
        path: test.path.clone(),
        outcome: Outcome::Pass,
        duration: Duration::ZERO,
        failures: Vec::new(),
        commands: Vec::new(),
    };
    let finish = |mut result: TestResult, outcome: Outcome| {
        result.outcome = outcome;
        result.duration = start.elapsed();
        result
    };

    let contents = match loader::read_test_file(&test.path) {
        Ok(contents) => contents,
        Err(e) => {
            result.failures.push(format!("failed to read test: {e}"));
            return finish(result, Outcome::Fail);
        }
    };
    let parsed = match directive::parse(&contents, config.comment_marker_for(&test.path)) {
        Ok(parsed) => parsed,
        Err(e) => {
            result.failures.push(e.to_string());
            return finish(result, Outcome::Fail);
        }
    };
    let directives = Directives::group(&parsed);

    if directives.runs.is_empty() {
        result.failures.push("no RUN lines".to_string());
        return finish(result, Outcome::Unsupported);
    }
    if let Some(reason) = directives.unsupported_reason(config) {
        result.failures.push(reason);
        return finish(result, Outcome::Unsupported);
    }
    let xfail = directives.expects_failure(config);

    let exec_root = ctx.options.exec_root.as_ref().unwrap_or(&config.exec_root);
    let scratch = match create_scratch(exec_root, &config.source_root, ctx) {
        Ok(scratch) => scratch,
        Err(e) => {
            result
                .failures
                .push(format!("failed to create scratch directory: {e}"));
            return finish(result, Outcome::Fail);
        }
    };
    debug!(test = %test.name, scratch = %scratch.path().display(), "scratch directory");

    let mut subst = Substitutions::for_test(&test.path, scratch.path());
    subst.extend(&config.substitutions);
    let mut shell = ShellState::new(
        scratch.path().to_path_buf(),
        shell_env(config),
        ctx.options.pipefail || config.pipefail,
    );
    let watchdog = Watchdog::new(ctx.options.timeout.or(config.timeout), ctx.cancel.clone());

    let status = run_lines(
        &directives,
        &mut shell,
        &subst,
        &watchdog,
        interpreter,
        &mut result.commands,
    );
    let outcome = decide(&status, xfail);
    match &status {
        RunStatus::Passed if xfail => result
            .failures
            .push("unexpectedly passed (XFAIL)".to_string()),
        RunStatus::Passed => {}
        RunStatus::Failed(message) | RunStatus::Broken(message) => {
            result.failures.push(message.clone())
        }
        RunStatus::TimedOut => result.failures.push(match watchdog.timeout() {
            Some(t) => format!("timed out after {:.1?}", t),
            None => "timed out".to_string(),
        }),
        RunStatus::Interrupted => result.failures.push("interrupted".to_string()),
    }

    if ctx.options.keep_on_failure && outcome.is_failure() {
        let kept = scratch.keep();
        result
            .failures
            .push(format!("scratch directory kept at {}", kept.display()));
    } else if let Err(e) = scratch.close() {
        warn!(test = %test.name, error = %e, "failed to remove scratch directory");
    }

    finish(result, outcome)
}

/// Check a test without running it: directives, CHECK patterns and, for
/// the built-in interpreter, the syntax of every RUN line.
///
/// Returns the number of RUN lines.
pub fn validate_test(test: &Test) -> Result<usize, String> {
    let config = &test.config;
    let contents = loader::read_test_file(&test.path).map_err(|e| e.to_string())?;
    let parsed = directive::parse(&contents, config.comment_marker_for(&test.path))
        .map_err(|e| e.to_string())?;
    let directives = Directives::group(&parsed);

    for check in &directives.checks {
        check::compile(&check.text)
            .map_err(|e| format!("line {}: invalid CHECK pattern: {e}", check.line))?;
    }

    if config.format == FormatKind::ShTest {
        let mut subst = Substitutions::for_test(&test.path, &std::env::temp_dir());
        subst.extend(&config.substitutions);
        let env = shell_env(config);
        for run in &directives.runs {
            parse_line(&run.text, &subst, &env).map_err(|e| format!("line {}: {e}", run.line))?;
        }
    }
    Ok(directives.runs.len())
}

fn run_lines(
    directives: &Directives<'_>,
    shell: &mut ShellState,
    subst: &Substitutions,
    watchdog: &Watchdog,
    interpreter: Interpreter,
    log: &mut Vec<CommandLog>,
) -> RunStatus {
    let mut stdout = String::new();

    for run in &directives.runs {
        let executed = match interpreter {
            Interpreter::Internal => shell.run_line(&run.text, subst, watchdog),
            Interpreter::External => shell.run_external(&run.text, subst, watchdog),
        };
        let result = match executed {
            Ok(result) => result,
            Err(ShellError::Interrupted) => return RunStatus::Interrupted,
            Err(e) => return RunStatus::Broken(format!("line {}: {e}", run.line)),
        };

        stdout.push_str(&result.stdout);
        let status = if result.timed_out {
            Some(RunStatus::TimedOut)
        } else if result.exit_code != 0 {
            Some(RunStatus::Failed(format!(
                "line {}: command failed with exit code {}: {}",
                run.line, result.exit_code, result.command
            )))
        } else {
            None
        };
        log.push(CommandLog {
            line: run.line,
            result,
        });
        if let Some(status) = status {
            return status;
        }
    }

    match check::check(&stdout, &directives.checks) {
        Ok(()) => RunStatus::Passed,
        Err(e) => RunStatus::Failed(e.to_string()),
    }
}

/// Environment the commands of a test start with.
fn shell_env(config: &Config) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if config.inherit_env {
        env.extend(
            std::env::vars_os()
                .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned())),
        );
    }
    env.extend(config.env.clone());
    env
}

/// Create a test's scratch directory under the exec root.
fn create_scratch(
    root: &ExecRoot,
    source_root: &Path,
    ctx: &RunContext,
) -> std::io::Result<TempDir> {
    let base: PathBuf = match root {
        ExecRoot::Temp => std::env::temp_dir(),
        ExecRoot::Local => {
            let base = source_root.join(".shlit").join(&ctx.run_stamp);
            ctx.run_dirs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(base.clone());
            base
        }
        ExecRoot::Path(path) => path.clone(),
    };
    std::fs::create_dir_all(&base)?;
    tempfile::Builder::new().prefix("shlit-").tempdir_in(&base)
}
