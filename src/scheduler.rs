//! Parallel test scheduling.
//!
//! A fixed number of scoped worker threads pull tests from one shared
//! discovery cursor, run them, and record each result exactly once.

use crate::discovery::DiscoveryError;
use crate::runner::{self, RunContext};
use crate::summary::Summary;
use crate::test::{Test, TestResult};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::debug;

/// One worker per available CPU.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Run every test `tests` yields, recording results in `summary`.
///
/// `progress` is called once per result as soon as it is known, from
/// whichever worker produced it.
pub fn run_suite<I>(
    tests: I,
    ctx: &RunContext,
    summary: &Summary,
    progress: &(dyn Fn(&TestResult) + Sync),
) where
    I: Iterator<Item = Result<Test, DiscoveryError>> + Send,
{
    let source = Mutex::new(tests);
    let workers = ctx.options.workers.max(1);
    debug!(workers, "starting workers");

    thread::scope(|s| {
        for _ in 0..workers {
            let source = &source;
            s.spawn(move || {
                loop {
                    let next = source
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .next();
                    let Some(item) = next else {
                        break;
                    };
                    let result = run_one(item, ctx);
                    progress(&result);
                    summary.record(result);
                }
            });
        }
    });
    ctx.remove_empty_run_dirs();
}

fn run_one(item: Result<Test, DiscoveryError>, ctx: &RunContext) -> TestResult {
    let test = match item {
        Ok(test) => test,
        Err(e) => return TestResult::load_failure(&e.path(), e.to_string()),
    };
    if ctx.cancel.is_cancelled() {
        return TestResult::skipped(&test, "run cancelled");
    }
    if let Some(filter) = &ctx.options.filter
        && !test.name.contains(filter.as_str())
    {
        return TestResult::skipped(&test, "filtered out");
    }
    runner::run_test(&test, ctx)
}
