//! A lit-style shell test runner.
//!
//! Test files carry their own instructions as comment directives
//! (`# RUN:`, `# CHECK:`, `# XFAIL:`, ...). A run discovers tests under a
//! root, resolves each directory's `lit.yaml` / `lit.toml` overrides, runs
//! the tests in parallel in private scratch directories and reports one
//! outcome per test.

pub mod cancel;
pub mod check;
pub mod config;
pub mod directive;
pub mod discovery;
pub mod format;
pub mod loader;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod shell;
pub mod substitute;
pub mod summary;
pub mod test;
