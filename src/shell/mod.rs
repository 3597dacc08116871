//! Built-in shell interpreter for RUN lines.
//!
//! A RUN payload goes through three stages: [`lexer::tokenize`] turns text
//! into words and operators, [`parse::parse`] builds a [`Script`], and
//! [`ShellState`] executes it. Only the subset of `sh` needed to run tests
//! portably is supported: pipes, `&&`, `||`, `;`, redirections, quoting,
//! `VAR=value` prefixes and a handful of built-in commands.

pub mod builtins;
pub mod exec;
pub mod lexer;
pub mod parse;

pub use exec::{ExecutionResult, ShellState, StageOutput};
pub use parse::{Command, Connector, Pipeline, Redirect, Script};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a RUN line before it produces an exit code.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The line could not be tokenized or parsed.
    #[error("shell syntax error: {0}")]
    Syntax(String),
    /// An external program could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// A redirection target could not be opened.
    #[error("cannot redirect to '{}': {source}", target.display())]
    Redirect {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The run was cancelled while the line was executing.
    #[error("interrupted")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
