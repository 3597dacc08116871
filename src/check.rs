//! CHECK directive matching.
//!
//! Patterns are matched in order against the test's stdout; each one must
//! match somewhere after the end of the previous match. Text inside `{{ }}`
//! is a regular expression, everything else matches literally.

use crate::directive::Directive;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("line {line}: invalid regex in CHECK pattern: {message}")]
    InvalidPattern { line: usize, message: String },
    #[error("line {line}: CHECK: expected string not found in output: {pattern}")]
    NotFound { line: usize, pattern: String },
}

/// Build the regex for one CHECK payload.
pub fn compile(pattern: &str) -> Result<Regex, String> {
    let mut source = String::new();
    let mut rest = pattern;
    while let Some(start) = rest.find("{{") {
        source.push_str(&regex::escape(&rest[..start]));
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err("unterminated '{{'".to_string());
        };
        source.push_str("(?:");
        source.push_str(&after[..end]);
        source.push(')');
        rest = &after[end + 2..];
    }
    source.push_str(&regex::escape(rest));
    Regex::new(&source).map_err(|e| e.to_string())
}

/// Match every CHECK directive against `output` in order.
pub fn check(output: &str, checks: &[&Directive]) -> Result<(), CheckError> {
    let mut pos = 0;
    for check in checks {
        let regex = compile(&check.text).map_err(|message| CheckError::InvalidPattern {
            line: check.line,
            message,
        })?;
        match regex.find_at(output, pos) {
            Some(m) => pos = m.end(),
            None => {
                return Err(CheckError::NotFound {
                    line: check.line,
                    pattern: check.text.clone(),
                });
            }
        }
    }
    Ok(())
}
