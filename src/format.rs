//! Test formats.
//!
//! A format decides how a discovered file is turned into a [`TestResult`].
//! Both formats here read the same directives; they differ in who runs the
//! RUN lines.

use crate::config::{Config, FormatKind};
use crate::runner::{self, Interpreter, RunContext};
use crate::test::{Test, TestResult};

pub trait TestFormat: Send + Sync {
    fn name(&self) -> &'static str;

    fn run_test(&self, test: &Test, config: &Config, ctx: &RunContext) -> TestResult;
}

/// Shell test: RUN lines are shell commands, CHECK lines match their stdout.
#[derive(Debug, Clone, Copy)]
pub struct ShTest {
    /// Hand RUN lines to `/bin/sh` instead of the built-in interpreter.
    pub external: bool,
}

impl TestFormat for ShTest {
    fn name(&self) -> &'static str {
        if self.external {
            "shtest-external"
        } else {
            "shtest"
        }
    }

    fn run_test(&self, test: &Test, config: &Config, ctx: &RunContext) -> TestResult {
        let interpreter = if self.external {
            Interpreter::External
        } else {
            Interpreter::Internal
        };
        runner::run_sh_test(test, config, ctx, interpreter)
    }
}

static SH_TEST: ShTest = ShTest { external: false };
static SH_TEST_EXTERNAL: ShTest = ShTest { external: true };

/// The format a configuration selects.
pub fn for_kind(kind: FormatKind) -> &'static dyn TestFormat {
    match kind {
        FormatKind::ShTest => &SH_TEST,
        FormatKind::ShTestExternal => &SH_TEST_EXTERNAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_formats() {
        assert_eq!(for_kind(FormatKind::ShTest).name(), "shtest");
        assert_eq!(
            for_kind(FormatKind::ShTestExternal).name(),
            "shtest-external"
        );
    }
}
