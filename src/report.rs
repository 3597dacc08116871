//! Report formatting: human-readable, JSON and JUnit XML.

use crate::summary::SummarySnapshot;
use crate::test::{Outcome, TestResult};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// One-line status for a finished test.
pub fn result_line(result: &TestResult) -> String {
    let mark = match result.outcome {
        Outcome::Pass | Outcome::ExpectedFail => "✓",
        Outcome::Fail | Outcome::TimedOut => "✗",
        Outcome::Unsupported | Outcome::Skipped => "-",
    };
    format!(
        "{mark} {}: {} ({:.2?})",
        result.outcome, result.name, result.duration
    )
}

/// Details of failing tests (of every test when `verbose`), then totals.
pub fn human(snapshot: &SummarySnapshot, verbose: bool) -> String {
    let mut out = String::new();

    for result in &snapshot.results {
        if !verbose && !result.outcome.is_failure() {
            continue;
        }
        let _ = writeln!(out, "\n{}", result_line(result));
        for failure in &result.failures {
            let _ = writeln!(out, "    {failure}");
        }
        if !verbose {
            continue;
        }
        for log in &result.commands {
            let _ = writeln!(
                out,
                "    $ {}    # line {}, exit {}{}",
                log.result.command,
                log.line,
                log.result.exit_code,
                if log.result.timed_out { ", timed out" } else { "" }
            );
            for (label, text) in [("stdout", &log.result.stdout), ("stderr", &log.result.stderr)] {
                if text.is_empty() {
                    continue;
                }
                let _ = writeln!(out, "      {label}:");
                for line in text.lines() {
                    let _ = writeln!(out, "        {line}");
                }
            }
        }
    }

    let counts: Vec<String> = Outcome::ALL
        .into_iter()
        .filter(|o| snapshot.count(*o) > 0)
        .map(|o| format!("{} {}", snapshot.count(o), o.label().to_lowercase()))
        .collect();
    let _ = writeln!(
        out,
        "\n{} tests in {:.2?}: {}",
        snapshot.total,
        snapshot.elapsed,
        if counts.is_empty() {
            "none run".to_string()
        } else {
            counts.join(", ")
        }
    );
    out
}

/// Machine-readable JSON.
pub fn json(snapshot: &SummarySnapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(snapshot)
}

/// JUnit XML, one `<testsuite>` per directory.
pub fn junit(snapshot: &SummarySnapshot, suite_name: &str) -> String {
    let mut groups: BTreeMap<String, Vec<&TestResult>> = BTreeMap::new();
    for result in &snapshot.results {
        let group = match result.name.rsplit_once('/') {
            Some((dir, _)) => format!("{suite_name}/{dir}"),
            None => suite_name.to_string(),
        };
        groups.entry(group).or_default().push(result);
    }

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let failures = snapshot.count(Outcome::Fail) + snapshot.count(Outcome::TimedOut);
    let skipped = snapshot.count(Outcome::Unsupported) + snapshot.count(Outcome::Skipped);
    let _ = writeln!(
        xml,
        "<testsuites name=\"{}\" tests=\"{}\" failures=\"{failures}\" skipped=\"{skipped}\" time=\"{:.3}\">",
        escape_xml(suite_name),
        snapshot.total,
        snapshot.elapsed.as_secs_f64()
    );

    for (name, tests) in &groups {
        let failures = tests.iter().filter(|t| t.outcome.is_failure()).count();
        let skipped = tests
            .iter()
            .filter(|t| matches!(t.outcome, Outcome::Unsupported | Outcome::Skipped))
            .count();
        let time: f64 = tests.iter().map(|t| t.duration.as_secs_f64()).sum();
        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{failures}\" skipped=\"{skipped}\" time=\"{time:.3}\">",
            escape_xml(name),
            tests.len(),
        );

        for test in tests {
            let _ = writeln!(
                xml,
                "    <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\">",
                escape_xml(name),
                escape_xml(&test.name),
                test.duration.as_secs_f64()
            );

            match test.outcome {
                Outcome::Fail | Outcome::TimedOut => {
                    let message = test
                        .failures
                        .first()
                        .map(|s| s.as_str())
                        .unwrap_or("Test failed");
                    let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(message));
                    for failure in &test.failures {
                        let _ = writeln!(xml, "{}", escape_xml(failure));
                    }
                    xml.push_str("      </failure>\n");
                }
                Outcome::Unsupported | Outcome::Skipped => {
                    let message = test.failures.first().map(|s| s.as_str()).unwrap_or("");
                    let _ = writeln!(xml, "      <skipped message=\"{}\"/>", escape_xml(message));
                }
                Outcome::Pass | Outcome::ExpectedFail => {}
            }

            let output: String = test
                .commands
                .iter()
                .map(|log| format!("$ {}\n{}", log.result.command, log.result.stdout))
                .collect();
            if !output.is_empty() {
                let _ = writeln!(xml, "      <system-out>{}</system-out>", escape_xml(&output));
            }

            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::Summary;
    use std::path::PathBuf;
    use std::time::Duration;

    fn result(name: &str, outcome: Outcome, failures: &[&str]) -> TestResult {
        TestResult {
            name: name.to_string(),
            path: PathBuf::from(name),
            outcome,
            duration: Duration::from_millis(5),
            failures: failures.iter().map(|f| f.to_string()).collect(),
            commands: Vec::new(),
        }
    }

    fn snapshot() -> SummarySnapshot {
        let summary = Summary::new();
        summary.record(result("a.txt", Outcome::Pass, &[]));
        summary.record(result("sub/b.txt", Outcome::Fail, &["line 1: <bad> & \"worse\""]));
        summary.record(result("sub/c.txt", Outcome::Unsupported, &["no RUN lines"]));
        summary.snapshot()
    }

    #[test]
    fn human_lists_failures_and_totals() {
        let text = human(&snapshot(), false);
        assert!(text.contains("✗ FAIL: sub/b.txt"));
        assert!(!text.contains("a.txt ("));
        assert!(text.contains("3 tests in"));
        assert!(text.contains("1 pass, 1 fail, 1 unsupported"));
    }

    #[test]
    fn human_verbose_lists_everything() {
        let text = human(&snapshot(), true);
        assert!(text.contains("✓ PASS: a.txt"));
        assert!(text.contains("- UNSUPPORTED: sub/c.txt"));
    }

    #[test]
    fn json_has_counts_and_results() {
        let value: serde_json::Value = serde_json::from_str(&json(&snapshot()).unwrap()).unwrap();
        assert_eq!(value["total"], 3);
        assert_eq!(value["counts"]["FAIL"], 1);
        assert_eq!(value["results"][1]["outcome"], "FAIL");
    }

    #[test]
    fn junit_groups_by_directory() {
        let xml = junit(&snapshot(), "suite");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<testsuites name=\"suite\" tests=\"3\" failures=\"1\" skipped=\"1\""));
        assert!(xml.contains("<testsuite name=\"suite\" tests=\"1\""));
        assert!(xml.contains("<testsuite name=\"suite/sub\" tests=\"2\" failures=\"1\" skipped=\"1\""));
        assert!(xml.contains("<skipped message=\"no RUN lines\"/>"));
        assert!(xml.contains("&lt;bad&gt; &amp; &quot;worse&quot;"));
    }

    #[test]
    fn escapes_xml() {
        assert_eq!(escape_xml("<a href='x'>&</a>"), "&lt;a href=&apos;x&apos;&gt;&amp;&lt;/a&gt;");
    }
}
