//! Directive parser.
//!
//! Directives are comment lines of the form `<marker> KEYWORD: payload`,
//! for example `# RUN: echo hi | cat`. A payload ending in `\` continues on
//! the next line.

use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// The kinds of directive a test file may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DirectiveKind {
    Run,
    Check,
    Xfail,
    Requires,
    Unsupported,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 5] = [
        DirectiveKind::Run,
        DirectiveKind::Check,
        DirectiveKind::Xfail,
        DirectiveKind::Requires,
        DirectiveKind::Unsupported,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            DirectiveKind::Run => "RUN",
            DirectiveKind::Check => "CHECK",
            DirectiveKind::Xfail => "XFAIL",
            DirectiveKind::Requires => "REQUIRES",
            DirectiveKind::Unsupported => "UNSUPPORTED",
        }
    }
}

/// One parsed directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// Payload with continuations joined.
    pub text: String,
    /// 1-based line of the directive's first line.
    pub line: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: {keyword} directive continues past the end of the file")]
    UnterminatedContinuation { line: usize, keyword: &'static str },
    #[error("line {line}: empty {keyword} directive")]
    Empty { line: usize, keyword: &'static str },
}

/// Parse every directive in `contents`.
pub fn parse(contents: &str, comment_marker: &str) -> Result<Vec<Directive>, ParseError> {
    let lines: Vec<&str> = contents.lines().collect();
    let mut directives = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some((kind, payload)) = match_directive(lines[i], comment_marker) else {
            i += 1;
            continue;
        };
        let line = i + 1;
        let mut text = payload.trim().to_string();

        while let Some(head) = text.strip_suffix('\\') {
            let head = head.trim_end().to_string();
            i += 1;
            let Some(next) = lines.get(i) else {
                return Err(ParseError::UnterminatedContinuation {
                    line,
                    keyword: kind.keyword(),
                });
            };
            let tail = continuation(next, comment_marker, kind);
            text = match (head.is_empty(), tail.is_empty()) {
                (true, _) => tail.to_string(),
                (false, true) => head,
                (false, false) => format!("{head} {tail}"),
            };
        }

        if text.is_empty() {
            return Err(ParseError::Empty {
                line,
                keyword: kind.keyword(),
            });
        }

        directives.push(Directive { kind, text, line });
        i += 1;
    }

    Ok(directives)
}

fn match_directive<'a>(line: &'a str, marker: &str) -> Option<(DirectiveKind, &'a str)> {
    let rest = line.trim_start().strip_prefix(marker)?.trim_start();
    DirectiveKind::ALL.into_iter().find_map(|kind| {
        rest.strip_prefix(kind.keyword())
            .and_then(|r| r.strip_prefix(':'))
            .map(|payload| (kind, payload))
    })
}

/// Text a continuation line contributes: the marker and a repeated keyword
/// are dropped when present.
fn continuation<'a>(line: &'a str, marker: &str, kind: DirectiveKind) -> &'a str {
    let mut rest = line.trim_start();
    if let Some(r) = rest.strip_prefix(marker) {
        rest = r.trim_start();
    }
    if let Some(r) = rest
        .strip_prefix(kind.keyword())
        .and_then(|r| r.strip_prefix(':'))
    {
        rest = r;
    }
    rest.trim()
}

/// Comment marker conventionally used by files with this suffix.
pub fn default_comment_marker(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "c" | "h" | "cc" | "cpp" | "hpp" | "cxx" | "m" | "mm" | "rs" | "php" | "js" | "ts"
        | "go" | "java" | "swift" | "kt" | "scala" => "//",
        "ll" | "s" | "asm" => ";",
        "sql" | "lua" | "hs" => "--",
        _ => "#",
    }
}

/// Split a feature list payload (`a, b,c`) into names.
pub fn feature_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|f| !f.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(directives: &[Directive]) -> Vec<DirectiveKind> {
        directives.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn parses_every_keyword() {
        let src = "\
# RUN: echo hi
# CHECK: hi
# XFAIL: *
# REQUIRES: shell
# UNSUPPORTED: windows
";
        let directives = parse(src, "#").unwrap();
        assert_eq!(kinds(&directives), DirectiveKind::ALL.to_vec());
        assert_eq!(directives[0].text, "echo hi");
        assert_eq!(directives[0].line, 1);
        assert_eq!(directives[4].line, 5);
    }

    #[test]
    fn ignores_unknown_keywords_and_plain_lines() {
        let src = "\
#!/bin/sh
# NOTE: not a directive
# CHECK-NOT: also ignored
echo RUN: not a comment
  # RUN: indented is fine
";
        let directives = parse(src, "#").unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].text, "indented is fine");
        assert_eq!(directives[0].line, 5);
    }

    #[test]
    fn joins_continuations() {
        let src = "\
// RUN: echo one \\
// RUN:   two \\
//        three
// RUN: echo four
";
        let directives = parse(src, "//").unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].text, "echo one two three");
        assert_eq!(directives[0].line, 1);
        assert_eq!(directives[1].text, "echo four");
        assert_eq!(directives[1].line, 4);
    }

    #[test]
    fn continuation_at_eof_is_an_error() {
        let err = parse("# RUN: echo \\", "#").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnterminatedContinuation {
                line: 1,
                keyword: "RUN"
            }
        );
    }

    #[test]
    fn empty_payload_is_an_error() {
        let err = parse("# RUN:   \n", "#").unwrap_err();
        assert!(matches!(err, ParseError::Empty { line: 1, .. }));
    }

    #[test]
    fn marker_must_match() {
        let directives = parse("// RUN: true\n# RUN: false\n", "#").unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].text, "false");
    }

    #[test]
    fn no_directives() {
        assert!(parse("just text\n", "#").unwrap().is_empty());
    }

    #[test]
    fn markers_by_suffix() {
        assert_eq!(default_comment_marker(Path::new("a.c")), "//");
        assert_eq!(default_comment_marker(Path::new("a.ll")), ";");
        assert_eq!(default_comment_marker(Path::new("a.txt")), "#");
    }

    #[test]
    fn features_split_on_commas() {
        let features: Vec<_> = feature_list(" a, b ,,c ").collect();
        assert_eq!(features, vec!["a", "b", "c"]);
    }
}
