//! RUN-line tokenizer.
//!
//! Splits a command line into words and operators. Quoting follows POSIX
//! `sh`: single quotes are literal, double quotes honour `\"`, `\\`, `\$`
//! and `` \` ``, and a bare backslash escapes the next character.
//!
//! Substitutions are expanded while lexing, outside single quotes. Each
//! occurrence expands exactly once: the replacement is never scanned for
//! further substitutions, quotes or operators. Unquoted, it is split into
//! words at whitespace (so `%cc` can stand for `cc -O2`); inside double quotes
//! it stays part of the current word. `${NAME}` expands from the shell
//! environment the same way.

use super::ShellError;
use crate::substitute::Substitutions;
use std::collections::BTreeMap;

/// Redirection operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `>`
    Write,
    /// `>>`
    Append,
    /// `<`
    Read,
    /// `>&N`
    Dup,
    /// `&>`: stdout and stderr to the same file.
    WriteBoth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    /// `|`
    Pipe,
    /// `||`
    Or,
    /// `&&`
    And,
    /// `;`
    Semi,
    /// A redirection operator with its file descriptor. The target is the
    /// following word.
    Redirect { fd: u32, op: RedirectOp },
}

/// Tokenize `input`, expanding substitutions and `${NAME}` references.
pub fn tokenize(
    input: &str,
    subst: &Substitutions,
    env: &BTreeMap<String, String>,
) -> Result<Vec<Token>, ShellError> {
    Lexer {
        input,
        pos: 0,
        subst,
        env,
        tokens: Vec::new(),
        word: String::new(),
        in_word: false,
        plain: true,
    }
    .run()
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    subst: &'a Substitutions,
    env: &'a BTreeMap<String, String>,
    tokens: Vec<Token>,
    word: String,
    /// A word has started, even if it is still empty (`""`).
    in_word: bool,
    /// The current word is made of unquoted, unescaped characters only.
    plain: bool,
}

impl Lexer<'_> {
    fn run(mut self) -> Result<Vec<Token>, ShellError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\n' | '\r' => {
                    self.bump();
                    self.finish_word();
                }
                '\'' => {
                    self.bump();
                    self.single_quoted()?;
                }
                '"' => {
                    self.bump();
                    self.double_quoted()?;
                }
                '\\' => {
                    self.bump();
                    let Some(escaped) = self.bump() else {
                        return Err(syntax("line ends with a backslash"));
                    };
                    self.push_quoted(escaped);
                }
                '|' => {
                    self.finish_word();
                    self.bump();
                    let token = if self.eat('|') { Token::Or } else { Token::Pipe };
                    self.tokens.push(token);
                }
                ';' => {
                    self.finish_word();
                    self.bump();
                    self.tokens.push(Token::Semi);
                }
                '&' => {
                    self.finish_word();
                    self.bump();
                    if self.eat('&') {
                        self.tokens.push(Token::And);
                    } else if self.eat('>') {
                        self.tokens.push(Token::Redirect {
                            fd: 1,
                            op: RedirectOp::WriteBoth,
                        });
                    } else {
                        return Err(syntax("background jobs ('&') are not supported"));
                    }
                }
                '>' | '<' => self.redirect()?,
                _ => {
                    if !self.substitute(false)? {
                        self.bump();
                        self.word.push(c);
                        self.in_word = true;
                    }
                }
            }
        }
        self.finish_word();
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn push_quoted(&mut self, c: char) {
        self.word.push(c);
        self.in_word = true;
        self.plain = false;
    }

    fn finish_word(&mut self) {
        if self.in_word {
            self.tokens.push(Token::Word(std::mem::take(&mut self.word)));
        }
        self.in_word = false;
        self.plain = true;
    }

    /// Expand a substitution or `${NAME}` at the current position.
    fn substitute(&mut self, quoted: bool) -> Result<bool, ShellError> {
        let input = self.input;
        let rest = &input[self.pos..];

        if let Some((len, value)) = self.subst.match_at(rest) {
            self.pos += len;
            self.append_expansion(value.to_string(), quoted);
            return Ok(true);
        }

        if let Some(after) = rest.strip_prefix("${") {
            let Some(end) = after.find('}') else {
                return Err(syntax("unterminated '${'"));
            };
            let name = &after[..end];
            if !is_name(name) {
                return Err(syntax(format!("bad substitution '${{{name}}}'")));
            }
            self.pos += 2 + end + 1;
            let value = self.env.get(name).cloned().unwrap_or_default();
            self.append_expansion(value, quoted);
            return Ok(true);
        }

        Ok(false)
    }

    fn append_expansion(&mut self, value: String, quoted: bool) {
        self.plain = false;
        if quoted {
            self.word.push_str(&value);
            return;
        }
        for c in value.chars() {
            if c.is_whitespace() {
                self.finish_word();
                self.plain = false;
            } else {
                self.word.push(c);
                self.in_word = true;
            }
        }
    }

    fn single_quoted(&mut self) -> Result<(), ShellError> {
        self.in_word = true;
        self.plain = false;
        loop {
            match self.bump() {
                Some('\'') => return Ok(()),
                Some(c) => self.word.push(c),
                None => return Err(syntax("unterminated single quote")),
            }
        }
    }

    fn double_quoted(&mut self) -> Result<(), ShellError> {
        self.in_word = true;
        self.plain = false;
        loop {
            let Some(c) = self.peek() else {
                return Err(syntax("unterminated double quote"));
            };
            match c {
                '"' => {
                    self.bump();
                    return Ok(());
                }
                '\\' => {
                    self.bump();
                    match self.bump() {
                        Some(e @ ('"' | '\\' | '$' | '`')) => self.word.push(e),
                        Some(e) => {
                            self.word.push('\\');
                            self.word.push(e);
                        }
                        None => return Err(syntax("unterminated double quote")),
                    }
                }
                _ => {
                    if !self.substitute(true)? {
                        self.bump();
                        self.word.push(c);
                    }
                }
            }
        }
    }

    fn redirect(&mut self) -> Result<(), ShellError> {
        // A plain all-digit word right before the operator is its fd: `2>`.
        let explicit_fd = if self.in_word
            && self.plain
            && !self.word.is_empty()
            && self.word.chars().all(|c| c.is_ascii_digit())
        {
            let fd = self
                .word
                .parse::<u32>()
                .map_err(|_| syntax(format!("bad file descriptor '{}'", self.word)))?;
            self.word.clear();
            self.in_word = false;
            Some(fd)
        } else {
            self.finish_word();
            None
        };

        let token = match self.bump() {
            Some('<') => {
                if self.peek() == Some('&') {
                    return Err(syntax("'<&' redirection is not supported"));
                }
                Token::Redirect {
                    fd: explicit_fd.unwrap_or(0),
                    op: RedirectOp::Read,
                }
            }
            _ => {
                let op = if self.eat('>') {
                    RedirectOp::Append
                } else if self.eat('&') {
                    RedirectOp::Dup
                } else {
                    RedirectOp::Write
                };
                Token::Redirect {
                    fd: explicit_fd.unwrap_or(1),
                    op,
                }
            }
        };
        self.tokens.push(token);
        Ok(())
    }
}

fn syntax(message: impl Into<String>) -> ShellError {
    ShellError::Syntax(message.into())
}

/// Whether `s` is a valid shell variable name.
pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(input: &str) -> Vec<String> {
        lex(input)
            .into_iter()
            .map(|t| match t {
                Token::Word(w) => w,
                other => panic!("unexpected token {other:?}"),
            })
            .collect()
    }

    fn lex(input: &str) -> Vec<Token> {
        tokenize(input, &Substitutions::new(), &BTreeMap::new()).unwrap()
    }

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(words("echo hello   world"), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn double_quotes_group() {
        assert_eq!(words(r#"echo "a b" c"#), vec!["echo", "a b", "c"]);
    }

    #[test]
    fn empty_quotes_are_a_word() {
        assert_eq!(words(r#"echo "" ''"#), vec!["echo", "", ""]);
    }

    #[test]
    fn adjacent_quotes_join() {
        assert_eq!(words(r#"a'b c'"d e"f"#), vec!["ab cd ef"]);
    }

    #[test]
    fn escapes() {
        assert_eq!(words(r"a\ b \| \'"), vec!["a b", "|", "'"]);
        assert_eq!(words(r#""x\"y\\z\n""#), vec![r#"x"y\z\n"#]);
        assert_eq!(words(r"'\n'"), vec![r"\n"]);
    }

    #[test]
    fn single_quotes_suppress_substitution() {
        let mut subst = Substitutions::new();
        subst.insert("$X", "foo");
        let env = BTreeMap::new();
        assert_eq!(
            tokenize("echo 'a $X'", &subst, &env).unwrap(),
            vec![word("echo"), word("a $X")]
        );
        assert_eq!(
            tokenize(r#"echo "a $X""#, &subst, &env).unwrap(),
            vec![word("echo"), word("a foo")]
        );
        assert_eq!(
            tokenize("echo $X", &subst, &env).unwrap(),
            vec![word("echo"), word("foo")]
        );
    }

    #[test]
    fn unquoted_substitution_splits_into_words() {
        let mut subst = Substitutions::new();
        subst.insert("%cc", "cc -O2 -g");
        let tokens = tokenize("%cc x.c", &subst, &BTreeMap::new()).unwrap();
        assert_eq!(tokens, vec![word("cc"), word("-O2"), word("-g"), word("x.c")]);

        let tokens = tokenize("\"%cc\"", &subst, &BTreeMap::new()).unwrap();
        assert_eq!(tokens, vec![word("cc -O2 -g")]);
    }

    #[test]
    fn substitution_is_expanded_once() {
        let mut subst = Substitutions::new();
        subst.insert("%a", "%b 'q' |");
        subst.insert("%b", "oops");
        let tokens = tokenize("echo %a", &subst, &BTreeMap::new()).unwrap();
        assert_eq!(tokens, vec![word("echo"), word("%b"), word("'q'"), word("|")]);
    }

    #[test]
    fn substitution_inside_word() {
        let mut subst = Substitutions::new();
        subst.insert("%t", "/tmp/t");
        let tokens = tokenize("cat %t.out", &subst, &BTreeMap::new()).unwrap();
        assert_eq!(tokens, vec![word("cat"), word("/tmp/t.out")]);
    }

    #[test]
    fn env_references() {
        let env = BTreeMap::from([("NAME".to_string(), "v a l".to_string())]);
        let tokens = tokenize("echo \"${NAME}\" x${MISSING}y", &Substitutions::new(), &env).unwrap();
        assert_eq!(tokens, vec![word("echo"), word("v a l"), word("xy")]);
        let tokens = tokenize("echo ${NAME}", &Substitutions::new(), &env).unwrap();
        assert_eq!(tokens, vec![word("echo"), word("v"), word("a"), word("l")]);
    }

    #[test]
    fn operators() {
        assert_eq!(
            lex("a | b || c && d ; e"),
            vec![
                word("a"),
                Token::Pipe,
                word("b"),
                Token::Or,
                word("c"),
                Token::And,
                word("d"),
                Token::Semi,
                word("e"),
            ]
        );
        assert_eq!(lex("a|b"), vec![word("a"), Token::Pipe, word("b")]);
    }

    #[test]
    fn redirections() {
        assert_eq!(
            lex("cmd >out 2>>err <in 2>&1 &>both"),
            vec![
                word("cmd"),
                Token::Redirect { fd: 1, op: RedirectOp::Write },
                word("out"),
                Token::Redirect { fd: 2, op: RedirectOp::Append },
                word("err"),
                Token::Redirect { fd: 0, op: RedirectOp::Read },
                word("in"),
                Token::Redirect { fd: 2, op: RedirectOp::Dup },
                word("1"),
                Token::Redirect { fd: 1, op: RedirectOp::WriteBoth },
                word("both"),
            ]
        );
    }

    #[test]
    fn quoted_digits_are_not_an_fd() {
        assert_eq!(
            lex("echo '2'>f"),
            vec![
                word("echo"),
                word("2"),
                Token::Redirect { fd: 1, op: RedirectOp::Write },
                word("f"),
            ]
        );
        assert_eq!(
            lex("echo a2>f"),
            vec![
                word("echo"),
                word("a2"),
                Token::Redirect { fd: 1, op: RedirectOp::Write },
                word("f"),
            ]
        );
    }

    #[test]
    fn syntax_errors() {
        let env = BTreeMap::new();
        let subst = Substitutions::new();
        for input in ["echo 'abc", "echo \"abc", "echo abc\\", "sleep 1 &", "echo ${X", "cat <&3"] {
            assert!(
                matches!(tokenize(input, &subst, &env), Err(ShellError::Syntax(_))),
                "{input:?} should be a syntax error"
            );
        }
    }

    #[test]
    fn names() {
        assert!(is_name("FOO_1"));
        assert!(is_name("_x"));
        assert!(!is_name("1x"));
        assert!(!is_name(""));
        assert!(!is_name("a-b"));
    }
}
