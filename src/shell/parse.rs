//! Builds a [`Script`] from RUN-line tokens.

use super::ShellError;
use super::lexer::{self, RedirectOp, Token};
use crate::substitute::Substitutions;
use std::collections::BTreeMap;
use std::fmt;

/// How a pipeline is joined to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// `&&`: run only if the previous status is zero.
    And,
    /// `||`: run only if the previous status is non-zero.
    Or,
    /// `;`: always run.
    Seq,
}

/// A full RUN line: pipelines joined by connectors.
///
/// `connectors[i]` joins `pipelines[i]` and `pipelines[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub pipelines: Vec<Pipeline>,
    pub connectors: Vec<Connector>,
}

/// Commands joined by `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

/// One simple command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    /// Leading `NAME=value` assignments, in order.
    pub env: Vec<(String, String)>,
    /// Redirections, in the order they appeared.
    pub redirects: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub fd: u32,
    pub op: RedirectOp,
    /// File path, or the descriptor number for [`RedirectOp::Dup`].
    pub target: String,
}

/// Tokenize and parse one line.
pub fn parse_line(
    input: &str,
    subst: &Substitutions,
    env: &BTreeMap<String, String>,
) -> Result<Script, ShellError> {
    parse(lexer::tokenize(input, subst, env)?)
}

/// Parse a token stream.
pub fn parse(tokens: Vec<Token>) -> Result<Script, ShellError> {
    let mut pipelines = Vec::new();
    let mut connectors = Vec::new();
    let mut commands = Vec::new();
    let mut words = Vec::new();
    let mut redirects = Vec::new();

    let mut tokens = tokens.into_iter();
    while let Some(token) = tokens.next() {
        match token {
            Token::Word(word) => words.push(word),
            Token::Redirect { fd, op } => {
                let Some(Token::Word(target)) = tokens.next() else {
                    return Err(syntax("missing target for redirection"));
                };
                if op == RedirectOp::Dup && target != "1" && target != "2" {
                    return Err(syntax(format!("cannot duplicate file descriptor '{target}'")));
                }
                redirects.push(Redirect { fd, op, target });
            }
            Token::Pipe => {
                commands.push(command(&mut words, &mut redirects)?);
            }
            Token::And | Token::Or | Token::Semi => {
                commands.push(command(&mut words, &mut redirects)?);
                pipelines.push(Pipeline {
                    commands: std::mem::take(&mut commands),
                });
                connectors.push(match token {
                    Token::And => Connector::And,
                    Token::Or => Connector::Or,
                    _ => Connector::Seq,
                });
            }
        }
    }

    if words.is_empty() && redirects.is_empty() && commands.is_empty() {
        // A trailing `;` is allowed; a trailing `&&` or `||` is not.
        match connectors.last() {
            Some(Connector::Seq) => {
                connectors.pop();
            }
            Some(_) => return Err(syntax("line ends with an operator")),
            None => return Err(syntax("empty command")),
        }
    } else {
        commands.push(command(&mut words, &mut redirects)?);
        pipelines.push(Pipeline { commands });
    }

    Ok(Script {
        pipelines,
        connectors,
    })
}

fn command(words: &mut Vec<String>, redirects: &mut Vec<Redirect>) -> Result<Command, ShellError> {
    let mut words = std::mem::take(words).into_iter().peekable();
    let mut env = Vec::new();
    while let Some(word) = words.peek() {
        match word.split_once('=') {
            Some((name, value)) if lexer::is_name(name) => {
                env.push((name.to_string(), value.to_string()));
                words.next();
            }
            _ => break,
        }
    }

    let Some(name) = words.next() else {
        return Err(syntax("empty command"));
    };
    Ok(Command {
        name,
        args: words.collect(),
        env,
        redirects: std::mem::take(redirects),
    })
}

fn syntax(message: impl Into<String>) -> ShellError {
    ShellError::Syntax(message.into())
}

/// Quote `word` for display so the output could be pasted back into a shell.
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+%@".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            RedirectOp::Write => write!(f, "{}>{}", self.fd, quote(&self.target)),
            RedirectOp::Append => write!(f, "{}>>{}", self.fd, quote(&self.target)),
            RedirectOp::Read => write!(f, "{}<{}", self.fd, quote(&self.target)),
            RedirectOp::Dup => write!(f, "{}>&{}", self.fd, self.target),
            RedirectOp::WriteBoth => write!(f, "&>{}", quote(&self.target)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.env {
            write!(f, "{name}={} ", quote(value))?;
        }
        write!(f, "{}", quote(&self.name))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        for redirect in &self.redirects {
            write!(f, " {redirect}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, command) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{command}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pipeline) in self.pipelines.iter().enumerate() {
            if i > 0 {
                let connector = match self.connectors[i - 1] {
                    Connector::And => " && ",
                    Connector::Or => " || ",
                    Connector::Seq => " ; ",
                };
                f.write_str(connector)?;
            }
            write!(f, "{pipeline}")?;
        }
        Ok(())
    }
}
