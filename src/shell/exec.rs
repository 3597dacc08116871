//! Executes parsed RUN lines.
//!
//! The stages of a pipeline run at the same time, each one's stdout connected
//! to the next one's stdin by a pipe. External programs of one pipeline share
//! a process group so a deadline can kill everything they started. Built-in
//! stages run on their own threads.

use super::ShellError;
use super::builtins::{self, Builtin, BuiltinIo};
use super::lexer::{self, RedirectOp};
use super::parse::{self, Command, Connector, Pipeline, Redirect, Script};
use crate::cancel::Watchdog;
use crate::substitute::Substitutions;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, PipeReader, PipeWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How much of an intermediate stage's stdout is kept for the log.
const PIPE_LOG_LIMIT: usize = 64 * 1024;

/// Exit code of a stage whose reader went away (128 + SIGPIPE).
const BROKEN_PIPE: i32 = 141;

/// Output of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutput {
    pub command: String,
    pub exit_code: i32,
    /// For every stage but the last, at most the first 64 KiB that flowed
    /// into the next stage.
    pub stdout: String,
    pub stderr: String,
}

/// Result of one RUN line.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// The line after substitution.
    pub command: String,
    pub exit_code: i32,
    /// Stdout of every pipeline that was not redirected elsewhere.
    pub stdout: String,
    pub stderr: String,
    #[serde(serialize_with = "crate::test::serialize_duration")]
    pub duration: Duration,
    pub timed_out: bool,
    pub stages: Vec<StageOutput>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Shell state shared by all RUN lines of one test.
///
/// `cd` and `export` change it, and the change is visible to later lines.
#[derive(Debug, Clone)]
pub struct ShellState {
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub pipefail: bool,
}

#[derive(Debug, Default)]
struct PipelineOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
    stages: Vec<StageOutput>,
    timed_out: bool,
}

/// A command with its prefixes and redirections resolved, ready to run.
struct Stage {
    /// Shell text, for the log.
    text: String,
    negate: bool,
    /// Contents of a `<` redirection.
    stdin: Option<Vec<u8>>,
    stdout: Target,
    stderr: Target,
    action: Action,
}

enum Action {
    InProcess(Work),
    External {
        argv: Vec<String>,
        env: BTreeMap<String, String>,
    },
}

/// A stage that runs without spawning a process.
enum Work {
    /// Output known up front: a bare `env` listing or a rejected built-in.
    Output {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        code: i32,
    },
    Builtin {
        name: String,
        builtin: Builtin,
        args: Vec<String>,
    },
}

/// What a stage reads as stdin.
enum Input {
    Null,
    Bytes(Vec<u8>),
    Pipe(PipeReader),
}

/// Where one running stage reads from and writes to.
struct Plumbing {
    input: Input,
    stdout: Target,
    stderr: Target,
    /// Write end of the stage's stdout pipe.
    out: PipeWriter,
    /// Write end of the stage's stderr pipe.
    err: PipeWriter,
}

/// A stage that has been started.
struct Launched<'scope> {
    text: String,
    negate: bool,
    running: Running<'scope>,
    stdout: ScopedJoinHandle<'scope, Vec<u8>>,
    stderr: ScopedJoinHandle<'scope, Vec<u8>>,
}

enum Running<'scope> {
    Child(Child),
    Thread(ScopedJoinHandle<'scope, i32>),
}

impl ShellState {
    pub fn new(cwd: PathBuf, env: BTreeMap<String, String>, pipefail: bool) -> Self {
        Self { cwd, env, pipefail }
    }

    /// Resolve `path` against the working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// Run one line through the built-in interpreter.
    ///
    /// A timeout is not an error: the result comes back with `timed_out`
    /// set and whatever output was produced.
    pub fn run_line(
        &mut self,
        line: &str,
        subst: &Substitutions,
        watchdog: &Watchdog,
    ) -> Result<ExecutionResult, ShellError> {
        let script = parse::parse_line(line, subst, &self.env)?;
        self.run_script(&script, watchdog)
    }

    /// Run one line with `/bin/sh -c` after substitution.
    pub fn run_external(
        &mut self,
        line: &str,
        subst: &Substitutions,
        watchdog: &Watchdog,
    ) -> Result<ExecutionResult, ShellError> {
        if watchdog.interrupted() {
            return Err(ShellError::Interrupted);
        }
        let start = Instant::now();
        let command = subst.apply(line);
        let stage = Stage {
            text: command.clone(),
            negate: false,
            stdin: None,
            stdout: Target::Out,
            stderr: Target::Err,
            action: Action::External {
                argv: vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()],
                env: self.env.clone(),
            },
        };
        let output = self.run_stages(vec![stage], watchdog)?;

        Ok(ExecutionResult {
            command,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration: start.elapsed(),
            timed_out: output.timed_out,
            stages: output.stages,
        })
    }

    pub fn run_script(
        &mut self,
        script: &Script,
        watchdog: &Watchdog,
    ) -> Result<ExecutionResult, ShellError> {
        let start = Instant::now();
        let mut result = ExecutionResult {
            command: script.to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            timed_out: false,
            stages: Vec::new(),
        };

        let mut status = 0;
        for (i, pipeline) in script.pipelines.iter().enumerate() {
            let connector = i
                .checked_sub(1)
                .and_then(|prev| script.connectors.get(prev).copied());
            let run = match connector {
                None | Some(Connector::Seq) => true,
                Some(Connector::And) => status == 0,
                Some(Connector::Or) => status != 0,
            };
            if !run {
                continue;
            }
            if watchdog.interrupted() {
                return Err(ShellError::Interrupted);
            }
            if watchdog.expired() {
                result.timed_out = true;
                break;
            }

            let output = self.run_pipeline(pipeline, watchdog)?;
            status = output.exit_code;
            result.stdout.push_str(&output.stdout);
            result.stderr.push_str(&output.stderr);
            result.stages.extend(output.stages);
            if output.timed_out {
                result.timed_out = true;
                break;
            }
        }

        result.exit_code = status;
        result.duration = start.elapsed();
        Ok(result)
    }

    fn run_pipeline(
        &mut self,
        pipeline: &Pipeline,
        watchdog: &Watchdog,
    ) -> Result<PipelineOutput, ShellError> {
        let in_pipeline = pipeline.commands.len() > 1;
        let mut stages = pipeline
            .commands
            .iter()
            .map(|command| self.prepare(command, in_pipeline))
            .collect::<Result<Vec<_>, _>>()?;

        // A lone built-in runs on this shell so `cd` and `export` stick.
        if let [stage] = stages.as_mut_slice()
            && let Action::InProcess(work) = &stage.action
        {
            let (stdout, stderr, code) = match work {
                Work::Output {
                    stdout,
                    stderr,
                    code,
                } => (stdout.clone(), stderr.clone(), *code),
                Work::Builtin { builtin, args, .. } => {
                    let mut io = BuiltinIo::new(stage.stdin.take());
                    let code = builtin(args.as_slice(), self, &mut io);
                    (io.stdout, io.stderr, code)
                }
            };
            return stage.finish_here(&stdout, &stderr, code);
        }

        if watchdog.interrupted() {
            return Err(ShellError::Interrupted);
        }
        self.run_stages(stages, watchdog)
    }

    /// Resolve `not`/`env` prefixes and redirections of one command.
    fn prepare(&self, command: &Command, in_pipeline: bool) -> Result<Stage, ShellError> {
        let mut argv: Vec<String> = std::iter::once(command.name.clone())
            .chain(command.args.iter().cloned())
            .collect();
        let mut env = self.env.clone();
        env.extend(command.env.iter().cloned());

        let mut negate = false;
        let mut env_prefix = false;
        loop {
            match argv.first().map(String::as_str) {
                Some("not") => {
                    negate = !negate;
                    argv.remove(0);
                }
                Some("env") => {
                    env_prefix = true;
                    argv.remove(0);
                    apply_env_args(&mut argv, &mut env)?;
                }
                _ => break,
            }
        }

        let redirects = Redirections::open(&command.redirects, self)?;
        let action = match argv.first().cloned() {
            None if env_prefix => Action::InProcess(Work::Output {
                stdout: env
                    .iter()
                    .map(|(k, v)| format!("{k}={v}\n"))
                    .collect::<String>()
                    .into_bytes(),
                stderr: Vec::new(),
                code: 0,
            }),
            None => return Err(ShellError::Syntax("'not' needs a command".to_string())),
            Some(name) if in_pipeline && builtins::mutates_state(&name) => {
                Action::InProcess(Work::Output {
                    stdout: Vec::new(),
                    stderr: format!("{name}: cannot be used in a pipeline\n").into_bytes(),
                    code: 1,
                })
            }
            Some(name) => match builtins::lookup(&name) {
                Some(builtin) => Action::InProcess(Work::Builtin {
                    args: argv.split_off(1),
                    name,
                    builtin,
                }),
                None => Action::External { argv, env },
            },
        };

        Ok(Stage {
            text: command.to_string(),
            negate,
            stdin: redirects.stdin,
            stdout: redirects.stdout,
            stderr: redirects.stderr,
            action,
        })
    }

    /// Start every stage, wait for all of them and collect their output.
    fn run_stages(
        &self,
        stages: Vec<Stage>,
        watchdog: &Watchdog,
    ) -> Result<PipelineOutput, ShellError> {
        let count = stages.len();
        thread::scope(|s| {
            let mut launched: Vec<Launched<'_>> = Vec::with_capacity(count);
            let mut group = None;
            let mut previous = None;

            for (i, stage) in stages.into_iter().enumerate() {
                let last = i + 1 == count;
                match self.launch(s, stage, previous.take(), last, &mut group) {
                    Ok((stage, next)) => {
                        launched.push(stage);
                        previous = next;
                    }
                    Err(e) => {
                        if let Some(leader) = group {
                            terminate(&mut children(&mut launched), leader);
                        }
                        return Err(e);
                    }
                }
            }

            let waited = wait_group(&mut children(&mut launched), watchdog)?;

            let mut output = PipelineOutput::default();
            let mut codes = Vec::with_capacity(count);
            for (i, stage) in launched.into_iter().enumerate() {
                let code = match stage.running {
                    Running::Child(mut child) => exit_code(child.wait()?),
                    Running::Thread(handle) => handle.join().unwrap_or(1),
                };
                let code = if stage.negate && waited == Waited::Exited {
                    i32::from(code == 0)
                } else {
                    code
                };
                let stdout = lossy(&stage.stdout.join().unwrap_or_default());
                let stderr = lossy(&stage.stderr.join().unwrap_or_default());
                output.stderr.push_str(&stderr);
                if i + 1 == count {
                    output.stdout.push_str(&stdout);
                }
                codes.push(code);
                output.stages.push(StageOutput {
                    command: stage.text,
                    exit_code: code,
                    stdout,
                    stderr,
                });
            }

            match waited {
                Waited::Interrupted => return Err(ShellError::Interrupted),
                Waited::TimedOut => output.timed_out = true,
                Waited::Exited => {}
            }
            output.exit_code = if self.pipefail {
                codes.iter().copied().find(|code| *code != 0).unwrap_or(0)
            } else {
                codes.last().copied().unwrap_or(0)
            };
            Ok(output)
        })
    }

    /// Start one stage reading from `previous`. Returns the read end of its
    /// stdout for the next stage, unless it is the last one.
    fn launch<'scope>(
        &self,
        s: &'scope Scope<'scope, '_>,
        stage: Stage,
        previous: Option<PipeReader>,
        last: bool,
        group: &mut Option<u32>,
    ) -> Result<(Launched<'scope>, Option<PipeReader>), ShellError> {
        let Stage {
            text,
            negate,
            stdin,
            stdout,
            stderr,
            action,
        } = stage;
        // A `<` redirection wins; dropping the pipe lets the producer see EPIPE.
        let input = match (stdin, previous) {
            (Some(bytes), _) => Input::Bytes(bytes),
            (None, Some(reader)) => Input::Pipe(reader),
            (None, None) => Input::Null,
        };

        let (out_reader, out) = io::pipe()?;
        let (err_reader, err) = io::pipe()?;
        let (stdout_log, next) = if last {
            (s.spawn(move || drain(out_reader)), None)
        } else {
            let (next_reader, next_writer) = io::pipe()?;
            (s.spawn(move || relay(out_reader, next_writer)), Some(next_reader))
        };
        let stderr_log = s.spawn(move || drain(err_reader));

        let plumbing = Plumbing {
            input,
            stdout,
            stderr,
            out,
            err,
        };
        let running = match action {
            Action::External { argv, env } => {
                Running::Child(self.spawn(s, &argv, &env, plumbing, group)?)
            }
            Action::InProcess(work) => {
                let mut state = self.clone();
                Running::Thread(s.spawn(move || run_in_process(work, &mut state, plumbing)))
            }
        };

        Ok((
            Launched {
                text,
                negate,
                running,
                stdout: stdout_log,
                stderr: stderr_log,
            },
            next,
        ))
    }

    /// Spawn an external program into the pipeline's process group, creating
    /// the group if this is the first one.
    fn spawn<'scope>(
        &self,
        s: &'scope Scope<'scope, '_>,
        argv: &[String],
        env: &BTreeMap<String, String>,
        plumbing: Plumbing,
        group: &mut Option<u32>,
    ) -> Result<Child, ShellError> {
        let Some((name, args)) = argv.split_first() else {
            return Err(ShellError::Syntax("empty command".to_string()));
        };
        let program = if name.contains('/') {
            self.resolve(name)
        } else {
            PathBuf::from(name)
        };

        let Plumbing {
            input,
            stdout,
            stderr,
            out,
            err,
        } = plumbing;
        let (stdin, feed) = match input {
            Input::Null => (Stdio::null(), None),
            Input::Bytes(bytes) => (Stdio::piped(), Some(bytes)),
            Input::Pipe(reader) => (Stdio::from(reader), None),
        };

        let mut cmd = std::process::Command::new(&program);
        cmd.args(args)
            .current_dir(&self.cwd)
            .env_clear()
            .envs(env)
            .stdin(stdin)
            .stdout(stdio(&stdout, &out, &err)?)
            .stderr(stdio(&stderr, &out, &err)?);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let pgid = group.and_then(|pid| i32::try_from(pid).ok()).unwrap_or(0);
            cmd.process_group(pgid);
        }

        debug!(program = %name, cwd = %self.cwd.display(), ?group, "spawning");
        let spawned = cmd.spawn();
        // Close our copies of the pipe ends so the readers see EOF.
        drop(cmd);
        drop(out);
        drop(err);
        let mut child = spawned.map_err(|source| ShellError::Spawn {
            program: name.clone(),
            source,
        })?;
        group.get_or_insert(child.id());

        if let (Some(mut pipe), Some(data)) = (child.stdin.take(), feed) {
            s.spawn(move || {
                // EPIPE when the child exits without reading.
                let _ = pipe.write_all(&data);
            });
        }
        Ok(child)
    }
}

impl Stage {
    /// Deliver the output of a stage that ran on the calling thread.
    fn finish_here(
        &mut self,
        stdout: &[u8],
        stderr: &[u8],
        code: i32,
    ) -> Result<PipelineOutput, ShellError> {
        let mut out = Vec::new();
        let mut err = Vec::new();
        sink(&mut self.stdout, &mut out, &mut err).write_all(stdout)?;
        sink(&mut self.stderr, &mut out, &mut err).write_all(stderr)?;

        let exit_code = if self.negate {
            i32::from(code == 0)
        } else {
            code
        };
        let stdout = lossy(&out);
        let stderr = lossy(&err);
        Ok(PipelineOutput {
            exit_code,
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            stages: vec![StageOutput {
                command: self.text.clone(),
                exit_code,
                stdout,
                stderr,
            }],
            timed_out: false,
        })
    }
}

/// Body of a built-in stage running on its own thread.
fn run_in_process(work: Work, state: &mut ShellState, plumbing: Plumbing) -> i32 {
    let Plumbing {
        input,
        stdout: mut out_target,
        stderr: mut err_target,
        mut out,
        mut err,
    } = plumbing;

    let (stdout, stderr, code) = match work {
        Work::Output {
            stdout,
            stderr,
            code,
        } => (stdout, stderr, code),
        Work::Builtin {
            name,
            builtin,
            args,
        } => {
            let streams = name == "cat" && (args.is_empty() || args == ["-"]);
            let stdin = match input {
                // Copied as it arrives, so `cat` works between an endless
                // producer and a consumer that exits early.
                Input::Pipe(mut reader) if streams => {
                    let writer = sink(&mut out_target, &mut out, &mut err);
                    return match io::copy(&mut reader, writer) {
                        Ok(_) => 0,
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => BROKEN_PIPE,
                        Err(_) => 1,
                    };
                }
                Input::Pipe(reader) => Some(drain(reader)),
                Input::Bytes(bytes) => Some(bytes),
                Input::Null => None,
            };
            let mut io = BuiltinIo::new(stdin);
            let code = builtin(args.as_slice(), state, &mut io);
            (io.stdout, io.stderr, code)
        }
    };

    // The reader may have gone away already; that is not this stage's error.
    let _ = sink(&mut out_target, &mut out, &mut err).write_all(&stdout);
    let _ = sink(&mut err_target, &mut out, &mut err).write_all(&stderr);
    code
}

/// Apply `env`'s own arguments (`-i`, `-u NAME`, `NAME=value`) and drop them
/// from `argv`.
fn apply_env_args(
    argv: &mut Vec<String>,
    env: &mut BTreeMap<String, String>,
) -> Result<(), ShellError> {
    while let Some(arg) = argv.first().cloned() {
        if arg == "-i" {
            env.clear();
            argv.remove(0);
        } else if arg == "-u" {
            argv.remove(0);
            if argv.is_empty() {
                return Err(ShellError::Syntax("env: -u needs a variable name".to_string()));
            }
            env.remove(&argv.remove(0));
        } else if let Some((name, value)) = arg.split_once('=')
            && lexer::is_name(name)
        {
            env.insert(name.to_string(), value.to_string());
            argv.remove(0);
        } else {
            break;
        }
    }
    Ok(())
}

/// Where a command's stdout or stderr goes.
#[derive(Debug)]
enum Target {
    /// The stage's stdout: the next stage, or captured for the last one.
    Out,
    /// Captured as the stage's stderr.
    Err,
    File(File),
}

impl Target {
    fn try_clone(&self) -> io::Result<Target> {
        Ok(match self {
            Target::Out => Target::Out,
            Target::Err => Target::Err,
            Target::File(file) => Target::File(file.try_clone()?),
        })
    }
}

struct Redirections {
    stdin: Option<Vec<u8>>,
    stdout: Target,
    stderr: Target,
}

impl Redirections {
    /// Open every redirection in order, so `>f 2>&1` and `2>&1 >f` differ.
    fn open(redirects: &[Redirect], state: &ShellState) -> Result<Self, ShellError> {
        let mut this = Self {
            stdin: None,
            stdout: Target::Out,
            stderr: Target::Err,
        };
        for redirect in redirects {
            match (redirect.op, redirect.fd) {
                (RedirectOp::Read, 0) => {
                    let path = state.resolve(&redirect.target);
                    let bytes = std::fs::read(&path)
                        .map_err(|source| ShellError::Redirect { target: path, source })?;
                    this.stdin = Some(bytes);
                }
                (RedirectOp::Write | RedirectOp::Append, fd @ (1 | 2)) => {
                    let path = state.resolve(&redirect.target);
                    let file = create(path, redirect.op == RedirectOp::Append)?;
                    this.set(fd, Target::File(file));
                }
                (RedirectOp::WriteBoth, _) => {
                    let file = create(state.resolve(&redirect.target), false)?;
                    this.stderr = Target::File(file.try_clone()?);
                    this.stdout = Target::File(file);
                }
                (RedirectOp::Dup, fd @ (1 | 2)) => {
                    let source = if redirect.target == "1" {
                        this.stdout.try_clone()?
                    } else {
                        this.stderr.try_clone()?
                    };
                    this.set(fd, source);
                }
                (_, fd) => {
                    return Err(ShellError::Syntax(format!(
                        "unsupported file descriptor {fd} in '{redirect}'"
                    )));
                }
            }
        }
        Ok(this)
    }

    fn set(&mut self, fd: u32, target: Target) {
        if fd == 1 {
            self.stdout = target;
        } else {
            self.stderr = target;
        }
    }
}

fn create(path: PathBuf, append: bool) -> Result<File, ShellError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(&path)
        .map_err(|source| ShellError::Redirect {
            target: path,
            source,
        })
}

fn stdio(target: &Target, out: &PipeWriter, err: &PipeWriter) -> io::Result<Stdio> {
    Ok(match target {
        Target::Out => out.try_clone()?.into(),
        Target::Err => err.try_clone()?.into(),
        Target::File(file) => file.try_clone()?.into(),
    })
}

/// The writer a built-in's output goes to.
fn sink<'a, W: Write>(
    target: &'a mut Target,
    out: &'a mut W,
    err: &'a mut W,
) -> &'a mut dyn Write {
    match target {
        Target::Out => out,
        Target::Err => err,
        Target::File(file) => file,
    }
}

fn drain(mut reader: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf);
    buf
}

/// Copy one stage's stdout into the next stage's stdin, keeping the start of
/// it for the log. Stops when the next stage stops reading, which closes the
/// producer's pipe and lets it die of SIGPIPE.
fn relay(mut from: PipeReader, mut to: PipeWriter) -> Vec<u8> {
    let mut log = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match from.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        let keep = n.min(PIPE_LOG_LIMIT.saturating_sub(log.len()));
        log.extend_from_slice(&buf[..keep]);
        if to.write_all(&buf[..n]).is_err() {
            break;
        }
    }
    log
}

fn children<'a>(launched: &'a mut [Launched<'_>]) -> Vec<&'a mut Child> {
    launched
        .iter_mut()
        .filter_map(|stage| match &mut stage.running {
            Running::Child(child) => Some(child),
            Running::Thread(_) => None,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waited {
    Exited,
    TimedOut,
    Interrupted,
}

/// Wait for the external stages of a pipeline.
///
/// The first child leads the process group. It is not reaped until the group
/// has been signalled, so its pid cannot be handed to another process while
/// `killpg` may still target it.
fn wait_group(children: &mut [&mut Child], watchdog: &Watchdog) -> Result<Waited, ShellError> {
    let Some(leader) = children.first().map(|child| child.id()) else {
        return Ok(Waited::Exited);
    };
    loop {
        let polled: io::Result<Vec<bool>> = children
            .iter_mut()
            .enumerate()
            .map(|(i, child)| {
                if i == 0 {
                    leader_exited(child)
                } else {
                    child.try_wait().map(|status| status.is_some())
                }
            })
            .collect();
        let running = match polled {
            Ok(exited) => exited.contains(&false),
            Err(e) => {
                terminate(children, leader);
                return Err(e.into());
            }
        };

        if !running {
            // Reap anything the stages left running in the group.
            kill_group(leader);
            return Ok(Waited::Exited);
        }
        if watchdog.expired() {
            debug!(pgid = leader, "deadline reached, killing process group");
            terminate(children, leader);
            return Ok(Waited::TimedOut);
        }
        if watchdog.interrupted() {
            debug!(pgid = leader, "interrupted, killing process group");
            terminate(children, leader);
            return Ok(Waited::Interrupted);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn terminate(children: &mut [&mut Child], leader: u32) {
    kill_group(leader);
    for child in children.iter_mut() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Whether the group leader has exited, leaving it unreaped.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn leader_exited(child: &mut Child) -> io::Result<bool> {
    use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(io::Error::other)?;
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(Pid::from_raw(pid)), flags) {
        Ok(WaitStatus::StillAlive) => Ok(false),
        Ok(_) => Ok(true),
        Err(errno) => Err(errno.into()),
    }
}

/// Without `WNOWAIT` the leader is reaped here, so the final `killpg` can in
/// principle reach a recycled group id.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn leader_exited(child: &mut Child) -> io::Result<bool> {
    Ok(child.try_wait()?.is_some())
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(pgid) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
