//! Commands the interpreter runs in-process.
//!
//! Each built-in reads its input from [`BuiltinIo::stdin`], writes to the
//! captured `stdout`/`stderr` buffers and returns an exit code. Usage errors
//! are reported on stderr with a non-zero exit code; they never abort the
//! test on their own.

use super::ShellState;
use similar::{Algorithm, DiffTag};
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Buffers a built-in reads from and writes to.
#[derive(Debug, Default)]
pub struct BuiltinIo {
    pub stdin: Option<Vec<u8>>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl BuiltinIo {
    pub fn new(stdin: Option<Vec<u8>>) -> Self {
        Self {
            stdin,
            ..Self::default()
        }
    }

    fn print(&mut self, text: &str) {
        self.stdout.extend_from_slice(text.as_bytes());
    }

    fn error(&mut self, name: &str, message: impl Display) -> i32 {
        self.stderr
            .extend_from_slice(format!("{name}: {message}\n").as_bytes());
        1
    }
}

pub type Builtin = fn(&[String], &mut ShellState, &mut BuiltinIo) -> i32;

/// Look up a built-in by name.
pub fn lookup(name: &str) -> Option<Builtin> {
    let builtin: Builtin = match name {
        "echo" => echo,
        "true" | ":" => succeed,
        "false" => fail,
        "cd" => cd,
        "mkdir" => mkdir,
        "rm" => rm,
        "mv" => mv,
        "cp" => cp,
        "diff" => diff,
        "cat" => cat,
        "export" => export,
        "touch" => touch,
        _ => return None,
    };
    Some(builtin)
}

/// Built-ins that change shell state and so cannot run inside a pipeline.
pub fn mutates_state(name: &str) -> bool {
    matches!(name, "cd" | "export")
}

/// Split leading single-letter flags (`-rf`) from operands.
///
/// Stops at `--` or the first operand. Returns the offending flag if one is
/// not in `allowed`.
fn flags<'a>(args: &'a [String], allowed: &str) -> Result<(Vec<char>, &'a [String]), char> {
    let mut found = Vec::new();
    let mut i = 0;
    while let Some(arg) = args.get(i) {
        if arg == "--" {
            i += 1;
            break;
        }
        let Some(letters) = arg.strip_prefix('-') else {
            break;
        };
        if letters.is_empty() {
            break;
        }
        for c in letters.chars() {
            if !allowed.contains(c) {
                return Err(c);
            }
            found.push(c);
        }
        i += 1;
    }
    Ok((found, &args[i..]))
}

fn succeed(_: &[String], _: &mut ShellState, _: &mut BuiltinIo) -> i32 {
    0
}

fn fail(_: &[String], _: &mut ShellState, _: &mut BuiltinIo) -> i32 {
    1
}

fn echo(args: &[String], _: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    let mut newline = true;
    let mut escapes = false;
    let mut rest = args;
    while let Some((first, tail)) = rest.split_first() {
        let Some(letters) = first.strip_prefix('-') else {
            break;
        };
        if letters.is_empty() || !letters.chars().all(|c| c == 'n' || c == 'e') {
            break;
        }
        newline &= !letters.contains('n');
        escapes |= letters.contains('e');
        rest = tail;
    }

    let mut text = rest.join(" ");
    if escapes {
        let (expanded, stop) = expand_escapes(&text);
        text = expanded;
        if stop {
            newline = false;
        }
    }
    if newline {
        text.push('\n');
    }
    io.print(&text);
    0
}

/// Expand `echo -e` escapes. The flag is set when `\c` cut the output short.
fn expand_escapes(text: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('e') => out.push('\x1b'),
            Some('\\') => out.push('\\'),
            Some('c') => return (out, true),
            Some('0') => {
                let mut value = 0u32;
                for _ in 0..3 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.extend(char::from_u32(value));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    (out, false)
}

fn cd(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    let [dir] = args else {
        return io.error("cd", "expected exactly one directory");
    };
    let path = state.resolve(dir);
    if !path.is_dir() {
        return io.error("cd", format_args!("{dir}: not a directory"));
    }
    state.cwd = path;
    0
}

fn mkdir(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    let (flags, paths) = match flags(args, "p") {
        Ok(parsed) => parsed,
        Err(flag) => return io.error("mkdir", format_args!("unsupported option -{flag}")),
    };
    if paths.is_empty() {
        return io.error("mkdir", "missing operand");
    }
    let parents = flags.contains(&'p');

    let mut status = 0;
    for path in paths {
        let target = state.resolve(path);
        let result = if parents {
            fs::create_dir_all(&target)
        } else {
            fs::create_dir(&target)
        };
        if let Err(e) = result {
            status = io.error("mkdir", format_args!("{path}: {e}"));
        }
    }
    status
}

fn rm(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    let (flags, paths) = match flags(args, "rRf") {
        Ok(parsed) => parsed,
        Err(flag) => return io.error("rm", format_args!("unsupported option -{flag}")),
    };
    let recursive = flags.iter().any(|f| *f == 'r' || *f == 'R');
    let force = flags.contains(&'f');
    if paths.is_empty() && !force {
        return io.error("rm", "missing operand");
    }

    let mut status = 0;
    for path in paths {
        let target = state.resolve(path);
        let meta = match fs::symlink_metadata(&target) {
            Ok(meta) => meta,
            Err(_) if force => continue,
            Err(e) => {
                status = io.error("rm", format_args!("{path}: {e}"));
                continue;
            }
        };
        let result = if meta.is_dir() {
            if !recursive {
                status = io.error("rm", format_args!("{path}: is a directory"));
                continue;
            }
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        };
        if let Err(e) = result {
            status = io.error("rm", format_args!("{path}: {e}"));
        }
    }
    status
}

/// Where `source` lands when copied or moved to `dest`.
fn destination(source: &Path, dest: &Path) -> PathBuf {
    match source.file_name() {
        Some(name) if dest.is_dir() => dest.join(name),
        _ => dest.to_path_buf(),
    }
}

fn mv(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    let Some((dest, sources)) = args.split_last().filter(|(_, s)| !s.is_empty()) else {
        return io.error("mv", "expected a source and a destination");
    };
    let dest_path = state.resolve(dest);
    if sources.len() > 1 && !dest_path.is_dir() {
        return io.error("mv", format_args!("{dest}: not a directory"));
    }

    let mut status = 0;
    for source in sources {
        let from = state.resolve(source);
        if let Err(e) = fs::rename(&from, destination(&from, &dest_path)) {
            status = io.error("mv", format_args!("{source}: {e}"));
        }
    }
    status
}

fn cp(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    let (flags, operands) = match flags(args, "rR") {
        Ok(parsed) => parsed,
        Err(flag) => return io.error("cp", format_args!("unsupported option -{flag}")),
    };
    let recursive = !flags.is_empty();
    let Some((dest, sources)) = operands.split_last().filter(|(_, s)| !s.is_empty()) else {
        return io.error("cp", "expected a source and a destination");
    };
    let dest_path = state.resolve(dest);
    if sources.len() > 1 && !dest_path.is_dir() {
        return io.error("cp", format_args!("{dest}: not a directory"));
    }

    let mut status = 0;
    for source in sources {
        let from = state.resolve(source);
        let to = destination(&from, &dest_path);
        let result = if from.is_dir() {
            if !recursive {
                status = io.error("cp", format_args!("{source}: is a directory (use -r)"));
                continue;
            }
            copy_tree(&from, &to)
        } else {
            fs::copy(&from, &to).map(|_| ())
        };
        if let Err(e) = result {
            status = io.error("cp", format_args!("{source}: {e}"));
        }
    }
    status
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn cat(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    let stdin_only = [String::from("-")];
    let files = if args.is_empty() { &stdin_only[..] } else { args };

    let mut status = 0;
    for file in files {
        if file == "-" {
            let input = io.stdin.take().unwrap_or_default();
            io.stdout.extend_from_slice(&input);
            continue;
        }
        match fs::read(state.resolve(file)) {
            Ok(bytes) => io.stdout.extend_from_slice(&bytes),
            Err(e) => status = io.error("cat", format_args!("{file}: {e}")),
        }
    }
    status
}

fn export(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    if args.is_empty() {
        let listing: String = state
            .env
            .iter()
            .map(|(k, v)| format!("export {k}={}\n", super::parse::quote(v)))
            .collect();
        io.print(&listing);
        return 0;
    }

    let mut status = 0;
    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (arg.as_str(), None),
        };
        if !super::lexer::is_name(name) {
            status = io.error("export", format_args!("'{arg}': not a valid identifier"));
            continue;
        }
        if let Some(value) = value {
            state.env.insert(name.to_string(), value.to_string());
        }
    }
    status
}

fn touch(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    if args.is_empty() {
        return io.error("touch", "missing operand");
    }
    let mut status = 0;
    for path in args {
        let target = state.resolve(path);
        if target.is_dir() {
            continue;
        }
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .and_then(|file| file.set_modified(SystemTime::now()));
        if let Err(e) = result {
            status = io.error("touch", format_args!("{path}: {e}"));
        }
    }
    status
}

#[derive(Debug, Default, Clone, Copy)]
struct DiffOptions {
    ignore_space_change: bool,
    ignore_all_space: bool,
    strip_trailing_cr: bool,
}

impl DiffOptions {
    fn normalize<'a>(&self, line: &'a str) -> std::borrow::Cow<'a, str> {
        let mut line = line;
        if self.strip_trailing_cr {
            line = line.strip_suffix('\r').unwrap_or(line);
        }
        if self.ignore_all_space {
            line.chars().filter(|c| !c.is_whitespace()).collect::<String>().into()
        } else if self.ignore_space_change {
            line.split_whitespace().collect::<Vec<_>>().join(" ").into()
        } else {
            line.into()
        }
    }
}

fn diff(args: &[String], state: &mut ShellState, io: &mut BuiltinIo) -> i32 {
    let mut options = DiffOptions::default();
    let mut files = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-u" => {}
            "-b" => options.ignore_space_change = true,
            "-w" => options.ignore_all_space = true,
            "--strip-trailing-cr" => options.strip_trailing_cr = true,
            flag if flag.starts_with('-') && flag != "-" => {
                io.error("diff", format_args!("unsupported option {flag}"));
                return 2;
            }
            file => files.push(file),
        }
    }
    let &[old_name, new_name] = files.as_slice() else {
        io.error("diff", "expected exactly two files");
        return 2;
    };

    let mut read = |name: &str| -> io::Result<String> {
        let bytes = if name == "-" {
            io.stdin.take().unwrap_or_default()
        } else {
            fs::read(state.resolve(name))?
        };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    };
    let (old, new) = match (read(old_name), read(new_name)) {
        (Ok(old), Ok(new)) => (old, new),
        (Err(e), _) | (_, Err(e)) => {
            io.error("diff", e);
            return 2;
        }
    };

    let old_lines = split_lines(&old);
    let new_lines = split_lines(&new);
    let old_keys: Vec<_> = old_lines.iter().map(|l| options.normalize(l)).collect();
    let new_keys: Vec<_> = new_lines.iter().map(|l| options.normalize(l)).collect();

    let ops = similar::capture_diff_slices(Algorithm::Myers, &old_keys, &new_keys);
    if ops.iter().all(|op| op.tag() == DiffTag::Equal) {
        return 0;
    }

    let mut out = format!("--- {old_name}\n+++ {new_name}\n");
    for group in similar::group_diff_ops(ops, 3) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            hunk_range(&old_range),
            hunk_range(&new_range)
        ));
        for op in &group {
            let (tag, old_ops, new_ops) = op.as_tag_tuple();
            if matches!(tag, DiffTag::Equal) {
                for line in &old_lines[old_ops] {
                    out.push_str(&format!(" {line}\n"));
                }
                continue;
            }
            for line in &old_lines[old_ops] {
                out.push_str(&format!("-{line}\n"));
            }
            for line in &new_lines[new_ops] {
                out.push_str(&format!("+{line}\n"));
            }
        }
    }
    io.print(&out);
    1
}

/// Lines without their `\n`. A `\r` before it is kept.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n')
        .map(|line| line.strip_suffix('\n').unwrap_or(line))
        .collect()
}

/// Unified-diff range: 1-based start, with the length omitted when it is 1.
fn hunk_range(range: &std::ops::Range<usize>) -> String {
    match range.len() {
        0 => format!("{},0", range.start),
        1 => format!("{}", range.start + 1),
        len => format!("{},{len}", range.start + 1),
    }
}
