//! Subprocess execution for external toolchains.
//!
//! [`run`] prints the command in copy-pasteable form, captures both output
//! streams, and turns a non-zero exit status or a matched error string into
//! [`ProcessError::Failed`] after showing what went wrong.

use crate::config::ProcessSection;
use colored::Colorize;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("command `{command}` failed: {}", .errors.join(" "))]
    Failed { command: String, errors: Vec<String> },
    #[error("failed to start `{command}`: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("failed to read the output of `{command}`: {source}")]
    Output { command: String, source: io::Error },
    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("empty command")]
    EmptyCommand,
}

/// When captured output is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Buffer everything; print it only if the command fails.
    #[default]
    OnError,
    /// Print stdout lines as they arrive and stderr after exit.
    Realtime,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Working directory; defaults to the configured one, then `.`.
    pub cwd: Option<PathBuf>,
    /// Complete environment. When set, nothing else is consulted.
    pub env: Option<BTreeMap<String, String>>,
    /// Configured defaults for `cwd` and the environment.
    pub config: Option<ProcessSection>,
    /// Start from the configured environment rather than the parent's.
    pub use_config: bool,
    pub add_to_env: BTreeMap<String, String>,
    pub display: DisplayMode,
    /// Fail if this text appears in stdout or stderr.
    pub error_string: Option<String>,
    pub check_return_code: bool,
    /// Run the quoted command line through `/bin/sh -c`.
    pub shell: bool,
    /// Also write a re-runnable script with this file name into `cwd`.
    pub script: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: None,
            config: None,
            use_config: true,
            add_to_env: BTreeMap::new(),
            display: DisplayMode::OnError,
            error_string: None,
            check_return_code: true,
            shell: false,
            script: None,
        }
    }
}

impl RunOptions {
    pub fn with_config(mut self, config: ProcessSection) -> Self {
        self.config = Some(config);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_to_env.insert(key.into(), value.into());
        self
    }

    pub fn display(mut self, display: DisplayMode) -> Self {
        self.display = display;
        self
    }

    pub fn error_string(mut self, needle: impl Into<String>) -> Self {
        self.error_string = Some(needle.into());
        self
    }

    pub fn check_return_code(mut self, check: bool) -> Self {
        self.check_return_code = check;
        self
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn script(mut self, name: impl Into<String>) -> Self {
        self.script = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    pub args: Vec<String>,
    /// `None` if the process was terminated by a signal.
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Quotes one argument for a POSIX shell.
pub fn quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}

/// Joins quoted arguments into one command line.
pub fn quote_command<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Determines the environment a command runs with.
pub fn resolve_env(options: &RunOptions) -> BTreeMap<String, String> {
    if let Some(env) = &options.env {
        return env.clone();
    }
    let mut env: BTreeMap<String, String> = match (&options.config, options.use_config) {
        (Some(config), true) if !config.inherit_env => config.env.clone(),
        (Some(config), true) => std::env::vars().chain(config.env.clone()).collect(),
        _ => std::env::vars().collect(),
    };
    env.extend(options.add_to_env.clone());
    env
}

/// Determines, creates and canonicalises the working directory.
pub fn resolve_cwd(options: &RunOptions) -> Result<PathBuf, ProcessError> {
    let cwd = options
        .cwd
        .clone()
        .or_else(|| options.config.as_ref().and_then(|c| c.cwd.clone()))
        .unwrap_or_else(|| PathBuf::from("."));
    let io_error = |source| ProcessError::Io {
        path: cwd.clone(),
        source,
    };
    std::fs::create_dir_all(&cwd).map_err(io_error)?;
    cwd.canonicalize().map_err(io_error)
}

/// Writes a `/bin/sh` script that re-runs `commands` in a clean environment
/// holding exactly `env`.
pub fn write_script<S: AsRef<str>>(
    commands: &[Vec<S>],
    env: &BTreeMap<String, String>,
    path: &Path,
) -> Result<(), ProcessError> {
    let mut script = String::from(
        "#!/bin/sh\n[ -z \"$CLEANED\" ] && exec /usr/bin/env -i CLEANED=1 /bin/sh \"$0\" \"$@\"\n",
    );
    for (key, value) in env {
        script.push_str(&format!("export {key}={}\n", quote(value)));
    }
    for command in commands {
        script.push_str(&quote_command(command));
        script.push('\n');
    }
    let io_error = |source| ProcessError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(path, script).map_err(io_error)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(io_error)?;
    }
    Ok(())
}

struct Display {
    mode: DisplayMode,
    lines: Vec<String>,
}

impl Display {
    fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            lines: Vec::new(),
        }
    }

    fn print(&mut self, line: &str) {
        let line = line.trim_end();
        match self.mode {
            DisplayMode::Realtime => println!("{line}"),
            DisplayMode::OnError => self.lines.push(line.to_string()),
        }
    }

    fn flush_on_error(&mut self) {
        if self.mode == DisplayMode::OnError {
            for line in self.lines.drain(..) {
                println!("{line}");
            }
        }
    }

    /// Shows `lines` wrapped in `<name>` banners and returns their
    /// concatenation.
    fn stream(&mut self, name: &str, lines: impl Iterator<Item = String>) -> String {
        let mut out = String::new();
        for line in lines {
            if out.is_empty() {
                self.print(&format!("<{name}>").magenta().bold().to_string());
            }
            out.push_str(&line);
            out.push('\n');
            self.print(&line);
        }
        if !out.is_empty() {
            self.print(&format!("</{name}>").magenta().bold().to_string());
        }
        out
    }
}

/// Decodes one raw output line, replacing invalid UTF-8.
fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Runs one command to completion.
pub fn run<S: AsRef<str>>(args: &[S], options: &RunOptions) -> Result<CompletedProcess, ProcessError> {
    let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
    let env = resolve_env(options);
    let cwd = resolve_cwd(options)?;
    if let Some(script) = &options.script {
        write_script(std::slice::from_ref(&args), &env, &cwd.join(script))?;
    }
    execute(args, &env, &cwd, options)
}

/// Runs `commands` in order, stopping at the first failure.
pub fn run_batch<S: AsRef<str>>(
    commands: &[Vec<S>],
    options: &RunOptions,
) -> Result<Vec<CompletedProcess>, ProcessError> {
    let env = resolve_env(options);
    let cwd = resolve_cwd(options)?;
    if let Some(script) = &options.script {
        write_script(commands, &env, &cwd.join(script))?;
    }
    commands
        .iter()
        .map(|command| {
            let args = command.iter().map(|a| a.as_ref().to_string()).collect();
            execute(args, &env, &cwd, options)
        })
        .collect()
}

fn execute(
    args: Vec<String>,
    env: &BTreeMap<String, String>,
    cwd: &Path,
    options: &RunOptions,
) -> Result<CompletedProcess, ProcessError> {
    let command_line = quote_command(&args);
    let mut display = Display::new(options.display);
    display.print(&format!("{}{command_line}", "Running command: ".cyan().bold()));
    log::info!("running `{command_line}` in {}", cwd.display());

    let mut command = if options.shell {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(&command_line);
        command
    } else {
        let (program, rest) = args.split_first().ok_or(ProcessError::EmptyCommand)?;
        let mut command = Command::new(program);
        command.args(rest);
        command
    };
    command
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        command: command_line.clone(),
        source,
    })?;

    // Drain stderr concurrently so a chatty child cannot block on a full pipe.
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf).map(|_| buf)
        })
    });

    let mut read_error = None;
    let stdout = match child.stdout.take() {
        Some(pipe) => {
            let lines = BufReader::new(pipe).split(b'\n').map_while(|line| match line {
                Ok(bytes) => Some(decode_line(&bytes)),
                Err(e) => {
                    read_error.get_or_insert(e);
                    None
                }
            });
            display.stream("STDOUT", lines)
        }
        None => String::new(),
    };
    let stderr_bytes = match stderr_reader.map(|handle| handle.join()) {
        Some(Ok(Ok(bytes))) => bytes,
        Some(Ok(Err(e))) => {
            read_error.get_or_insert(e);
            Vec::new()
        }
        Some(Err(_)) => {
            read_error.get_or_insert(io::Error::other("stderr reader panicked"));
            Vec::new()
        }
        None => Vec::new(),
    };
    let stderr_lines = stderr_bytes
        .split_inclusive(|&b| b == b'\n')
        .map(|line| decode_line(line.strip_suffix(b"\n").unwrap_or(line)));
    let stderr = display.stream("STDERR", stderr_lines);

    let waited = child.wait();
    if let Some(source) = read_error {
        return Err(ProcessError::Output {
            command: command_line,
            source,
        });
    }
    let status = waited.map_err(|source| ProcessError::Spawn {
        command: command_line.clone(),
        source,
    })?;

    let mut errors = Vec::new();
    if options.check_return_code {
        match status.code() {
            Some(0) => {}
            Some(code) => errors.push(format!("Got return code {code}.")),
            None => errors.push("Terminated by a signal.".to_string()),
        }
    }
    if let Some(needle) = &options.error_string {
        if stdout.contains(needle.as_str()) {
            errors.push(format!("Found \"{needle}\" in STDOUT."));
        }
        if stderr.contains(needle.as_str()) {
            errors.push(format!("Found \"{needle}\" in STDERR."));
        }
    }

    if !errors.is_empty() {
        display.flush_on_error();
        println!("{}", format!("Found {} error(s):", errors.len()).red().bold());
        for (k, error) in errors.iter().enumerate() {
            println!("{}", format!("{}) {error}", k + 1).red().bold());
        }
        return Err(ProcessError::Failed {
            command: command_line,
            errors,
        });
    }

    Ok(CompletedProcess {
        args,
        return_code: status.code(),
        stdout,
        stderr,
    })
}
