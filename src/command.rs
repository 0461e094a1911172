// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command invocation.
//!
//! Everything deskstrap provisions is ultimately done by some other program:
//! apt, the Nix installer, systemctl, Home Manager. This module is the single
//! place where those programs get spawned. Invocations block until the child
//! exits. There are no retries and no timeouts.
//!
//! # Invocation Modes
//!
//! - __Streaming__ through [`CommandRunner::run`]: stdout and stderr are
//!   inherited so the user sees installer output as it happens.
//! - __Probing__ through [`CommandRunner::probe`]: output is discarded and
//!   only success matters, e.g., `command -v nix`.
//! - __Capturing__ through [`CommandRunner::capture`]: stdout is returned for
//!   guards that need to inspect it, e.g., `nix-channel --list`.

use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result as FmtResult},
    process::{Command, ExitStatus, Stdio},
};
use tracing::{debug, instrument};

/// A program, its arguments, and environment variables to overlay on top of
/// the inherited environment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: BTreeMap<OsString, OsString>,
}

impl Invocation {
    /// Construct new invocation of `program` without arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Overlay environment variables.
    pub fn envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Run `script` through `sh -c`.
    pub fn shell(script: impl Into<OsString>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Presence check for `tool` on the search path, through `command -v`.
    pub fn presence_of(tool: impl AsRef<str>) -> Self {
        Self::shell(format!("command -v {}", tool.as_ref()))
    }

    /// Wrap invocation with `sudo`, keeping the environment overlay intact.
    pub fn elevated(self) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 2);
        for (key, value) in &self.env {
            let mut assignment = key.clone();
            assignment.push("=");
            assignment.push(value);
            args.push(assignment);
        }
        args.push(self.program);
        args.extend(self.args);

        Self {
            program: "sudo".into(),
            args,
            env: BTreeMap::new(),
        }
    }

    /// Elevate only if the current process is not already privileged.
    pub fn elevated_unless(self, privileged: bool) -> Self {
        if privileged {
            self
        } else {
            self.elevated()
        }
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        command
    }
}

impl Display for Invocation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.program.to_string_lossy().as_ref())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                write!(fmt, " {arg:?}")?;
            } else {
                write!(fmt, " {arg}")?;
            }
        }

        Ok(())
    }
}

/// Exit status of a finished invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, or `None` if the child was killed by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    /// Outcome of a child that exited with `code`.
    pub fn exited(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Check if child exited with status zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn non-zero exit into [`CommandError::Failed`].
    ///
    /// # Errors
    ///
    /// - Return [`CommandError::Failed`] if exit status was not zero.
    pub fn ensure_success(self, invocation: &Invocation) -> Result<()> {
        if self.success() {
            return Ok(());
        }

        Err(CommandError::Failed {
            command: invocation.to_string(),
            code: self.code,
        })
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Layer of indirection for spawning external programs.
pub trait CommandRunner {
    /// Run invocation while streaming its output to the terminal.
    fn run(&self, invocation: &Invocation) -> Result<ExitOutcome>;

    /// Run invocation silently, reporting only whether it succeeded.
    fn probe(&self, invocation: &Invocation) -> Result<bool>;

    /// Run invocation silently and return its stdout.
    ///
    /// Non-zero exit is an error.
    fn capture(&self, invocation: &Invocation) -> Result<String>;

    /// Run invocation and require it to succeed.
    fn run_checked(&self, invocation: &Invocation) -> Result<()> {
        self.run(invocation)?.ensure_success(invocation)
    }
}

/// Runner backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Construct new system runner.
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip(self, invocation), fields(command = %invocation), level = "debug")]
    fn run(&self, invocation: &Invocation) -> Result<ExitOutcome> {
        debug!("spawn streaming child");
        let status = invocation
            .to_command()
            .spawn()
            .map_err(|err| spawn_error(&invocation.program, err))?
            .wait()
            .map_err(|err| spawn_error(&invocation.program, err))?;

        Ok(status.into())
    }

    #[instrument(skip(self, invocation), fields(command = %invocation), level = "debug")]
    fn probe(&self, invocation: &Invocation) -> Result<bool> {
        let status = invocation
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| spawn_error(&invocation.program, err))?;
        debug!("probe exited with {status}");

        Ok(status.success())
    }

    #[instrument(skip(self, invocation), fields(command = %invocation), level = "debug")]
    fn capture(&self, invocation: &Invocation) -> Result<String> {
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|err| spawn_error(&invocation.program, err))?;
        ExitOutcome::from(output.status).ensure_success(invocation)?;

        Ok(String::from_utf8_lossy(output.stdout.as_slice()).into_owned())
    }
}

fn spawn_error(program: &OsStr, source: std::io::Error) -> CommandError {
    CommandError::Spawn {
        program: program.to_string_lossy().into_owned(),
        source,
    }
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Program could not be started at all.
    #[error("failed to spawn {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Program ran but exited unsuccessfully.
    #[error("command `{command}` failed with {}", describe_code(*code))]
    Failed { command: String, code: Option<i32> },
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "termination by signal".into(),
    }
}

/// Friendly result alias :3
pub type Result<T, E = CommandError> = std::result::Result<T, E>;
