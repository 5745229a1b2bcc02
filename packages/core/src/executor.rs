//! Command execution abstraction with privilege escalation support.
//!
//! Every external tool (losetup, cryptsetup, mount, e2fsprogs) is reached
//! through [`CommandRunner`], so the orchestration code receives its process
//! layer as a collaborator instead of calling `std::process` directly.

use std::process::{Command, Stdio};

use snafu::ResultExt;
use tracing::debug;

use crate::error::{LowLevelError, Result, UnsupportedSnafu};

/// Captured result of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `-1` when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs external programs on behalf of the drive components.
pub trait CommandRunner {
    /// Runs a program to completion, capturing its output.
    ///
    /// A non-zero exit is not an error at this level; only a program that
    /// cannot be started is.
    fn output(&self, program: &str, args: &[&str]) -> Result<ToolOutput>;

    /// Runs a program attached to the caller's terminal.
    ///
    /// Used where the tool prompts the user, e.g. for a LUKS passphrase.
    /// Output is not captured.
    fn interactive(&self, program: &str, args: &[&str]) -> Result<ToolOutput>;

    /// Runs a program and fails with [`LowLevelError::Tool`] on a non-zero exit.
    ///
    /// Returns the captured stdout.
    fn run_checked(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.output(program, args)?;
        if !output.success() {
            return Err(LowLevelError::Tool {
                command: command_line(program, args),
                code: output.code,
                stderr: output.stderr,
            }
            .into());
        }
        Ok(output.stdout)
    }
}

/// Formats a program and its arguments for messages.
pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Privilege escalation method for executing commands that require root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrivilegeEscalation {
    /// Execute directly without privilege escalation.
    #[default]
    None,
    /// Use `pkexec` for GUI-based privilege escalation (polkit).
    Pkexec,
    /// Use `sudo` for TTY-based privilege escalation.
    Sudo,
}

impl PrivilegeEscalation {
    fn wrapper(self) -> Option<&'static str> {
        match self {
            PrivilegeEscalation::None => None,
            PrivilegeEscalation::Pkexec => Some("pkexec"),
            PrivilegeEscalation::Sudo => Some("sudo"),
        }
    }
}

/// Execution context for running system commands.
///
/// This is the production [`CommandRunner`]. It is assembled once at process
/// start and handed to the drive operations.
///
/// # Example
///
/// ```
/// use leitus_core::executor::{ExecutionContext, PrivilegeEscalation};
///
/// // Default: no privilege escalation
/// let ctx = ExecutionContext::default();
/// assert_eq!(ctx.escalation(), PrivilegeEscalation::None);
///
/// // For terminal sessions of a non-root user
/// let tty_ctx = ExecutionContext::with_sudo();
/// assert_eq!(tty_ctx.escalation(), PrivilegeEscalation::Sudo);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    escalation: PrivilegeEscalation,
}

impl ExecutionContext {
    /// Creates a new execution context with no privilege escalation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an execution context that uses `sudo` for every command.
    pub fn with_sudo() -> Self {
        Self {
            escalation: PrivilegeEscalation::Sudo,
        }
    }

    /// Creates an execution context with a specific escalation method.
    pub fn with_escalation(escalation: PrivilegeEscalation) -> Self {
        Self { escalation }
    }

    /// Returns the current privilege escalation method.
    pub fn escalation(&self) -> PrivilegeEscalation {
        self.escalation
    }

    /// Builds the command, wrapped when escalation is configured.
    ///
    /// Returns the command and the name of the program actually spawned.
    fn command(&self, program: &str, args: &[&str]) -> (Command, String) {
        match self.escalation.wrapper() {
            None => {
                let mut command = Command::new(program);
                command.args(args);
                (command, program.to_string())
            }
            Some(wrapper) => {
                let mut command = Command::new(wrapper);
                command.arg(program).args(args);
                (command, wrapper.to_string())
            }
        }
    }
}

impl CommandRunner for ExecutionContext {
    fn output(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        debug!(command = %command_line(program, args), "running");
        let (mut command, spawned) = self.command(program, args);
        let output = command
            .stdin(Stdio::null())
            .output()
            .context(UnsupportedSnafu { tool: spawned })?;

        Ok(ToolOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn interactive(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        debug!(command = %command_line(program, args), "running interactively");
        let (mut command, spawned) = self.command(program, args);
        let status = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .context(UnsupportedSnafu { tool: spawned })?;

        Ok(ToolOutput {
            code: status.code().unwrap_or(-1),
            ..ToolOutput::default()
        })
    }
}
