// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! External command execution.
//!
//! Every interaction with the mixer, Bluetooth stack, network manager,
//! compositor and backlight goes through a [`CommandRunner`]. A run always
//! completes with a [`CommandOutput`]; a missing tool or a failing tool is an
//! exit code, never an error for the caller to handle.

#[cfg(test)]
pub mod scripted;

use futures::future::BoxFuture;
use std::fmt;
use std::io::ErrorKind;
use std::process::Stdio;
use tracing::{debug, trace, warn};

/// Exit code reported when the program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Exit code reported when the process could not be spawned or was killed.
pub const EXIT_ABNORMAL: i32 = -1;

/// Program used for explicitly shell-wrapped pipelines.
const SHELL: &str = "sh";

/// A program and its argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Indices into `args` that are masked when the command is logged.
    secret: Vec<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// An argument that must not appear in logs (passwords).
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// A pipeline run through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(SHELL).arg("-c").arg(script)
    }

    /// Run `primary`, and run `legacy` only when `primary` fails.
    ///
    /// The primary tool's stderr is discarded so a missing structured-output
    /// mode does not leak into the logs on every refresh.
    pub fn fallback(primary: &CommandSpec, legacy: &str) -> Self {
        Self::shell(format!("{} 2>/dev/null || {}", primary.command_line(), legacy))
    }

    /// The command rendered as a shell-safe line.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Renders like [`CommandSpec::command_line`] with secret arguments masked.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_quote(&self.program))?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret.contains(&i) {
                f.write_str(" ***")?;
            } else {
                write!(f, " {}", shell_quote(arg))?;
            }
        }
        Ok(())
    }
}

/// Quote a word for POSIX sh, leaving plain words untouched.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Buffered result of one process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn not_found(program: &str) -> Self {
        Self::failed(EXIT_NOT_FOUND, format!("{}: command not found", program))
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_blank(&self) -> bool {
        self.stdout.trim().is_empty()
    }
}

/// Something that can run external commands.
///
/// Completion is reported exactly once per call through the returned future.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: CommandSpec) -> BoxFuture<'static, CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: CommandSpec) -> BoxFuture<'static, CommandOutput> {
        Box::pin(async move {
            debug!("exec: {}", spec);

            let result = tokio::process::Command::new(&spec.program)
                .args(&spec.args)
                .stdin(Stdio::null())
                .output()
                .await;

            match result {
                Ok(output) => {
                    let out = CommandOutput {
                        exit_code: output.status.code().unwrap_or(EXIT_ABNORMAL),
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    };
                    if !out.success() {
                        debug!(
                            "{} exited with {}: {}",
                            spec.program,
                            out.exit_code,
                            out.stderr.trim()
                        );
                    }
                    trace!("{} produced {} bytes", spec.program, out.stdout.len());
                    out
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("{} not found on PATH", spec.program);
                    CommandOutput::not_found(&spec.program)
                }
                Err(e) => {
                    warn!("Failed to spawn {}: {}", spec.program, e);
                    CommandOutput::failed(EXIT_ABNORMAL, e.to_string())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("pactl"), "pactl");
        assert_eq!(shell_quote("37%"), "37%");
        assert_eq!(shell_quote("alsa_output.pci-0000_00_1f.3"), "alsa_output.pci-0000_00_1f.3");
        assert_eq!(shell_quote("My Phone"), "'My Phone'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_fallback_command_line() {
        let primary = CommandSpec::new("pactl").args(["-f", "json", "list", "sinks"]);
        let spec = CommandSpec::fallback(&primary, "pactl list sinks");
        assert_eq!(spec.program, "sh");
        assert_eq!(
            spec.args,
            vec![
                "-c".to_string(),
                "pactl -f json list sinks 2>/dev/null || pactl list sinks".to_string()
            ]
        );
    }

    #[test]
    fn test_secret_args_are_masked_in_logs() {
        let spec = CommandSpec::new("nmcli")
            .args(["device", "wifi", "connect", "Home"])
            .arg("password")
            .secret_arg("hunter2");
        assert_eq!(spec.to_string(), "nmcli device wifi connect Home password ***");
        assert!(spec.command_line().ends_with("password hunter2"));
    }

    #[tokio::test]
    async fn test_system_runner_captures_stdout() {
        let out = SystemRunner::new()
            .run(CommandSpec::shell("echo hello; exit 3"))
            .await;
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let out = SystemRunner::new()
            .run(CommandSpec::new("shellsync-definitely-not-a-real-tool"))
            .await;
        assert_eq!(out.exit_code, EXIT_NOT_FOUND);
        assert!(out.is_blank());
    }
}
