//! External command execution.
//!
//! Every remote or local tool invocation (ssh, rsync, rclone, composer,
//! mysqldump, dig, the panel CLI) goes through a [`CommandRunner`]. The
//! production implementation is [`SystemRunner`]; tests substitute a
//! recording runner with scripted responses.
//!
//! Commands carry a list of secret strings that are replaced with `***`
//! whenever the command line or its output is logged or put into an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

use crate::error::LifecycleError;
use crate::models::EnvironmentConfig;

/// A command to run: program, arguments and optional stdin.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Mark `value` as secret so it never appears in logs or errors.
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value);
        }
        self
    }

    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, s| acc.replace(s.as_str(), "***"))
    }

    /// Full command line as a single string (unredacted).
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redact(&self.command_line()))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redact(&self.command_line()))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout and stderr joined, trimmed; what operators need to see.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, _) => err.to_string(),
            (false, true) => out.to_string(),
            (false, false) => format!("{}\n{}", out, err),
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion. Returns `Err` only if the process could
    /// not be started; a non-zero exit is reported through
    /// [`CommandOutput::status`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = %spec, "exec");

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", spec.program))?;

        if let (Some(bytes), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(bytes).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run `spec` and turn a non-zero exit into [`LifecycleError::ExternalTool`]
/// named after `step`, with the tool's (redacted) output verbatim.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    step: &str,
    spec: &CommandSpec,
) -> Result<CommandOutput> {
    tracing::info!(step, "running");
    let output = runner
        .run(spec)
        .await
        .with_context(|| format!("step '{}' could not start", step))?;
    if !output.success() {
        return Err(
            LifecycleError::external(step, output.status, spec.redact(&output.combined())).into(),
        );
    }
    Ok(output)
}

/// Where an environment's data lives and how to run commands there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Local,
    Remote { user: String, host: String },
}

impl Target {
    /// Local environments run on this machine; everything else over SSH.
    pub fn for_environment(env: &EnvironmentConfig) -> Self {
        if env.environment.is_remote() {
            Target::Remote {
                user: env.ssh_user.clone(),
                host: env.ssh_host.clone(),
            }
        } else {
            Target::Local
        }
    }

    pub fn remote(user: &str, host: &str) -> Self {
        Target::Remote {
            user: user.to_string(),
            host: host.to_string(),
        }
    }

    /// `user@host` for remote targets.
    pub fn destination(&self) -> Option<String> {
        match self {
            Target::Local => None,
            Target::Remote { user, host } => Some(format!("{}@{}", user, host)),
        }
    }

    /// Build a command that runs `script` under bash on this target.
    pub fn shell(&self, script: &str) -> CommandSpec {
        match self {
            Target::Local => CommandSpec::new("bash").args(["-c", script]),
            Target::Remote { .. } => ssh_command(self.destination().unwrap_or_default())
                .arg(format!("bash -c {}", quote(script))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.destination() {
            Some(dest) => f.write_str(&dest),
            None => f.write_str("local"),
        }
    }
}

fn ssh_command(destination: String) -> CommandSpec {
    CommandSpec::new("ssh").args([
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ConnectTimeout=15".to_string(),
        destination,
    ])
}

/// Quote `s` for a POSIX shell.
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
