// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command runner
//!
//! Every external tool invocation (package manager, service manager,
//! `psql`, `radtest`) goes through the narrow [`CommandRunner`] interface so
//! the orchestrator can be driven by a scripted fake in tests.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{ProvisionError, Result};

/// How much captured output is echoed to the operator
pub const ECHO_LIMIT: usize = 200;

/// Whether a failing step aborts the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tolerance {
    /// Failure halts the whole run
    Fatal,
    /// Failure is logged as a warning and the run continues
    Tolerant,
}

impl Tolerance {
    pub fn is_tolerant(self) -> bool {
        self == Tolerance::Tolerant
    }
}

/// A single external program invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Program to execute
    pub program: String,

    /// Arguments, passed without a shell
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment; may carry credentials, so never serialized or logged
    #[serde(skip)]
    pub env: Vec<(String, String)>,
}

impl Operation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Run `program` as another OS user via `sudo -u`.
    pub fn as_user(user: &str, program: impl Into<String>) -> Self {
        Self::new("sudo").arg("-u").arg(user).arg(program)
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for logs and dry runs (environment omitted).
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_for_display)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn quote_for_display(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Outcome of one external invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit status (-1 when terminated by a signal or never started)
    pub status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Set when a tolerant step failed and the run continued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ExecutionResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            warning: None,
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
            warning: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == 0
    }

    /// Best error text for the operator: stderr, else stdout.
    pub fn error_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Executes external operations synchronously from the caller's view.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one operation to completion and capture its output.
    ///
    /// A non-zero exit is a normal result; `Err` means the program could not
    /// be started at all.
    async fn run(&self, operation: &Operation) -> Result<ExecutionResult>;
}

/// Runs operations as real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, operation: &Operation) -> Result<ExecutionResult> {
        let mut command = Command::new(&operation.program);
        command.args(&operation.args);

        for (key, value) in &operation.env {
            command.env(key, value);
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        // No timeout: a hung tool hangs the run.
        let output = command
            .output()
            .await
            .map_err(|source| ProvisionError::Spawn {
                program: operation.program.clone(),
                source,
            })?;

        Ok(ExecutionResult {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            warning: None,
        })
    }
}

/// Run one step and classify its outcome.
///
/// Fatal failures come back as [`ProvisionError::StepFailed`] (or
/// [`ProvisionError::Spawn`]); tolerant ones come back as `Ok` with
/// [`ExecutionResult::warning`] set.
pub async fn execute(
    runner: &dyn CommandRunner,
    operation: &Operation,
    description: &str,
    tolerance: Tolerance,
) -> Result<ExecutionResult> {
    info!(step = %description, "running");
    debug!(command = %operation, "executing command");

    let mut result = match runner.run(operation).await {
        Ok(result) => result,
        Err(err) if tolerance.is_tolerant() => {
            warn!(step = %description, error = %err, "could not start command, continuing");
            let mut result = ExecutionResult::failure(-1, err.to_string());
            result.warning = Some(err.to_string());
            return Ok(result);
        }
        Err(err) => {
            error!(step = %description, error = %err, "could not start command");
            return Err(err);
        }
    };

    if result.succeeded() {
        let stdout = result.stdout.trim();
        if stdout.is_empty() {
            info!(step = %description, "success");
        } else {
            info!(step = %description, output = %preview(stdout), "success");
        }
        return Ok(result);
    }

    if tolerance.is_tolerant() {
        let text = preview(result.error_text());
        warn!(step = %description, status = result.status, error = %text, "failed, continuing");
        result.warning = Some(if text.is_empty() {
            format!("exit status {}", result.status)
        } else {
            text
        });
        return Ok(result);
    }

    error!(
        step = %description,
        status = result.status,
        error = %result.error_text(),
        "failed"
    );
    Err(ProvisionError::StepFailed {
        description: description.to_string(),
        stderr: result.error_text().to_string(),
    })
}

/// First [`ECHO_LIMIT`] characters of `text`.
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(ECHO_LIMIT) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}
