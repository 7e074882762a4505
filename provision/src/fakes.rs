// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted command runner (testing only)
//!
//! [`ScriptedRunner`] satisfies [`CommandRunner`] without touching the host:
//! it records every operation and answers from rules matched against the
//! rendered command line.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ProvisionError, Result};
use crate::runner::{CommandRunner, ExecutionResult, Operation};

#[derive(Debug, Clone)]
enum Response {
    Result(ExecutionResult),
    Missing,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    response: Response,
}

/// In-memory runner answering from substring rules.
///
/// The first rule whose pattern occurs in the command line wins; operations
/// matching no rule succeed with empty output.
#[derive(Debug)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Operation>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer operations containing `pattern` with `result`.
    pub fn on(mut self, pattern: impl Into<String>, result: ExecutionResult) -> Self {
        self.rules.push(Rule {
            pattern: pattern.into(),
            response: Response::Result(result),
        });
        self
    }

    /// Operations containing `pattern` fail to start, as if not installed.
    pub fn missing(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(Rule {
            pattern: pattern.into(),
            response: Response::Missing,
        });
        self
    }

    /// Every operation run so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines of every operation run so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Operation::command_line).collect()
    }

    /// Whether any operation containing `pattern` was run.
    pub fn ran(&self, pattern: &str) -> bool {
        self.command_lines().iter().any(|line| line.contains(pattern))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, operation: &Operation) -> Result<ExecutionResult> {
        self.calls.lock().unwrap().push(operation.clone());

        let line = operation.command_line();
        let rule = self.rules.iter().find(|rule| line.contains(&rule.pattern));

        match rule.map(|rule| &rule.response) {
            Some(Response::Result(result)) => Ok(result.clone()),
            Some(Response::Missing) => Err(ProvisionError::Spawn {
                program: operation.program.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{}: command not found", operation.program),
                ),
            }),
            None => Ok(ExecutionResult::success("")),
        }
    }
}
