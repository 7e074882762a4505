// SPDX-License-Identifier: AGPL-3.0-or-later
//! Verifier
//!
//! Two probes run against the freshly started server: the built-in
//! configuration self-check, then one live authentication round trip with
//! the test identity. Neither can abort the run.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::runner::{self, CommandRunner, ExecutionResult, Operation, Tolerance};

/// Text in the test tool's output that means the server accepted the request
pub const ACCEPT_MARKER: &str = "Access-Accept";

/// Exit status a shell reports for a command it cannot find
const COMMAND_NOT_FOUND: i32 = 127;

/// Result of the live authentication round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationOutcome {
    Accepted,
    Rejected,
    /// The test tool could not run or said nothing
    Inconclusive,
}

impl VerificationOutcome {
    pub fn label(self) -> &'static str {
        match self {
            VerificationOutcome::Accepted => "accepted",
            VerificationOutcome::Rejected => "rejected",
            VerificationOutcome::Inconclusive => "inconclusive",
        }
    }
}

/// What the verification probes found, for the summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Whether the configuration self-check passed, if it ran
    pub self_check: Option<bool>,
    /// Outcome of the live test, if it ran
    pub outcome: Option<VerificationOutcome>,
    /// Output of the live test, trimmed for display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Classify the raw outcome of a test tool invocation.
pub fn classify(result: &Result<ExecutionResult>) -> VerificationOutcome {
    let Ok(result) = result else {
        return VerificationOutcome::Inconclusive;
    };

    let text = format!("{}{}", result.stdout, result.stderr);
    if text.contains(ACCEPT_MARKER) {
        VerificationOutcome::Accepted
    } else if result.status == COMMAND_NOT_FOUND || text.trim().is_empty() {
        VerificationOutcome::Inconclusive
    } else {
        VerificationOutcome::Rejected
    }
}

/// Runs the verification probes through a [`CommandRunner`]
pub struct Verifier<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
}

impl<'a> Verifier<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a Config) -> Self {
        Self { runner, config }
    }

    /// `freeradius -C`; a failure is reported, never raised.
    pub async fn self_check(&self) -> Result<bool> {
        let result = runner::execute(
            self.runner,
            &self_check_operation(),
            "Checking configuration syntax",
            Tolerance::Tolerant,
        )
        .await?;

        if !result.succeeded() {
            warn!("configuration self-check reported problems; the live test decides");
        }
        Ok(result.succeeded())
    }

    /// One live authentication exchange with the test identity.
    pub async fn authenticate(&self) -> (VerificationOutcome, Option<String>) {
        let operation = self.authentication_operation();
        info!(user = %self.config.test_user.username, "testing authentication");

        let result = self.runner.run(&operation).await;
        let outcome = classify(&result);
        let detail = match &result {
            Ok(result) => {
                let text = result.stdout.trim();
                let text = if text.is_empty() { result.stderr.trim() } else { text };
                (!text.is_empty()).then(|| runner::preview(text))
            }
            Err(err) => Some(err.to_string()),
        };

        match outcome {
            VerificationOutcome::Accepted => info!("authentication test accepted"),
            VerificationOutcome::Rejected => {
                warn!("authentication test rejected; debug with: sudo freeradius -X")
            }
            VerificationOutcome::Inconclusive => {
                warn!(detail = ?detail, "authentication test could not run")
            }
        }
        (outcome, detail)
    }

    /// `radtest <user> <password> localhost 0 <secret>`
    pub fn authentication_operation(&self) -> Operation {
        Operation::new("radtest")
            .arg(&self.config.test_user.username)
            .arg(&self.config.test_user.password)
            .args(["localhost", "0"])
            .arg(&self.config.radius.shared_secret)
    }
}

pub fn self_check_operation() -> Operation {
    Operation::new("freeradius").arg("-C")
}
