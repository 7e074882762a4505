// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step sequencer
//!
//! Drives a [`ProvisioningPlan`] top to bottom and is the only place that
//! decides whether a failure aborts the run.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ProvisioningPlan, ProvisioningStep, StepAction};
use crate::config::Config;
use crate::database;
use crate::error::{ProvisionError, Result};
use crate::patch::{self, ManagedConfigFile};
use crate::records;
use crate::runner::{self, CommandRunner, Operation};
use crate::services;
use crate::verify::{Verification, Verifier};

/// Paths discovered while the plan runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facts {
    /// PostgreSQL access-control file
    pub hba_file: Option<PathBuf>,
    /// FreeRADIUS configuration directory
    pub radius_dir: Option<PathBuf>,
    /// Schema file loaded into the database
    pub schema_file: Option<PathBuf>,
}

/// A tolerated failure, kept for the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepWarning {
    pub stage: String,
    pub step: String,
    pub message: String,
}

/// How the run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RunOutcome {
    /// Every stage ran
    Completed,
    /// A fatal step failed
    Failed {
        stage: String,
        step: String,
        error: String,
    },
    /// The operator cancelled the run
    Interrupted { stage: String },
    /// An error outside the step failure policy
    Unexpected { stage: String, error: String },
    /// The process lacked the privilege to start
    Refused { error: String },
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Everything the summary needs to know about a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Steps that completed, including tolerated failures
    pub steps_run: usize,
    pub warnings: Vec<StepWarning>,
    pub verification: Verification,
    pub facts: Facts,
    /// Backup files guarding the patched configuration
    pub backups: Vec<PathBuf>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    fn new(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            steps_run: 0,
            warnings: Vec::new(),
            verification: Verification::default(),
            facts: Facts::default(),
            backups: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    /// A run that never started
    pub fn refused(error: &ProvisionError) -> Self {
        Self::new(RunOutcome::Refused {
            error: error.to_string(),
        })
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }
}

/// Shared operator-cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag on Ctrl+C.
    ///
    /// The running external command is not killed by this; the run stops at
    /// the next stage boundary.
    pub fn listen_for_ctrl_c(&self) -> JoinHandle<()> {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current stage");
                flag.cancel();
            }
        })
    }
}

/// Executes a plan step by step
pub struct Sequencer<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    cancel: CancelFlag,
}

impl<'a> Sequencer<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn CommandRunner, cancel: CancelFlag) -> Self {
        Self {
            config,
            runner,
            cancel,
        }
    }

    /// Run every stage in order, stopping at the first fatal failure.
    pub async fn run(&self, plan: &ProvisioningPlan) -> RunReport {
        let mut report = RunReport::new(RunOutcome::Completed);

        'stages: for stage in &plan.stages {
            if self.cancel.is_cancelled() {
                warn!(stage = %stage.heading, "interrupted");
                report.outcome = RunOutcome::Interrupted {
                    stage: stage.heading.clone(),
                };
                break;
            }

            info!(stage = %stage.heading, steps = stage.steps.len(), "stage");

            for step in &stage.steps {
                match self.execute_step(&mut report, step).await {
                    Ok(warning) => {
                        report.steps_run += 1;
                        if let Some(message) = warning {
                            report.warnings.push(StepWarning {
                                stage: stage.heading.clone(),
                                step: step.description.clone(),
                                message,
                            });
                        }
                    }
                    Err(err) if err.is_step_failure() && step.tolerance.is_tolerant() => {
                        warn!(step = %step.description, error = %err, "failed, continuing");
                        report.steps_run += 1;
                        report.warnings.push(StepWarning {
                            stage: stage.heading.clone(),
                            step: step.description.clone(),
                            message: err.to_string(),
                        });
                    }
                    Err(err) if self.cancel.is_cancelled() => {
                        warn!(step = %step.description, error = %err, "interrupted");
                        report.outcome = RunOutcome::Interrupted {
                            stage: stage.heading.clone(),
                        };
                        break 'stages;
                    }
                    Err(err) if err.is_step_failure() => {
                        error!(stage = %stage.heading, step = %step.description, "aborting");
                        report.outcome = RunOutcome::Failed {
                            stage: stage.heading.clone(),
                            step: step.description.clone(),
                            error: err.to_string(),
                        };
                        break 'stages;
                    }
                    Err(err) => {
                        error!(stage = %stage.heading, error = %err, "unexpected error");
                        report.outcome = RunOutcome::Unexpected {
                            stage: stage.heading.clone(),
                            error: err.to_string(),
                        };
                        break 'stages;
                    }
                }
            }
        }

        report.finished_at = Utc::now();
        report
    }

    /// Perform one step. `Ok(Some(_))` carries a tolerated failure.
    async fn execute_step(
        &self,
        report: &mut RunReport,
        step: &ProvisioningStep,
    ) -> Result<Option<String>> {
        let description = step.description.as_str();
        let creds = &self.config.database;

        match &step.action {
            StepAction::Command { operation } => self.command(operation, step).await,

            StepAction::Service { service, action } => {
                self.command(&services::operation(service, *action), step)
                    .await
            }

            StepAction::DiscoverAccessControlFile => {
                if let Some(path) = &creds.hba_file {
                    info!(path = %path.display(), "using configured access-control file");
                    report.facts.hba_file = Some(path.clone());
                    return Ok(None);
                }

                let result = runner::execute(
                    self.runner,
                    &database::hba_discovery_operation(),
                    description,
                    step.tolerance,
                )
                .await?;
                if result.warning.is_some() {
                    return Ok(result.warning);
                }

                let path = result.stdout.trim();
                if path.is_empty() {
                    return Err(ProvisionError::StepFailed {
                        description: description.to_string(),
                        stderr: "server reported no hba_file".to_string(),
                    });
                }
                info!(path = %path, "found access-control file");
                report.facts.hba_file = Some(PathBuf::from(path));
                Ok(None)
            }

            StepAction::DiscoverRadiusConfigDir => {
                let candidates = &self.config.radius.config_dirs;
                let dir = database::first_existing(candidates).ok_or_else(|| {
                    ProvisionError::RadiusConfigNotFound {
                        candidates: candidates.clone(),
                    }
                })?;
                info!(path = %dir.display(), "found FreeRADIUS configuration");
                report.facts.radius_dir = Some(dir);
                Ok(None)
            }

            StepAction::LoadSchema => {
                let schema = database::discover_schema(&self.config.radius.schema_candidates)?;
                report.facts.schema_file = Some(schema.clone());
                self.command(&database::schema_load_operation(creds, &schema), step)
                    .await
            }

            StepAction::Patch { file, patches } => {
                let managed = ManagedConfigFile::new(file.resolve(&report.facts)?, patches.clone());
                let outcome =
                    patch::backup_then_patch(&managed).map_err(|e| file_step(description, e));

                let backup = managed.backup_path();
                if backup.exists() && !report.backups.contains(&backup) {
                    report.backups.push(backup);
                }
                let outcome = outcome?;

                match outcome.unmatched_anchors.first() {
                    None => {
                        info!(step = %description, "success");
                        Ok(None)
                    }
                    Some(anchor) if step.tolerance.is_tolerant() => Ok(Some(format!(
                        "anchor '{}' not found in {}",
                        anchor,
                        managed.path.display()
                    ))),
                    Some(anchor) => Err(ProvisionError::AnchorNotFound {
                        path: managed.path.clone(),
                        anchor: anchor.clone(),
                    }),
                }
            }

            StepAction::EnableModule { module } => {
                let dir = report.facts.radius_dir.clone().ok_or_else(|| {
                    ProvisionError::MissingFact {
                        name: "radius_dir".to_string(),
                    }
                })?;
                patch::ensure_symlink(
                    &dir.join("mods-available").join(module),
                    &dir.join("mods-enabled").join(module),
                )
                .map_err(|e| file_step(description, e))?;
                info!(step = %description, "success");
                Ok(None)
            }

            StepAction::AddRecord { record } => {
                self.command(&records::insert_operation(creds, record), step)
                    .await
            }

            StepAction::EnsureTool { binary, package } => {
                let probe = Operation::new("which").arg(binary);
                match self.runner.run(&probe).await {
                    Ok(result) if result.succeeded() => {
                        debug!(binary = %binary, "already installed");
                        Ok(None)
                    }
                    _ => {
                        let install = Operation::new("apt").args(["install", "-y"]).arg(package);
                        self.command(&install, step).await
                    }
                }
            }

            StepAction::SelfCheck => {
                let passed = Verifier::new(self.runner, self.config).self_check().await?;
                report.verification.self_check = Some(passed);
                Ok((!passed).then(|| "configuration self-check reported problems".to_string()))
            }

            StepAction::AuthenticationTest => {
                let (outcome, detail) = Verifier::new(self.runner, self.config)
                    .authenticate()
                    .await;
                report.verification.outcome = Some(outcome);
                report.verification.detail = detail;
                Ok(None)
            }
        }
    }

    async fn command(
        &self,
        operation: &Operation,
        step: &ProvisioningStep,
    ) -> Result<Option<String>> {
        let result =
            runner::execute(self.runner, operation, &step.description, step.tolerance).await?;
        Ok(result.warning)
    }
}

/// File errors during a step are step failures, subject to its tolerance.
fn file_step(description: &str, err: ProvisionError) -> ProvisionError {
    match err {
        ProvisionError::Io(e) => ProvisionError::StepFailed {
            description: description.to_string(),
            stderr: e.to_string(),
        },
        other => other,
    }
}
