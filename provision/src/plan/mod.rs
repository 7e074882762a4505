// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning plan and its execution
//!
//! A plan is a fixed, ordered list of named stages, each an ordered list of
//! steps. The [`Sequencer`] drives it top to bottom exactly once.

mod sequencer;
mod stages;

pub use sequencer::{CancelFlag, Facts, RunOutcome, RunReport, Sequencer, StepWarning};
pub use stages::build_plan;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::patch::PatchOp;
use crate::records::AuthRecord;
use crate::runner::{Operation, Tolerance};
use crate::services::{self, ServiceAction, ServiceDescriptor};

/// The whole provisioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    pub stages: Vec<Stage>,
}

/// A named group of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub heading: String,
    pub steps: Vec<ProvisioningStep>,
}

/// One unit of work and what to do when it fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningStep {
    /// Human-readable description
    pub description: String,

    /// Operation to perform
    pub action: StepAction,

    /// Whether failure aborts the run
    pub tolerance: Tolerance,
}

/// Operations a step can perform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepAction {
    /// Run an external program
    Command { operation: Operation },

    /// Drive a systemd unit
    Service {
        service: ServiceDescriptor,
        action: ServiceAction,
    },

    /// Locate the database access-control file
    DiscoverAccessControlFile,

    /// Locate the FreeRADIUS configuration directory
    DiscoverRadiusConfigDir,

    /// Locate the FreeRADIUS schema and load it into the new database
    LoadSchema,

    /// Back up a managed file and apply edits to it
    Patch {
        file: ManagedFile,
        patches: Vec<PatchOp>,
    },

    /// Link `mods-enabled/<module>` to `mods-available/<module>`
    EnableModule { module: String },

    /// Insert an authentication record
    AddRecord { record: AuthRecord },

    /// Install `package` unless `binary` is already on the PATH
    EnsureTool { binary: String, package: String },

    /// Run the server's configuration self-check
    SelfCheck,

    /// Perform a live authentication round trip
    AuthenticationTest,
}

/// Configuration files the plan edits, resolved against discovered paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ManagedFile {
    /// PostgreSQL `pg_hba.conf`
    AccessControl,
    /// FreeRADIUS `mods-available/sql`
    SqlModule,
    /// FreeRADIUS `clients.conf`
    Clients,
    /// FreeRADIUS `sites-available/<name>`
    Site { name: String },
}

impl ManagedFile {
    /// Absolute path of this file on the current host.
    pub fn resolve(&self, facts: &Facts) -> Result<PathBuf> {
        match self {
            ManagedFile::AccessControl => facts.hba_file.clone().ok_or_else(|| missing("hba_file")),
            ManagedFile::SqlModule => Ok(radius_dir(facts)?.join("mods-available/sql")),
            ManagedFile::Clients => Ok(radius_dir(facts)?.join("clients.conf")),
            ManagedFile::Site { name } => Ok(radius_dir(facts)?.join("sites-available").join(name)),
        }
    }

    fn label(&self) -> String {
        match self {
            ManagedFile::AccessControl => "pg_hba.conf".to_string(),
            ManagedFile::SqlModule => "mods-available/sql".to_string(),
            ManagedFile::Clients => "clients.conf".to_string(),
            ManagedFile::Site { name } => format!("sites-available/{}", name),
        }
    }
}

fn radius_dir(facts: &Facts) -> Result<PathBuf> {
    facts.radius_dir.clone().ok_or_else(|| missing("radius_dir"))
}

fn missing(name: &str) -> ProvisionError {
    ProvisionError::MissingFact {
        name: name.to_string(),
    }
}

impl ProvisioningStep {
    pub fn new(description: impl Into<String>, action: StepAction, tolerance: Tolerance) -> Self {
        Self {
            description: description.into(),
            action,
            tolerance,
        }
    }

    pub fn fatal(description: impl Into<String>, action: StepAction) -> Self {
        Self::new(description, action, Tolerance::Fatal)
    }

    pub fn tolerant(description: impl Into<String>, action: StepAction) -> Self {
        Self::new(description, action, Tolerance::Tolerant)
    }

    /// A step running one external program
    pub fn command(description: impl Into<String>, operation: Operation, tolerance: Tolerance) -> Self {
        Self::new(description, StepAction::Command { operation }, tolerance)
    }
}

impl StepAction {
    /// One-line rendering of what the step would do
    pub fn summary(&self) -> String {
        match self {
            StepAction::Command { operation } => format!("run: {}", operation),
            StepAction::Service { service, action } => {
                format!("run: {}", services::operation(service, *action))
            }
            StepAction::DiscoverAccessControlFile => {
                "locate pg_hba.conf (configured path or SHOW hba_file)".to_string()
            }
            StepAction::DiscoverRadiusConfigDir => {
                "locate the FreeRADIUS configuration directory".to_string()
            }
            StepAction::LoadSchema => {
                "locate schema.sql and load it with the database role".to_string()
            }
            StepAction::Patch { file, patches } => format!(
                "back up and patch {} ({} edit{})",
                file.label(),
                patches.len(),
                if patches.len() == 1 { "" } else { "s" }
            ),
            StepAction::EnableModule { module } => {
                format!("link mods-enabled/{0} -> mods-available/{0}", module)
            }
            StepAction::AddRecord { record } => format!(
                "insert radcheck record for '{}' ({} {})",
                record.identity, record.attribute, record.op
            ),
            StepAction::EnsureTool { binary, package } => {
                format!("install {} unless {} is available", package, binary)
            }
            StepAction::SelfCheck => "run: freeradius -C".to_string(),
            StepAction::AuthenticationTest => "run: radtest against localhost".to_string(),
        }
    }
}

impl ProvisioningPlan {
    /// Total number of steps across all stages
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.steps.len()).sum()
    }
}
