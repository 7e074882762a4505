// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for radius-provision

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that can occur while provisioning the host
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The process does not hold administrative rights
    #[error("This tool must be run with root privileges (current euid: {euid}). Please run: sudo radius-provision")]
    InsufficientPrivilege { euid: u32 },

    /// A required external step exited non-zero
    #[error("Step '{description}' failed: {stderr}")]
    StepFailed { description: String, stderr: String },

    /// An external program could not be started at all
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The pristine copy of a managed file could not be written
    #[error("Failed to back up '{}': {source}", .path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A managed configuration file does not exist
    #[error("Configuration file not found: {}", .path.display())]
    PatchTargetMissing { path: PathBuf },

    /// An insert-after anchor matched no line
    #[error("Anchor '{anchor}' not found in {}", .path.display())]
    AnchorNotFound { path: PathBuf, anchor: String },

    /// A patch declaration is malformed
    #[error("Invalid patch for {}: {message}", .path.display())]
    InvalidPatch { path: PathBuf, message: String },

    /// None of the known schema locations exist
    #[error("Could not find the FreeRADIUS PostgreSQL schema file. Tried: {}", join_paths(.candidates))]
    SchemaNotFound { candidates: Vec<PathBuf> },

    /// None of the known FreeRADIUS configuration directories exist
    #[error("Could not find the FreeRADIUS configuration directory. Tried: {}", join_paths(.candidates))]
    RadiusConfigNotFound { candidates: Vec<PathBuf> },

    /// A step needed a value an earlier step should have discovered
    #[error("Missing discovered value: {name}")]
    MissingFact { name: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Authentication record query produced unusable output
    #[error("Record query failed: {message}")]
    RecordQuery { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON rendering error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Whether this error is the failure of a provisioning step.
    ///
    /// Step failures are subject to the step's tolerance flag. Anything else
    /// ends the run as an unexpected error.
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            ProvisionError::StepFailed { .. }
                | ProvisionError::Spawn { .. }
                | ProvisionError::BackupFailed { .. }
                | ProvisionError::PatchTargetMissing { .. }
                | ProvisionError::AnchorNotFound { .. }
                | ProvisionError::SchemaNotFound { .. }
                | ProvisionError::RadiusConfigNotFound { .. }
                | ProvisionError::RecordQuery { .. }
        )
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failures_are_classified() {
        let err = ProvisionError::StepFailed {
            description: "Creating database".to_string(),
            stderr: "permission denied".to_string(),
        };
        assert!(err.is_step_failure());

        let err = ProvisionError::SchemaNotFound {
            candidates: vec![PathBuf::from("/a"), PathBuf::from("/b")],
        };
        assert!(err.is_step_failure());
        assert!(err.to_string().contains("/a, /b"));
    }

    #[test]
    fn test_unexpected_errors_are_not_step_failures() {
        let err = ProvisionError::MissingFact {
            name: "hba_file".to_string(),
        };
        assert!(!err.is_step_failure());

        let err = ProvisionError::InsufficientPrivilege { euid: 1000 };
        assert!(!err.is_step_failure());
        assert!(err.to_string().contains("root"));
    }
}
