// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service lifecycle manager
//!
//! Builds `systemctl` steps for the two managed units and owns the policy of
//! which lifecycle actions may fail without aborting the run.

use serde::{Deserialize, Serialize};

use crate::plan::{ProvisioningStep, StepAction};
use crate::runner::{Operation, Tolerance};

/// A systemd unit managed by the provisioner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unit name passed to `systemctl`
    pub name: String,
    /// Human-readable name used in step descriptions
    pub label: String,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }

    /// The PostgreSQL database engine
    pub fn database() -> Self {
        Self::new("postgresql", "PostgreSQL")
    }

    /// The FreeRADIUS authentication server
    pub fn radius() -> Self {
        Self::new("freeradius", "FreeRADIUS")
    }
}

/// Lifecycle actions understood by the service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceAction {
    Enable,
    Start,
    Stop,
    Restart,
    Reload,
    Status,
}

impl ServiceAction {
    /// `systemctl` verb
    pub fn verb(self) -> &'static str {
        match self {
            ServiceAction::Enable => "enable",
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Reload => "reload",
            ServiceAction::Status => "status",
        }
    }

    /// Status probes never abort the run; every other action does.
    ///
    /// A unit that is not running while it is being configured is expected,
    /// and the authentication server must never be left running on a
    /// half-edited configuration.
    pub fn tolerance(self) -> Tolerance {
        match self {
            ServiceAction::Status => Tolerance::Tolerant,
            _ => Tolerance::Fatal,
        }
    }

    fn describe(self, service: &ServiceDescriptor) -> String {
        match self {
            ServiceAction::Enable => format!("Enabling {} on boot", service.label),
            ServiceAction::Start => format!("Starting {} service", service.label),
            ServiceAction::Stop => format!("Stopping {} (for configuration)", service.label),
            ServiceAction::Restart => format!("Restarting {} service", service.label),
            ServiceAction::Reload => format!("Reloading {} configuration", service.label),
            ServiceAction::Status => format!("Checking {} status", service.label),
        }
    }
}

/// The `systemctl` invocation for `action` on `service`
pub fn operation(service: &ServiceDescriptor, action: ServiceAction) -> Operation {
    let op = Operation::new("systemctl").arg(action.verb()).arg(&service.name);
    if action == ServiceAction::Status {
        op.arg("--no-pager")
    } else {
        op
    }
}

/// A plan step driving `service` toward `action`, with the action's policy
pub fn converge(service: &ServiceDescriptor, action: ServiceAction) -> ProvisioningStep {
    ProvisioningStep::new(
        action.describe(service),
        StepAction::Service {
            service: service.clone(),
            action,
        },
        action.tolerance(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_tolerant() {
        let step = converge(&ServiceDescriptor::radius(), ServiceAction::Status);
        assert_eq!(step.tolerance, Tolerance::Tolerant);
        assert_eq!(
            operation(&ServiceDescriptor::radius(), ServiceAction::Status).command_line(),
            "systemctl status freeradius --no-pager"
        );
    }

    #[test]
    fn test_mutating_actions_are_fatal() {
        for action in [
            ServiceAction::Enable,
            ServiceAction::Start,
            ServiceAction::Stop,
            ServiceAction::Restart,
            ServiceAction::Reload,
        ] {
            let step = converge(&ServiceDescriptor::database(), action);
            assert_eq!(step.tolerance, Tolerance::Fatal, "{:?}", action);
        }
    }

    #[test]
    fn test_descriptions_name_the_service() {
        let step = converge(&ServiceDescriptor::database(), ServiceAction::Enable);
        assert_eq!(step.description, "Enabling PostgreSQL on boot");
        assert_eq!(
            operation(&ServiceDescriptor::database(), ServiceAction::Restart).command_line(),
            "systemctl restart postgresql"
        );
    }
}
