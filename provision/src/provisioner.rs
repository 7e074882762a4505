// SPDX-License-Identifier: AGPL-3.0-or-later
//! Top-level entry point tying the guard, the plan and the sequencer together

use tracing::info;

use crate::config::Config;
use crate::guard::{self, PrivilegeProbe};
use crate::plan::{build_plan, CancelFlag, ProvisioningPlan, RunReport, Sequencer};
use crate::runner::CommandRunner;

/// Provisions the host described by a [`Config`]
pub struct Provisioner<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    privilege: &'a dyn PrivilegeProbe,
    cancel: CancelFlag,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn CommandRunner,
        privilege: &'a dyn PrivilegeProbe,
    ) -> Self {
        Self {
            config,
            runner,
            privilege,
            cancel: CancelFlag::new(),
        }
    }

    /// Use `cancel` to stop the run between stages
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// The plan [`run`](Self::run) would execute
    pub fn plan(&self) -> ProvisioningPlan {
        build_plan(self.config)
    }

    /// Check privilege, then run the whole plan once.
    ///
    /// Nothing is executed or written when the privilege check fails.
    pub async fn run(&self) -> RunReport {
        if let Err(err) = guard::ensure_privileged(self.privilege) {
            return RunReport::refused(&err);
        }

        let plan = self.plan();
        info!(
            stages = plan.stages.len(),
            steps = plan.step_count(),
            database = %self.config.database.name,
            "starting provisioning"
        );

        let report = Sequencer::new(self.config, self.runner, self.cancel.clone())
            .run(&plan)
            .await;

        info!(
            succeeded = report.succeeded(),
            steps_run = report.steps_run,
            warnings = report.warnings.len(),
            "provisioning finished"
        );
        report
    }
}
