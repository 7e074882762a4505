// SPDX-License-Identifier: AGPL-3.0-or-later
//! The fixed provisioning plan

use super::{ManagedFile, ProvisioningPlan, ProvisioningStep, Stage, StepAction};
use crate::config::Config;
use crate::database;
use crate::patch;
use crate::records::AuthRecord;
use crate::runner::{Operation, Tolerance};
use crate::services::{converge, ServiceAction, ServiceDescriptor};

const DATABASE_PACKAGES: &[&str] = &["postgresql", "postgresql-contrib"];
const RADIUS_PACKAGES: &[&str] = &["freeradius", "freeradius-postgresql", "freeradius-utils"];

/// Virtual servers whose authorize section gets the `sql` module
const SITES: &[&str] = &["default", "inner-tunnel"];

fn stage(heading: &str, steps: Vec<ProvisioningStep>) -> Stage {
    Stage {
        heading: heading.to_string(),
        steps,
    }
}

fn apt_install(packages: &[&str]) -> Operation {
    Operation::new("apt").args(["install", "-y"]).args(packages.iter().copied())
}

/// Build the ten-stage plan for `config`.
pub fn build_plan(config: &Config) -> ProvisioningPlan {
    let creds = &config.database;
    let postgres = ServiceDescriptor::database();
    let radius = ServiceDescriptor::radius();

    let mut sql_module = vec![
        ProvisioningStep::fatal(
            "Locating FreeRADIUS configuration directory",
            StepAction::DiscoverRadiusConfigDir,
        ),
        ProvisioningStep::fatal(
            "Configuring SQL module for PostgreSQL",
            StepAction::Patch {
                file: ManagedFile::SqlModule,
                patches: patch::sql_module_patches(creds),
            },
        ),
        ProvisioningStep::fatal(
            "Enabling SQL module",
            StepAction::EnableModule {
                module: "sql".to_string(),
            },
        ),
    ];
    sql_module.extend(SITES.iter().map(|site| {
        ProvisioningStep::tolerant(
            format!("Enabling SQL in {} site", site),
            StepAction::Patch {
                file: ManagedFile::Site {
                    name: site.to_string(),
                },
                patches: patch::site_patches(),
            },
        )
    }));

    let stages = vec![
        stage(
            "Installing PostgreSQL",
            vec![
                ProvisioningStep::command(
                    "Updating package lists",
                    Operation::new("apt").args(["update", "-y"]),
                    Tolerance::Fatal,
                ),
                ProvisioningStep::command(
                    "Installing PostgreSQL",
                    apt_install(DATABASE_PACKAGES),
                    Tolerance::Fatal,
                ),
                converge(&postgres, ServiceAction::Enable),
                converge(&postgres, ServiceAction::Start),
                converge(&postgres, ServiceAction::Status),
            ],
        ),
        stage("Creating Database and User", database::bootstrap_steps(creds)),
        stage(
            "Configuring PostgreSQL Authentication",
            vec![
                ProvisioningStep::fatal(
                    "Finding pg_hba.conf location",
                    StepAction::DiscoverAccessControlFile,
                ),
                ProvisioningStep::tolerant(
                    format!("Allowing {} to reach {} with md5", creds.user, creds.name),
                    StepAction::Patch {
                        file: ManagedFile::AccessControl,
                        patches: patch::access_control_patches(creds),
                    },
                ),
                converge(&postgres, ServiceAction::Reload),
            ],
        ),
        stage(
            "Installing FreeRADIUS",
            vec![
                ProvisioningStep::command(
                    "Installing FreeRADIUS and PostgreSQL module",
                    apt_install(RADIUS_PACKAGES),
                    Tolerance::Fatal,
                ),
                converge(&radius, ServiceAction::Stop),
            ],
        ),
        stage(
            "Importing FreeRADIUS Schema",
            vec![ProvisioningStep::fatal(
                "Importing FreeRADIUS schema",
                StepAction::LoadSchema,
            )],
        ),
        stage("Configuring FreeRADIUS SQL Module", sql_module),
        stage(
            "Configuring RADIUS Clients",
            vec![ProvisioningStep::fatal(
                "Setting RADIUS shared secret for localhost",
                StepAction::Patch {
                    file: ManagedFile::Clients,
                    patches: patch::clients_patches(&config.radius.shared_secret),
                },
            )],
        ),
        stage(
            "Adding Test User",
            vec![ProvisioningStep::fatal(
                format!("Adding test user: {}", config.test_user.username),
                StepAction::AddRecord {
                    record: AuthRecord::cleartext_password(
                        &config.test_user.username,
                        &config.test_user.password,
                    ),
                },
            )],
        ),
        stage(
            "Starting FreeRADIUS",
            vec![
                ProvisioningStep::tolerant("Checking configuration syntax", StepAction::SelfCheck),
                converge(&radius, ServiceAction::Enable),
                converge(&radius, ServiceAction::Restart),
                converge(&radius, ServiceAction::Status),
            ],
        ),
        stage(
            "Testing RADIUS Authentication",
            vec![
                ProvisioningStep::tolerant(
                    "Installing RADIUS test utilities",
                    StepAction::EnsureTool {
                        binary: "radtest".to_string(),
                        package: "freeradius-utils".to_string(),
                    },
                ),
                ProvisioningStep::tolerant(
                    "Running RADIUS authentication test",
                    StepAction::AuthenticationTest,
                ),
            ],
        ),
    ];

    ProvisioningPlan { stages }
}
