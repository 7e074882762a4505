// SPDX-License-Identifier: AGPL-3.0-or-later
//! Summary reporter
//!
//! Renders the end-of-run summary. The credentials and the shared secret are
//! printed whatever the outcome, so an operator can always finish the setup
//! by hand.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::plan::{Facts, ProvisioningPlan, RunOutcome, RunReport, StepWarning};
use crate::verify::{Verification, VerificationOutcome};

/// Inner width of the summary box
const BOX_WIDTH: usize = 66;

/// Directory shown in the next steps when discovery did not run
const DEFAULT_RADIUS_DIR: &str = "/etc/freeradius/3.0";

fn timestamp(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn boxed_row(text: &str) -> String {
    format!("║{:<width$}║", text, width = BOX_WIDTH)
}

fn field_prefix(label: &str) -> String {
    format!("     {}: ", label)
}

/// Whether `value` fits on its row without pushing the right border out
fn fits(label: &str, value: &str) -> bool {
    field_prefix(label).chars().count() + value.chars().count() <= BOX_WIDTH
}

/// A labelled row; values too long for the box are cut short with `...`
fn field(label: &str, value: &str) -> String {
    let prefix = field_prefix(label);
    if fits(label, value) {
        return boxed_row(&format!("{}{}", prefix, value));
    }
    let room = BOX_WIDTH.saturating_sub(prefix.chars().count() + 3);
    let cut: String = value.chars().take(room).collect();
    boxed_row(&format!("{}{}...", prefix, cut))
}

fn rule(left: char, right: char) -> String {
    format!("{}{}{}", left, "═".repeat(BOX_WIDTH), right)
}

fn credentials_box(config: &Config) -> Vec<String> {
    let database = [
        ("Database Name", config.database.name.as_str()),
        ("Database User", config.database.user.as_str()),
        ("Database Pass", config.database.password.as_str()),
    ];
    let radius = [("Shared Secret", config.radius.shared_secret.as_str())];
    let test_user = [
        ("Username", config.test_user.username.as_str()),
        ("Password", config.test_user.password.as_str()),
    ];

    let blank = boxed_row("");
    let mut lines = vec![
        rule('╔', '╗'),
        boxed_row(&format!("{:^width$}", "CONFIGURATION SUMMARY", width = BOX_WIDTH)),
        rule('╠', '╣'),
    ];
    for (heading, fields) in [
        ("  Database Information:", &database[..]),
        ("  RADIUS Configuration:", &radius[..]),
        ("  Test User:", &test_user[..]),
    ] {
        lines.push(blank.clone());
        lines.push(boxed_row(heading));
        lines.extend(fields.iter().map(|(label, value)| field(label, value)));
    }
    lines.push(blank);
    lines.push(rule('╚', '╝'));

    // Shortened values are repeated in full below the box.
    let long: Vec<String> = database
        .iter()
        .chain(&radius)
        .chain(&test_user)
        .filter(|(label, value)| !fits(label, value))
        .map(|(label, value)| format!("  {}: {}", label, value))
        .collect();
    if !long.is_empty() {
        lines.push("Full values:".to_string());
        lines.extend(long);
    }
    lines
}

fn headline(outcome: &RunOutcome) -> Vec<String> {
    match outcome {
        RunOutcome::Completed => vec!["Setup Complete!".to_string()],
        RunOutcome::Failed { stage, step, error } => vec![
            format!("Setup FAILED during '{}'", stage),
            format!("  Step:  {}", step),
            format!("  Error: {}", error),
            "  Modified files keep a pristine *.backup copy next to them.".to_string(),
        ],
        RunOutcome::Interrupted { stage } => vec![
            format!("Setup interrupted before '{}' finished", stage),
            "  Modified files keep a pristine *.backup copy next to them.".to_string(),
        ],
        RunOutcome::Unexpected { stage, error } => vec![
            format!("Unexpected error during '{}'", stage),
            format!("  Error: {}", error),
        ],
        RunOutcome::Refused { error } => vec![format!("Setup refused: {}", error)],
    }
}

fn verification_lines(verification: &Verification) -> Vec<String> {
    let self_check = match verification.self_check {
        Some(true) => "passed",
        Some(false) => "reported problems",
        None => "not run",
    };
    let live = verification
        .outcome
        .map(VerificationOutcome::label)
        .unwrap_or("not run");

    let mut lines = vec![
        "Verification:".to_string(),
        format!("  Configuration self-check: {}", self_check),
        format!("  Authentication test:      {}", live),
    ];
    match verification.outcome {
        Some(VerificationOutcome::Accepted) => {
            lines.push("  RADIUS authentication is working.".to_string())
        }
        Some(VerificationOutcome::Rejected | VerificationOutcome::Inconclusive) => {
            if let Some(detail) = &verification.detail {
                lines.push(format!("  Output: {}", detail.replace('\n', " ")));
            }
            lines.push("  Debug with: sudo freeradius -X".to_string());
            lines.push("  Check logs: sudo journalctl -u freeradius -n 50".to_string());
        }
        None => {}
    }
    lines
}

fn warning_lines(warnings: &[StepWarning]) -> Vec<String> {
    if warnings.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("Warnings ({}):", warnings.len())];
    lines.extend(
        warnings
            .iter()
            .map(|w| format!("  - [{}] {}: {}", w.stage, w.step, w.message)),
    );
    lines
}

fn next_steps(config: &Config, radius_dir: &Path) -> Vec<String> {
    let db = &config.database;
    let secret = &config.radius.shared_secret;
    let dir = radius_dir.display();
    vec![
        "NEXT STEPS:".to_string(),
        String::new(),
        "1. Configure your access point:".to_string(),
        "   - RADIUS server IP: this machine's IP".to_string(),
        format!("   - Shared secret: {}", secret),
        "   - Authentication port: 1812".to_string(),
        "   - Accounting port: 1813".to_string(),
        String::new(),
        "2. Add access points to RADIUS:".to_string(),
        format!("   Edit: {}/clients.conf", dir),
        "   client your-ap-name {".to_string(),
        "       ipaddr = YOUR_AP_IP_ADDRESS".to_string(),
        format!("       secret = {}", secret),
        "   }".to_string(),
        "   Then restart: sudo systemctl restart freeradius".to_string(),
        String::new(),
        "3. Add real users:".to_string(),
        format!(
            "   PGPASSWORD={} psql -h {} -U {} -d {}",
            db.password, db.host, db.user, db.name
        ),
        "   INSERT INTO radcheck (username, attribute, op, value)".to_string(),
        "   VALUES ('username', 'Cleartext-Password', ':=', 'password');".to_string(),
        String::new(),
        "4. Monitor RADIUS:".to_string(),
        "   - Debug mode: sudo freeradius -X".to_string(),
        "   - View logs: sudo journalctl -u freeradius -f".to_string(),
        "   - Service status: sudo systemctl status freeradius".to_string(),
        String::new(),
        "Configuration files:".to_string(),
        format!("   - RADIUS config: {}/", dir),
        format!("   - Clients: {}/clients.conf", dir),
        format!("   - SQL module: {}/mods-available/sql", dir),
        "   - PostgreSQL: /etc/postgresql/".to_string(),
    ]
}

/// Human-readable summary of a run.
///
/// A refused run only gets the error and how to rerun, since nothing was
/// provisioned.
pub fn render_text(report: &RunReport, config: &Config) -> String {
    let mut lines = headline(&report.outcome);
    if let RunOutcome::Refused { .. } = report.outcome {
        return lines.join("\n");
    }

    lines.push(String::new());
    lines.extend(credentials_box(config));
    lines.push(String::new());
    lines.extend(verification_lines(&report.verification));

    let warnings = warning_lines(&report.warnings);
    if !warnings.is_empty() {
        lines.push(String::new());
        lines.extend(warnings);
    }

    if !report.backups.is_empty() {
        lines.push(String::new());
        lines.push("Backups:".to_string());
        lines.extend(
            report
                .backups
                .iter()
                .map(|path| format!("  - {}", path.display())),
        );
    }

    let radius_dir = report
        .facts
        .radius_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RADIUS_DIR));
    lines.push(String::new());
    lines.extend(next_steps(config, &radius_dir));

    lines.push(String::new());
    let verb = if report.succeeded() { "completed" } else { "stopped" };
    lines.push(format!(
        "Setup {} at: {} ({} steps run)",
        verb,
        timestamp(&report.finished_at),
        report.steps_run
    ));
    lines.join("\n")
}

#[derive(Serialize)]
struct DatabaseSummary<'a> {
    name: &'a str,
    user: &'a str,
    password: &'a str,
    host: &'a str,
    port: u16,
}

#[derive(Serialize)]
struct TestUserSummary<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    outcome: &'a RunOutcome,
    succeeded: bool,
    database: DatabaseSummary<'a>,
    shared_secret: &'a str,
    test_user: TestUserSummary<'a>,
    verification: &'a Verification,
    warnings: &'a [StepWarning],
    backups: &'a [PathBuf],
    facts: &'a Facts,
    steps_run: usize,
    finished_at: &'a DateTime<Utc>,
}

/// Machine-readable summary of a run
pub fn render_json(report: &RunReport, config: &Config) -> Result<String> {
    let summary = JsonSummary {
        outcome: &report.outcome,
        succeeded: report.succeeded(),
        database: DatabaseSummary {
            name: &config.database.name,
            user: &config.database.user,
            password: &config.database.password,
            host: &config.database.host,
            port: config.database.port,
        },
        shared_secret: &config.radius.shared_secret,
        test_user: TestUserSummary {
            username: &config.test_user.username,
            password: &config.test_user.password,
        },
        verification: &report.verification,
        warnings: &report.warnings,
        backups: &report.backups,
        facts: &report.facts,
        steps_run: report.steps_run,
        finished_at: &report.finished_at,
    };
    Ok(serde_json::to_string_pretty(&summary)?)
}

/// Every step the plan would perform, without performing any
pub fn render_plan(plan: &ProvisioningPlan) -> String {
    let mut lines = vec![format!(
        "[DRY RUN] Would run {} steps in {} stages",
        plan.step_count(),
        plan.stages.len()
    )];

    for (index, stage) in plan.stages.iter().enumerate() {
        lines.push(String::new());
        lines.push(format!("STEP {}: {}", index + 1, stage.heading));
        for step in &stage.steps {
            let note = if step.tolerance.is_tolerant() {
                " (may fail)"
            } else {
                ""
            };
            lines.push(format!(
                "[DRY RUN] Would {}  # {}{}",
                step.action.summary(),
                step.description,
                note
            ));
        }
    }
    lines.join("\n")
}

/// The plan as JSON
pub fn render_plan_json(plan: &ProvisioningPlan) -> Result<String> {
    Ok(serde_json::to_string_pretty(plan)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;
    use crate::plan::build_plan;

    fn completed() -> RunReport {
        RunReport {
            outcome: RunOutcome::Completed,
            steps_run: 30,
            warnings: Vec::new(),
            verification: Verification {
                self_check: Some(true),
                outcome: Some(VerificationOutcome::Accepted),
                detail: None,
            },
            facts: Facts::default(),
            backups: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_text_summary_contains_credentials() {
        let config = Config::default();
        let text = render_text(&completed(), &config);

        assert!(text.starts_with("Setup Complete!"));
        for value in [
            "gildesecops",
            "radiususer",
            "radiuspassword",
            "SuperSecretKey123",
            "testuser",
            "testpass",
        ] {
            assert!(text.contains(value), "summary is missing {}", value);
        }
        assert!(text.contains("Authentication test:      accepted"));
        assert!(text.contains("/etc/freeradius/3.0/clients.conf"));
    }

    #[test]
    fn test_box_rows_have_equal_width() {
        let config = Config::default();
        let text = render_text(&completed(), &config);
        let widths: Vec<usize> = text
            .lines()
            .filter(|line| line.starts_with('║'))
            .map(|line| line.chars().count())
            .collect();
        assert!(!widths.is_empty());
        assert!(widths.iter().all(|w| *w == BOX_WIDTH + 2));
        assert!(!text.contains("Full values:"));
    }

    #[test]
    fn test_long_values_keep_the_box_aligned() {
        let mut config = Config::default();
        let secret = "S".repeat(80);
        config.radius.shared_secret = secret.clone();
        let text = render_text(&completed(), &config);

        let rows: Vec<&str> = text.lines().filter(|line| line.starts_with('║')).collect();
        assert!(rows.iter().all(|row| row.chars().count() == BOX_WIDTH + 2));
        assert!(rows
            .iter()
            .any(|row| row.contains("Shared Secret: SSS") && row.contains("...")));
        assert!(text.contains("Full values:"));
        assert!(text.contains(&format!("  Shared Secret: {}", secret)));
    }

    #[test]
    fn test_failed_summary_still_prints_credentials() {
        let config = Config::default();
        let mut report = completed();
        report.outcome = RunOutcome::Failed {
            stage: "Creating Database and User".to_string(),
            step: "Creating database: gildesecops".to_string(),
            error: "permission denied".to_string(),
        };
        report.warnings.push(StepWarning {
            stage: "Installing PostgreSQL".to_string(),
            step: "Checking PostgreSQL status".to_string(),
            message: "inactive".to_string(),
        });

        let text = render_text(&report, &config);
        assert!(text.starts_with("Setup FAILED during 'Creating Database and User'"));
        assert!(text.contains("permission denied"));
        assert!(text.contains("SuperSecretKey123"));
        assert!(text.contains("Warnings (1):"));
        assert!(text.contains("Setup stopped at:"));
    }

    #[test]
    fn test_refused_summary_is_short() {
        let config = Config::default();
        let report = RunReport::refused(&ProvisionError::InsufficientPrivilege { euid: 1000 });
        let text = render_text(&report, &config);
        assert!(text.contains("sudo radius-provision"));
        assert!(!text.contains("radiuspassword"));
    }

    #[test]
    fn test_json_summary() {
        let config = Config::default();
        let json = render_json(&completed(), &config).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["outcome"]["status"], "completed");
        assert_eq!(value["succeeded"], true);
        assert_eq!(value["shared_secret"], "SuperSecretKey123");
        assert_eq!(value["verification"]["outcome"], "accepted");
        assert_eq!(value["database"]["name"], "gildesecops");
    }

    #[test]
    fn test_render_plan_lists_every_step() {
        let plan = build_plan(&Config::default());
        let text = render_plan(&plan);
        let would = text
            .lines()
            .filter(|line| line.starts_with("[DRY RUN] Would ") && !line.contains("steps in"))
            .count();
        assert_eq!(would, plan.step_count());
        assert!(text.contains("STEP 10: Testing RADIUS Authentication"));
        assert!(text.contains("[DRY RUN] Would run: apt update -y  # Updating package lists"));
        assert!(text.contains("# Checking PostgreSQL status (may fail)"));
    }
}
