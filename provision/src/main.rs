// SPDX-License-Identifier: AGPL-3.0-or-later
//! radius-provision: PostgreSQL + FreeRADIUS automated setup
//!
//! Run as root with no arguments to provision the host.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use radius_provision::{
    config::LoggingConfig,
    guard::ProcessPrivilege,
    report,
    runner::ProcessRunner,
    CancelFlag, Config, Provisioner, RunOutcome,
};

/// PostgreSQL + FreeRADIUS automated setup
///
/// Installs PostgreSQL and FreeRADIUS, creates the RADIUS database, wires the
/// SQL module to it and verifies authentication end to end. Must run as root.
#[derive(Parser, Debug)]
#[command(name = "radius-provision")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults are used when it does not exist)
    #[arg(
        short,
        long,
        env = "RADIUS_PROVISION_CONFIG",
        default_value = "radius-provision.toml"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Print the plan without checking privileges or changing anything
    #[arg(long)]
    dry_run: bool,

    /// Output format for the summary
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Output format for the plan and the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON format
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))
    {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&cli, &config.logging);

    // One external command at a time; a single thread is plenty.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to create runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&cli, &config)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli, logging: &LoggingConfig) {
    let filter = if cli.debug {
        EnvFilter::new("radius_provision=trace,info")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    // stdout is reserved for the plan and the summary.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Returns whether the run succeeded
async fn run(cli: &Cli, config: &Config) -> anyhow::Result<bool> {
    let runner = ProcessRunner;
    let privilege = ProcessPrivilege;
    let provisioner = Provisioner::new(config, &runner, &privilege);

    if cli.dry_run {
        let plan = provisioner.plan();
        match cli.format {
            OutputFormat::Text => println!("{}", report::render_plan(&plan)),
            OutputFormat::Json => println!("{}", report::render_plan_json(&plan)?),
        }
        return Ok(true);
    }

    if cli.format == OutputFormat::Text {
        println!("PostgreSQL + FreeRADIUS Automated Setup");
        println!(
            "Database: {}  User: {}  Config: {}",
            config.database.name,
            config.database.user,
            cli.config.display()
        );
        println!();
    }

    let cancel = CancelFlag::new();
    let listener = cancel.listen_for_ctrl_c();
    let report = provisioner.with_cancel(cancel).run().await;
    listener.abort();

    match cli.format {
        OutputFormat::Text => {
            let text = report::render_text(&report, config);
            if let RunOutcome::Refused { .. } = report.outcome {
                eprintln!("{}", text);
            } else {
                println!("{}", text);
            }
        }
        OutputFormat::Json => println!(
            "{}",
            report::render_json(&report, config).context("Failed to render summary")?
        ),
    }

    Ok(report.succeeded())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["radius-provision"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("radius-provision.toml"));
        assert!(!cli.dry_run);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_cli_dry_run_flag() {
        let cli = Cli::try_parse_from(["radius-provision", "--dry-run"]).unwrap();
        assert!(cli.dry_run);
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["radius-provision", "-v"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_format_and_config() {
        let cli = Cli::try_parse_from([
            "radius-provision",
            "--format",
            "json",
            "-c",
            "/etc/radius-provision.toml",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, PathBuf::from("/etc/radius-provision.toml"));
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["radius-provision", "--format", "yaml"]).is_err());
    }
}
