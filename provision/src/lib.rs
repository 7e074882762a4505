// SPDX-License-Identifier: AGPL-3.0-or-later
//! radius-provision: turns a bare Debian/Ubuntu host into a running,
//! PostgreSQL-backed FreeRADIUS server
//!
//! The work is a fixed, linear plan of privileged steps run exactly once per
//! invocation. Failure policy lives in one place, the [`plan::Sequencer`];
//! every other component reports failures upward.
//!
//! # Components
//!
//! * **Guard:** refuses to start without root privileges
//! * **Runner:** every external program goes through [`runner::CommandRunner`]
//! * **Patcher:** backup-then-patch edits of foreign config files
//! * **Bootstrapper:** drop-and-recreate of the database, role and schema
//! * **Services:** `systemctl` lifecycle with per-action failure policy
//! * **Verifier:** self-check plus a live `radtest` round trip
//! * **Reporter:** credentials summary printed on every outcome

pub mod config;
pub mod database;
pub mod error;
pub mod fakes;
pub mod guard;
pub mod patch;
pub mod plan;
pub mod provisioner;
pub mod records;
pub mod report;
pub mod runner;
pub mod services;
pub mod verify;

pub use config::Config;
pub use error::{ProvisionError, Result};
pub use plan::{CancelFlag, RunOutcome, RunReport};
pub use provisioner::Provisioner;
