// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database bootstrapper
//!
//! Provisions the backing store from scratch: the database and role are
//! dropped and recreated, never migrated. Administrative statements run as
//! the `postgres` OS user; the schema is loaded over TCP with the new role's
//! own credentials, which also proves the role can log in.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::DatabaseCredentials;
use crate::error::{ProvisionError, Result};
use crate::plan::ProvisioningStep;
use crate::runner::{Operation, Tolerance};

/// OS user owning the PostgreSQL cluster
pub const ADMIN_USER: &str = "postgres";

/// `psql -c <sql>` as the cluster administrator
pub fn admin_sql(sql: impl Into<String>) -> Operation {
    Operation::as_user(ADMIN_USER, "psql").arg("-c").arg(sql)
}

/// `psql -d <database> -c <sql>` as the cluster administrator
pub fn admin_sql_in(database: &str, sql: impl Into<String>) -> Operation {
    Operation::as_user(ADMIN_USER, "psql")
        .args(["-d", database])
        .arg("-c")
        .arg(sql)
}

/// `psql` connected to the provisioned database as the provisioned role
pub fn role_psql(creds: &DatabaseCredentials) -> Operation {
    Operation::new("psql")
        .args(["-h", creds.host.as_str()])
        .args(["-p".to_string(), creds.port.to_string()])
        .args(["-U", creds.user.as_str(), "-d", creds.name.as_str()])
        .env("PGPASSWORD", creds.password.as_str())
}

/// Steps creating the database, the role and their grants.
///
/// With `reset` the existing database and role are dropped first and the
/// drops may fail; without it the creates may fail instead, since the
/// objects are expected to exist already.
pub fn bootstrap_steps(creds: &DatabaseCredentials) -> Vec<ProvisioningStep> {
    let create = if creds.reset {
        Tolerance::Fatal
    } else {
        Tolerance::Tolerant
    };
    let mut steps = Vec::new();

    if creds.reset {
        steps.push(ProvisioningStep::command(
            format!("Dropping existing {} database (if exists)", creds.name),
            admin_sql(format!("DROP DATABASE IF EXISTS {};", creds.name)),
            Tolerance::Tolerant,
        ));
    }
    steps.push(ProvisioningStep::command(
        format!("Creating database: {}", creds.name),
        admin_sql(format!("CREATE DATABASE {};", creds.name)),
        create,
    ));

    if creds.reset {
        steps.push(ProvisioningStep::command(
            format!("Dropping existing user {} (if exists)", creds.user),
            admin_sql(format!("DROP USER IF EXISTS {};", creds.user)),
            Tolerance::Tolerant,
        ));
    }
    steps.push(ProvisioningStep::command(
        format!("Creating user: {}", creds.user),
        admin_sql(format!(
            "CREATE USER {} WITH PASSWORD {};",
            creds.user,
            quote_literal(&creds.password)
        )),
        create,
    ));

    steps.push(ProvisioningStep::command(
        format!("Granting privileges to {}", creds.user),
        admin_sql(format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {};",
            creds.name, creds.user
        )),
        Tolerance::Fatal,
    ));
    steps.push(ProvisioningStep::command(
        "Granting schema privileges",
        admin_sql_in(
            &creds.name,
            format!("GRANT ALL ON SCHEMA public TO {};", creds.user),
        ),
        Tolerance::Fatal,
    ));

    steps
}

/// Ask the running server where its access-control file lives
pub fn hba_discovery_operation() -> Operation {
    Operation::as_user(ADMIN_USER, "psql").args(["-t", "-P", "format=unaligned", "-c", "SHOW hba_file;"])
}

/// First existing schema file among `candidates`
pub fn discover_schema(candidates: &[PathBuf]) -> Result<PathBuf> {
    let schema = first_existing(candidates).ok_or_else(|| ProvisionError::SchemaNotFound {
        candidates: candidates.to_vec(),
    })?;
    info!(schema = %schema.display(), "using schema");
    Ok(schema)
}

/// Load `schema` into the provisioned database as the provisioned role
pub fn schema_load_operation(creds: &DatabaseCredentials, schema: &Path) -> Operation {
    role_psql(creds).arg("-f").arg(schema.display().to_string())
}

/// First path in `candidates` that exists, probed in order
pub fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .inspect(|path| debug!(path = %path.display(), "probing"))
        .find(|path| path.exists())
        .cloned()
}

/// SQL string literal with embedded quotes doubled
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reset_drops_before_creating() {
        let steps = bootstrap_steps(&DatabaseCredentials::default());
        let descriptions: Vec<&str> = steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "Dropping existing gildesecops database (if exists)",
                "Creating database: gildesecops",
                "Dropping existing user radiususer (if exists)",
                "Creating user: radiususer",
                "Granting privileges to radiususer",
                "Granting schema privileges",
            ]
        );
        let tolerances: Vec<Tolerance> = steps.iter().map(|s| s.tolerance).collect();
        assert_eq!(
            tolerances,
            vec![
                Tolerance::Tolerant,
                Tolerance::Fatal,
                Tolerance::Tolerant,
                Tolerance::Fatal,
                Tolerance::Fatal,
                Tolerance::Fatal,
            ]
        );
    }

    #[test]
    fn test_without_reset_creates_are_tolerant() {
        let creds = DatabaseCredentials {
            reset: false,
            ..DatabaseCredentials::default()
        };
        let steps = bootstrap_steps(&creds);
        assert_eq!(steps.len(), 4);
        assert!(steps[0].description.starts_with("Creating database"));
        assert_eq!(steps[0].tolerance, Tolerance::Tolerant);
        assert_eq!(steps[1].tolerance, Tolerance::Tolerant);
        assert_eq!(steps[2].tolerance, Tolerance::Fatal);
    }

    #[test]
    fn test_create_user_quotes_password() {
        let steps = bootstrap_steps(&DatabaseCredentials::default());
        let crate::plan::StepAction::Command { operation } = &steps[3].action else {
            panic!("Expected a command step");
        };
        assert_eq!(
            operation.args.last().map(String::as_str),
            Some("CREATE USER radiususer WITH PASSWORD 'radiuspassword';")
        );
        assert_eq!(&operation.args[..4], &["-u", "postgres", "psql", "-c"]);
    }

    #[test]
    fn test_schema_load_uses_role_credentials() {
        let op = schema_load_operation(&DatabaseCredentials::default(), Path::new("/tmp/schema.sql"));
        assert_eq!(
            op.command_line(),
            "psql -h localhost -p 5432 -U radiususer -d gildesecops -f /tmp/schema.sql"
        );
        assert_eq!(
            op.env,
            vec![("PGPASSWORD".to_string(), "radiuspassword".to_string())]
        );
    }

    #[test]
    fn test_discover_schema_prefers_first_candidate() {
        let temp_dir = tempdir().unwrap();
        let first = temp_dir.path().join("3.0/schema.sql");
        let second = temp_dir.path().join("3.2/schema.sql");
        std::fs::create_dir_all(second.parent().unwrap()).unwrap();
        std::fs::write(&second, "CREATE TABLE radcheck ();").unwrap();

        let found = discover_schema(&[first.clone(), second.clone()]).unwrap();
        assert_eq!(found, second);

        std::fs::create_dir_all(first.parent().unwrap()).unwrap();
        std::fs::write(&first, "CREATE TABLE radcheck ();").unwrap();
        assert_eq!(discover_schema(&[first.clone(), second]).unwrap(), first);
    }

    #[test]
    fn test_discover_schema_not_found() {
        let err = discover_schema(&[PathBuf::from("/nonexistent/schema.sql")]).unwrap_err();
        assert!(matches!(err, ProvisionError::SchemaNotFound { .. }));
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
