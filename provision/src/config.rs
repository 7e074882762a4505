// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration management for radius-provision
//!
//! A [`Config`] is built once at startup (defaults, then an optional TOML
//! file, then environment overrides) and handed by reference to every
//! component that needs credentials, secrets or well-known paths.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::patch::{self, ManagedConfigFile};

/// Environment variable overriding the database name
pub const ENV_DB_NAME: &str = "RADIUS_DB_NAME";
/// Environment variable overriding the database role
pub const ENV_DB_USER: &str = "RADIUS_DB_USER";
/// Environment variable overriding the database role password
pub const ENV_DB_PASSWORD: &str = "RADIUS_DB_PASSWORD";
/// Environment variable overriding the RADIUS shared secret
pub const ENV_SHARED_SECRET: &str = "RADIUS_SHARED_SECRET";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backing store credentials
    #[serde(default)]
    pub database: DatabaseCredentials,

    /// Authentication server settings
    #[serde(default)]
    pub radius: RadiusConfig,

    /// Identity used for the live authentication round trip
    #[serde(default)]
    pub test_user: TestUser,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credentials and location of the backing PostgreSQL store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    /// Database name
    #[serde(default = "default_db_name")]
    pub name: String,

    /// Role owning the database
    #[serde(default = "default_db_user")]
    pub user: String,

    /// Role password
    #[serde(default = "default_db_password")]
    pub password: String,

    /// Host used for TCP connections made with the role's credentials
    #[serde(default = "default_db_host")]
    pub host: String,

    /// PostgreSQL port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Drop and recreate the database and role on every run
    #[serde(default = "default_true")]
    pub reset: bool,

    /// Access-control file; discovered from the running server when unset
    #[serde(default)]
    pub hba_file: Option<PathBuf>,
}

/// FreeRADIUS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusConfig {
    /// Shared secret installed for the loopback client
    #[serde(default = "default_shared_secret")]
    pub shared_secret: String,

    /// Candidate configuration directories, probed in order
    #[serde(default = "default_config_dirs")]
    pub config_dirs: Vec<PathBuf>,

    /// Candidate PostgreSQL schema files, probed in order
    #[serde(default = "default_schema_candidates")]
    pub schema_candidates: Vec<PathBuf>,
}

/// Test identity inserted into `radcheck`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestUser {
    #[serde(default = "default_test_username")]
    pub username: String,

    #[serde(default = "default_test_password")]
    pub password: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for DatabaseCredentials {
    fn default() -> Self {
        Self {
            name: default_db_name(),
            user: default_db_user(),
            password: default_db_password(),
            host: default_db_host(),
            port: default_db_port(),
            reset: true,
            hba_file: None,
        }
    }
}

impl Default for RadiusConfig {
    fn default() -> Self {
        Self {
            shared_secret: default_shared_secret(),
            config_dirs: default_config_dirs(),
            schema_candidates: default_schema_candidates(),
        }
    }
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            username: default_test_username(),
            password: default_test_password(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseCredentials::default(),
            radius: RadiusConfig::default(),
            test_user: TestUser::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProvisionError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, fall back to defaults otherwise, then
    /// apply environment overrides and validate the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        let config = config.with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_DB_NAME) {
            self.database.name = name;
        }
        if let Some(user) = lookup(ENV_DB_USER) {
            self.database.user = user;
        }
        if let Some(password) = lookup(ENV_DB_PASSWORD) {
            self.database.password = password;
        }
        if let Some(secret) = lookup(ENV_SHARED_SECRET) {
            self.radius.shared_secret = secret;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Names are interpolated into SQL and into pg_hba.conf unquoted.
        let identifier = Regex::new(r"^[a-z_][a-z0-9_]*$").map_err(|e| invalid(e.to_string()))?;

        if !identifier.is_match(&self.database.name) {
            return Err(invalid(format!(
                "database name '{}' must be a lowercase SQL identifier",
                self.database.name
            )));
        }
        if !identifier.is_match(&self.database.user) {
            return Err(invalid(format!(
                "database user '{}' must be a lowercase SQL identifier",
                self.database.user
            )));
        }

        check_token("database password", &self.database.password)?;
        check_token("shared secret", &self.radius.shared_secret)?;
        check_token("test username", &self.test_user.username)?;
        check_token("test password", &self.test_user.password)?;

        if self.database.host.trim().is_empty() {
            return Err(invalid("database host cannot be empty".to_string()));
        }
        if self.radius.config_dirs.is_empty() {
            return Err(invalid(
                "at least one FreeRADIUS config directory is required".to_string(),
            ));
        }
        if self.radius.schema_candidates.is_empty() {
            return Err(invalid(
                "at least one schema candidate path is required".to_string(),
            ));
        }

        // Edits built from these values are checked now rather than halfway
        // through a run, after the database has been recreated.
        for (name, patches) in [
            ("pg_hba.conf", patch::access_control_patches(&self.database)),
            ("mods-available/sql", patch::sql_module_patches(&self.database)),
            ("clients.conf", patch::clients_patches(&self.radius.shared_secret)),
            ("sites-available/default", patch::site_patches()),
        ] {
            ManagedConfigFile::new(name, patches)
                .validate()
                .map_err(|e| invalid(e.to_string()))?;
        }

        Ok(())
    }
}

/// Values written verbatim into quoted config entries and command lines.
fn check_token(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(format!("{} cannot be empty", what)));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '|' || c == '\\')
    {
        return Err(invalid(format!(
            "{} must not contain whitespace, quotes, '|' or backslashes",
            what
        )));
    }
    Ok(())
}

fn invalid(message: String) -> ProvisionError {
    ProvisionError::InvalidConfig { message }
}

// Default value functions

fn default_db_name() -> String {
    "gildesecops".to_string()
}

fn default_db_user() -> String {
    "radiususer".to_string()
}

fn default_db_password() -> String {
    "radiuspassword".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_true() -> bool {
    true
}

fn default_shared_secret() -> String {
    "SuperSecretKey123".to_string()
}

fn default_config_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/freeradius/3.0"),
        PathBuf::from("/etc/freeradius/3.2"),
    ]
}

fn default_schema_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/freeradius/3.0/mods-config/sql/main/postgresql/schema.sql"),
        PathBuf::from("/etc/freeradius/3.2/mods-config/sql/main/postgresql/schema.sql"),
    ]
}

fn default_test_username() -> String {
    "testuser".to_string()
}

fn default_test_password() -> String {
    "testpass".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.name, "gildesecops");
        assert_eq!(config.database.user, "radiususer");
        assert_eq!(config.database.port, 5432);
        assert!(config.database.reset);
        assert_eq!(config.radius.shared_secret, "SuperSecretKey123");
        assert_eq!(config.radius.config_dirs.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_config() {
        let toml_content = r#"
            [database]
            name = "radius_prod"
            user = "radius_rw"
            password = "s3cret"
            reset = false
            hba_file = "/etc/postgresql/16/main/pg_hba.conf"

            [radius]
            shared_secret = "ApSecret99"
            config_dirs = ["/opt/freeradius"]

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.database.name, "radius_prod");
        assert!(!config.database.reset);
        assert_eq!(
            config.database.hba_file,
            Some(PathBuf::from("/etc/postgresql/16/main/pg_hba.conf"))
        );
        assert_eq!(config.radius.config_dirs, vec![PathBuf::from("/opt/freeradius")]);
        // Unset sections and keys keep their defaults
        assert_eq!(config.radius.schema_candidates.len(), 2);
        assert_eq!(config.test_user.username, "testuser");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/radius-provision.toml").unwrap_err();
        assert!(matches!(err, ProvisionError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = Config::load(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.database.user, "radiususer");
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[database]\nname = \"Drop Table\"\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig { .. }));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            (ENV_DB_NAME, "radius_env"),
            (ENV_SHARED_SECRET, "FromEnvironment"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().with_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database.name, "radius_env");
        assert_eq!(config.database.user, "radiususer");
        assert_eq!(config.radius.shared_secret, "FromEnvironment");
    }

    #[test]
    fn test_validation_rejects_quoted_secret() {
        let mut config = Config::default();
        config.radius.shared_secret = "bad\"secret".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.database.password = "has space".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_secret_extending_stock_secret() {
        let mut config = Config::default();
        config.radius.shared_secret = "testing123Prod".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig { .. }));
        assert!(err.to_string().contains("clients.conf"));

        // Keeping the stock secret is a no-op edit, not a conflict
        config.radius.shared_secret = "testing123".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_requires_candidates() {
        let mut config = Config::default();
        config.radius.schema_candidates.clear();
        assert!(config.validate().is_err());
    }
}
