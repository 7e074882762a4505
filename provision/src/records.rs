// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authentication records
//!
//! Data access for the `radcheck` table the SQL module queries. The
//! provisioner only inserts the test identity; list and delete exist for
//! operator tooling built on the same store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DatabaseCredentials;
use crate::database::{quote_literal, role_psql};
use crate::error::{ProvisionError, Result};
use crate::runner::{CommandRunner, Operation};

/// Table holding per-identity check attributes
pub const TABLE: &str = "radcheck";

/// Field separator for unaligned `psql` output
const FIELD_SEPARATOR: char = '|';

fn default_attribute() -> String {
    "Cleartext-Password".to_string()
}

fn default_op() -> String {
    ":=".to_string()
}

/// One row of the `radcheck` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    /// Row id, assigned by the database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// User name the record applies to
    pub identity: String,

    #[serde(default = "default_attribute")]
    pub attribute: String,

    /// Comparison operator
    #[serde(default = "default_op")]
    pub op: String,

    pub value: String,
}

impl AuthRecord {
    pub fn new(
        identity: impl Into<String>,
        attribute: impl Into<String>,
        op: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            identity: identity.into(),
            attribute: attribute.into(),
            op: op.into(),
            value: value.into(),
        }
    }

    /// `Cleartext-Password := <password>` for `identity`
    pub fn cleartext_password(identity: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(identity, default_attribute(), default_op(), password)
    }
}

/// Insert `record`, leaving any conflicting row untouched
pub fn insert_operation(creds: &DatabaseCredentials, record: &AuthRecord) -> Operation {
    role_psql(creds).arg("-c").arg(format!(
        "INSERT INTO {} (username, attribute, op, value) VALUES ({}, {}, {}, {}) ON CONFLICT DO NOTHING;",
        TABLE,
        quote_literal(&record.identity),
        quote_literal(&record.attribute),
        quote_literal(&record.op),
        quote_literal(&record.value)
    ))
}

/// Every record, one unaligned `|`-separated row per line
pub fn list_operation(creds: &DatabaseCredentials) -> Operation {
    role_psql(creds)
        .args(["-A", "-t", "-F"])
        .arg(FIELD_SEPARATOR.to_string())
        .arg("-c")
        .arg(format!(
            "SELECT id, username, attribute, op, value FROM {} ORDER BY id;",
            TABLE
        ))
}

pub fn delete_operation(creds: &DatabaseCredentials, id: i64) -> Operation {
    role_psql(creds)
        .arg("-c")
        .arg(format!("DELETE FROM {} WHERE id = {};", TABLE, id))
}

/// Parse `psql -A -t -F '|'` output of [`list_operation`].
///
/// The value column is last, so a separator inside it is kept.
pub fn parse_rows(output: &str) -> Result<Vec<AuthRecord>> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(parse_row)
        .collect()
}

fn parse_row(line: &str) -> Result<AuthRecord> {
    let mut fields = line.splitn(5, FIELD_SEPARATOR);
    let mut next = |name: &str| {
        fields.next().ok_or_else(|| ProvisionError::RecordQuery {
            message: format!("row '{}' has no {} column", line, name),
        })
    };

    let id = next("id")?;
    let id = id.parse::<i64>().map_err(|e| ProvisionError::RecordQuery {
        message: format!("bad id '{}': {}", id, e),
    })?;

    Ok(AuthRecord {
        id: Some(id),
        identity: next("username")?.to_string(),
        attribute: next("attribute")?.to_string(),
        op: next("op")?.to_string(),
        value: next("value")?.to_string(),
    })
}

/// Create, list and delete authentication records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: &AuthRecord) -> Result<()>;

    async fn list(&self) -> Result<Vec<AuthRecord>>;

    /// Returns whether a row was removed
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// [`RecordStore`] over `psql` with the provisioned role's credentials
pub struct PsqlRecordStore<'a> {
    runner: &'a dyn CommandRunner,
    creds: &'a DatabaseCredentials,
}

impl<'a> PsqlRecordStore<'a> {
    pub fn new(runner: &'a dyn CommandRunner, creds: &'a DatabaseCredentials) -> Self {
        Self { runner, creds }
    }

    async fn query(&self, operation: Operation) -> Result<String> {
        debug!(command = %operation, "record query");
        let result = self.runner.run(&operation).await?;
        if !result.succeeded() {
            return Err(ProvisionError::RecordQuery {
                message: result.error_text().to_string(),
            });
        }
        Ok(result.stdout)
    }
}

#[async_trait]
impl<'a> RecordStore for PsqlRecordStore<'a> {
    async fn create(&self, record: &AuthRecord) -> Result<()> {
        self.query(insert_operation(self.creds, record)).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AuthRecord>> {
        let output = self.query(list_operation(self.creds)).await?;
        parse_rows(&output)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let output = self.query(delete_operation(self.creds, id)).await?;
        Ok(output.trim() != "DELETE 0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRunner;
    use crate::runner::ExecutionResult;

    #[test]
    fn test_record_defaults() {
        let record: AuthRecord =
            serde_json::from_str(r#"{"identity":"alice","value":"secret"}"#).unwrap();
        assert_eq!(record.attribute, "Cleartext-Password");
        assert_eq!(record.op, ":=");
        assert_eq!(record, AuthRecord::cleartext_password("alice", "secret"));
    }

    #[test]
    fn test_insert_escapes_quotes() {
        let record = AuthRecord::cleartext_password("o'brien", "pa'ss");
        let op = insert_operation(&DatabaseCredentials::default(), &record);
        assert_eq!(
            op.args.last().map(String::as_str),
            Some(
                "INSERT INTO radcheck (username, attribute, op, value) VALUES ('o''brien', 'Cleartext-Password', ':=', 'pa''ss') ON CONFLICT DO NOTHING;"
            )
        );
    }

    #[test]
    fn test_parse_rows() {
        let rows = parse_rows("1|testuser|Cleartext-Password|:=|testpass\n2|bob|Cleartext-Password|:=|a|b\n\n")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, Some(1));
        assert_eq!(rows[0].identity, "testuser");
        assert_eq!(rows[1].value, "a|b");
    }

    #[test]
    fn test_parse_rows_rejects_garbage() {
        assert!(matches!(
            parse_rows("not-a-number|x|y|z|w"),
            Err(ProvisionError::RecordQuery { .. })
        ));
        assert!(parse_rows("1|short").is_err());
    }

    #[tokio::test]
    async fn test_psql_store_roundtrip() {
        let runner = ScriptedRunner::new()
            .on("SELECT", ExecutionResult::success("7|carol|Cleartext-Password|:=|pw\n"))
            .on("DELETE", ExecutionResult::success("DELETE 1\n"));
        let creds = DatabaseCredentials::default();
        let store = PsqlRecordStore::new(&runner, &creds);

        store
            .create(&AuthRecord::cleartext_password("carol", "pw"))
            .await
            .unwrap();
        let records = store.list().await.unwrap();
        assert_eq!(records[0].identity, "carol");
        assert!(store.delete(7).await.unwrap());

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls
            .iter()
            .all(|op| op.env.iter().any(|(key, _)| key == "PGPASSWORD")));
    }

    #[tokio::test]
    async fn test_psql_store_reports_failures() {
        let runner = ScriptedRunner::new().on(
            "SELECT",
            ExecutionResult::failure(2, "relation \"radcheck\" does not exist"),
        );
        let creds = DatabaseCredentials::default();
        let err = PsqlRecordStore::new(&runner, &creds).list().await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
