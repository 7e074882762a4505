// SPDX-License-Identifier: AGPL-3.0-or-later
//! Config patcher
//!
//! Backup-then-mutate editing of foreign configuration files. There is no
//! parser for any of the target formats: edits are literal substitutions and
//! line insertions after anchor patterns, and the safety net is a pristine
//! `*.backup` sibling that is written once and never overwritten.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DatabaseCredentials;
use crate::error::{ProvisionError, Result};

/// Suffix appended to a managed file's path to form its backup path
pub const BACKUP_SUFFIX: &str = ".backup";

/// One edit against a managed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PatchOp {
    /// Replace every literal occurrence of `search`
    Substitute { search: String, replace: String },

    /// Insert `line` after every line matching the `anchor` regex, unless
    /// it already follows that line
    InsertAfter { anchor: String, line: String },
}

impl PatchOp {
    pub fn substitute(search: impl Into<String>, replace: impl Into<String>) -> Self {
        PatchOp::Substitute {
            search: search.into(),
            replace: replace.into(),
        }
    }

    pub fn insert_after(anchor: impl Into<String>, line: impl Into<String>) -> Self {
        PatchOp::InsertAfter {
            anchor: anchor.into(),
            line: line.into(),
        }
    }
}

/// A configuration file and the ordered edits to apply to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedConfigFile {
    pub path: PathBuf,
    pub patches: Vec<PatchOp>,
}

/// What a patch run changed
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    /// A backup was written by this call
    pub backup_created: bool,
    /// Literal replacements made
    pub substitutions: usize,
    /// Lines inserted
    pub insertions: usize,
    /// Anchors that matched no line
    pub unmatched_anchors: Vec<String>,
}

impl ManagedConfigFile {
    pub fn new(path: impl Into<PathBuf>, patches: Vec<PatchOp>) -> Self {
        Self {
            path: path.into(),
            patches,
        }
    }

    /// `path` with [`BACKUP_SUFFIX`] appended
    pub fn backup_path(&self) -> PathBuf {
        backup_path_for(&self.path)
    }

    /// Reject declarations that could corrupt the file or break re-runs.
    pub fn validate(&self) -> Result<()> {
        for patch in &self.patches {
            match patch {
                PatchOp::Substitute { search, replace } => {
                    if search.is_empty() {
                        return Err(self.invalid("empty search string".to_string()));
                    }
                    // A second application must find nothing left to replace.
                    if replace != search && replace.contains(search.as_str()) {
                        return Err(self.invalid(format!(
                            "replacement for '{}' contains its own search string",
                            search
                        )));
                    }
                }
                PatchOp::InsertAfter { anchor, line } => {
                    Regex::new(anchor)
                        .map_err(|e| self.invalid(format!("bad anchor '{}': {}", anchor, e)))?;
                    if line.contains('\n') {
                        return Err(self.invalid("inserted line contains a newline".to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, message: String) -> ProvisionError {
        ProvisionError::InvalidPatch {
            path: self.path.clone(),
            message,
        }
    }
}

/// `path` with [`BACKUP_SUFFIX`] appended
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Back up `file` (first time only) and apply its patches in order.
///
/// Zero substitution matches and zero anchor matches are not errors; the
/// latter are listed in [`PatchReport::unmatched_anchors`] for the caller
/// to judge. An insertion is skipped at any match whose next line already
/// equals the inserted line, so a re-run adds nothing. The live file is
/// rewritten only when its content changed.
pub fn backup_then_patch(file: &ManagedConfigFile) -> Result<PatchReport> {
    file.validate()?;

    let mut report = PatchReport {
        backup_created: ensure_backup(&file.path)?,
        ..PatchReport::default()
    };

    let original = fs::read_to_string(&file.path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProvisionError::PatchTargetMissing {
                path: file.path.clone(),
            }
        } else {
            ProvisionError::Io(e)
        }
    })?;

    let mut content = original.clone();
    for patch in &file.patches {
        match patch {
            PatchOp::Substitute { search, replace } => {
                let count = content.matches(search.as_str()).count();
                if count == 0 {
                    debug!(path = %file.path.display(), search = %search, "no occurrences");
                    continue;
                }
                content = content.replace(search.as_str(), replace);
                report.substitutions += count;
            }
            PatchOp::InsertAfter { anchor, line } => {
                let regex = Regex::new(anchor).map_err(|e| file.invalid(e.to_string()))?;
                let (patched, matched, inserted) = insert_after(&content, &regex, line);
                if matched == 0 {
                    warn!(path = %file.path.display(), anchor = %anchor, "anchor not found");
                    report.unmatched_anchors.push(anchor.clone());
                }
                content = patched;
                report.insertions += inserted;
            }
        }
    }

    if content != original {
        fs::write(&file.path, &content)?;
    }

    info!(
        path = %file.path.display(),
        substitutions = report.substitutions,
        insertions = report.insertions,
        "patched"
    );
    Ok(report)
}

/// Copy `path` to its backup path unless a backup already exists.
///
/// Returns whether a backup was written.
pub fn ensure_backup(path: &Path) -> Result<bool> {
    let backup = backup_path_for(path);
    if backup.exists() {
        debug!(backup = %backup.display(), "keeping existing backup");
        return Ok(false);
    }

    fs::copy(path, &backup).map_err(|source| ProvisionError::BackupFailed {
        path: path.to_path_buf(),
        source,
    })?;
    info!(backup = %backup.display(), "backup created");
    Ok(true)
}

/// Insert `line` after each line matching `anchor`.
///
/// A match already followed by `line` is left alone so re-runs do not stack
/// duplicates. Returns the new content, the number of matching lines and the
/// number of insertions.
fn insert_after(content: &str, anchor: &Regex, line: &str) -> (String, usize, usize) {
    let segments: Vec<&str> = content.split_inclusive('\n').collect();
    let mut out = String::with_capacity(content.len() + line.len() + 1);
    let mut matched = 0;
    let mut inserted = 0;

    for (index, segment) in segments.iter().enumerate() {
        out.push_str(segment);

        if !anchor.is_match(strip_eol(segment)) {
            continue;
        }
        matched += 1;

        if segments.get(index + 1).map(|next| strip_eol(next)) == Some(line) {
            continue;
        }
        if !segment.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
        inserted += 1;
    }

    (out, matched, inserted)
}

fn strip_eol(segment: &str) -> &str {
    segment.trim_end_matches(|c| c == '\n' || c == '\r')
}

/// Point `link` at `target`, replacing whatever is at `link`.
pub fn ensure_symlink(target: &Path, link: &Path) -> Result<()> {
    if !target.exists() {
        return Err(ProvisionError::PatchTargetMissing {
            path: target.to_path_buf(),
        });
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    if link.is_symlink() || link.exists() {
        fs::remove_file(link)?;
    }
    std::os::unix::fs::symlink(target, link)?;
    info!(link = %link.display(), target = %target.display(), "symlink created");
    Ok(())
}

// Managed files

/// Access-control rule letting the role reach its database over the socket
pub fn access_control_patches(creds: &DatabaseCredentials) -> Vec<PatchOp> {
    vec![PatchOp::insert_after(
        r"^# TYPE",
        format!("local   {}   {}   md5", creds.name, creds.user),
    )]
}

/// Point the data-source module at PostgreSQL with the role's credentials
pub fn sql_module_patches(creds: &DatabaseCredentials) -> Vec<PatchOp> {
    vec![
        PatchOp::substitute(r#"driver = "rlm_sql_null""#, r#"driver = "rlm_sql_postgresql""#),
        PatchOp::substitute(r#"dialect = "sqlite""#, r#"dialect = "postgresql""#),
        PatchOp::substitute(
            "#\tserver = \"localhost\"",
            format!("\tserver = \"{}\"", creds.host),
        ),
        PatchOp::substitute("#\tport = 3306", format!("\tport = {}", creds.port)),
        PatchOp::substitute(
            "#\tlogin = \"radius\"",
            format!("\tlogin = \"{}\"", creds.user),
        ),
        PatchOp::substitute(
            "#\tpassword = \"radpass\"",
            format!("\tpassword = \"{}\"", creds.password),
        ),
        PatchOp::substitute(
            r#"radius_db = "radius""#,
            format!("radius_db = \"{}\"", creds.name),
        ),
    ]
}

/// Replace the stock loopback secret in the client/trust list
pub fn clients_patches(shared_secret: &str) -> Vec<PatchOp> {
    vec![PatchOp::substitute(
        "secret = testing123",
        format!("secret = {}", shared_secret),
    )]
}

/// Call the `sql` module from a virtual server's authorize section
pub fn site_patches() -> Vec<PatchOp> {
    vec![PatchOp::insert_after(r"^\tauth_log$", "\tsql")]
}
