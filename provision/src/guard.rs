// SPDX-License-Identifier: AGPL-3.0-or-later
//! Privileged-execution guard
//!
//! Runs before anything touches the filesystem or the service manager.

use nix::unistd;
use tracing::{debug, error};

use crate::error::{ProvisionError, Result};

/// Source of the effective user id
pub trait PrivilegeProbe: Send + Sync {
    /// Effective uid of the current process
    fn effective_uid(&self) -> u32;
}

/// Reads the real effective uid of this process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessPrivilege;

impl PrivilegeProbe for ProcessPrivilege {
    fn effective_uid(&self) -> u32 {
        unistd::geteuid().as_raw()
    }
}

/// Fixed uid, for tests and embedding
#[derive(Debug, Clone, Copy)]
pub struct FixedPrivilege(pub u32);

impl PrivilegeProbe for FixedPrivilege {
    fn effective_uid(&self) -> u32 {
        self.0
    }
}

/// Fail with [`ProvisionError::InsufficientPrivilege`] unless running as root.
pub fn ensure_privileged(probe: &dyn PrivilegeProbe) -> Result<()> {
    let euid = probe.effective_uid();
    if euid != 0 {
        error!(euid, "root privileges required");
        return Err(ProvisionError::InsufficientPrivilege { euid });
    }
    debug!("running with root privileges");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_accepted() {
        assert!(ensure_privileged(&FixedPrivilege(0)).is_ok());
    }

    #[test]
    fn test_unprivileged_is_rejected() {
        let err = ensure_privileged(&FixedPrivilege(1000)).unwrap_err();
        match err {
            ProvisionError::InsufficientPrivilege { euid } => assert_eq!(euid, 1000),
            other => panic!("Expected InsufficientPrivilege, got {other:?}"),
        }
    }

    #[test]
    fn test_process_probe_matches_nix() {
        assert_eq!(
            ProcessPrivilege.effective_uid(),
            unistd::geteuid().as_raw()
        );
    }
}
