// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Short-lived per-process authentication tokens.
//!
//! At startup the daemon mints a 32-character hex "root" credential readable
//! only by the superuser and the configured system group. Every admin child
//! gets its own per-pid credential, deleted again when the child exits.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const HEX: [char; 16] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F'];

/// Token length in hex characters.
pub const TOKEN_LEN: usize = 32;

/// One live credential.
#[derive(Debug, Clone)]
pub struct Credential {
    pub pid: u32,
    pub user: String,
    pub token: String,
    pub path: PathBuf,
    pub created: u64,
}

/// The credential table, keyed by pid (pid 0 is the root credential).
pub struct CredentialStore {
    dir: PathBuf,
    system_group: String,
    certs: HashMap<u32, Credential>,
}

impl CredentialStore {
    /// Create the store and mint the root credential.
    pub fn init(
        server_root: &Path,
        system_group: &str,
        now: u64,
    ) -> std::io::Result<CredentialStore> {
        let dir = server_root.join("certs");
        std::fs::create_dir_all(&dir)?;
        let mut store = CredentialStore {
            dir,
            system_group: system_group.to_string(),
            certs: HashMap::new(),
        };
        store.add(0, "root", now)?;
        Ok(store)
    }

    /// Mint a credential for `pid`, writing its token file. The root
    /// credential (pid 0) is group-readable for the system group; child
    /// credentials are readable by the owner only.
    pub fn add(&mut self, pid: u32, user: &str, now: u64) -> std::io::Result<&Credential> {
        let token = nanoid::nanoid!(TOKEN_LEN, &HEX);
        let path = self.dir.join(pid.to_string());
        std::fs::write(&path, &token)?;

        let mode = if pid == 0 { 0o440 } else { 0o400 };
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))?;
        if pid == 0 {
            // Best-effort: only a privileged daemon can hand the file to
            // the system group.
            if let Ok(Some(group)) = nix::unistd::Group::from_name(&self.system_group) {
                if let Err(e) = nix::unistd::chown(&path, None, Some(group.gid)) {
                    tracing::debug!(error = %e, "root credential chown skipped");
                }
            }
        }

        let credential = Credential {
            pid,
            user: user.to_string(),
            token,
            path,
            created: now,
        };
        self.certs.insert(pid, credential);
        Ok(&self.certs[&pid])
    }

    /// Drop a child's credential and unlink its file.
    pub fn remove(&mut self, pid: u32) {
        if let Some(credential) = self.certs.remove(&pid) {
            if let Err(e) = std::fs::remove_file(&credential.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(pid, error = %e, "credential unlink failed");
                }
            }
        }
    }

    /// Resolve a presented token to its user.
    pub fn find(&self, token: &str) -> Option<&str> {
        self.certs
            .values()
            .find(|c| c.token == token)
            .map(|c| c.user.as_str())
    }

    pub fn get(&self, pid: u32) -> Option<&Credential> {
        self.certs.get(&pid)
    }

    pub fn root_token(&self) -> Option<&str> {
        self.certs.get(&0).map(|c| c.token.as_str())
    }

    /// Shutdown: unlink everything.
    pub fn clear(&mut self) {
        let pids: Vec<u32> = self.certs.keys().copied().collect();
        for pid in pids {
            self.remove(pid);
        }
    }
}

#[cfg(test)]
#[path = "cert_tests.rs"]
mod tests;
