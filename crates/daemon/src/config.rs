// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration.
//!
//! `pressd.toml` holds the daemon's own knobs; printers.conf, classes.conf
//! and subscriptions.conf stay in their classic block formats and live under
//! `server_root`.

use press_storage::PrintcapFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn default_server_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_listen() -> Vec<String> {
    vec!["127.0.0.1:6631".to_string()]
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("press")
}

const fn default_max_clients() -> usize {
    100
}

const fn default_max_clients_per_host() -> usize {
    10
}

const fn default_max_subscriptions() -> usize {
    100
}

const fn default_max_subscriptions_per_dest() -> usize {
    25
}

const fn default_max_events() -> usize {
    100
}

const fn default_max_job_history() -> usize {
    50
}

const fn default_job_retry_interval() -> u64 {
    30
}

const fn default_netif_ttl() -> u64 {
    60
}

const fn default_resolver_passes() -> usize {
    press_core::constraint::DEFAULT_MAX_PASSES
}

const fn default_true() -> bool {
    true
}

fn default_rip_cache() -> String {
    "8m".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_charset() -> String {
    "utf-8".to_string()
}

fn default_system_group() -> String {
    "lpadmin".to_string()
}

/// Daemon configuration, loaded from pressd.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Name clients and banners see for this server
    pub server_name: String,
    /// Listener addresses; the first is required at startup
    pub listen: Vec<String>,
    /// Root for configs, credentials, and the PPD cache
    pub server_root: Option<PathBuf>,
    /// Where filter/backend/notifier programs live
    pub server_bin: Option<PathBuf>,
    /// State directory (spool lives under it unless overridden)
    pub state_dir: PathBuf,
    /// Request root; defaults to `<state_dir>/spool`
    pub spool_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    /// Spool ownership, resolved at startup when running privileged
    pub user: Option<String>,
    pub group: Option<String>,
    /// Group allowed to read the root credential
    pub system_group: String,
    /// Printcap shadow file; empty disables the rewrite
    pub printcap: Option<PathBuf>,
    pub printcap_format: String,
    pub max_clients: usize,
    pub max_clients_per_host: usize,
    pub max_subscriptions: usize,
    pub max_subscriptions_per_dest: usize,
    pub max_events: usize,
    /// Completed jobs kept for restart/history; 0 disables retention
    pub max_job_history: usize,
    pub job_history: bool,
    pub job_auto_purge: bool,
    /// Seconds before a retry-job back-end failure is redispatched
    pub job_retry_interval: u64,
    pub netif_ttl: u64,
    pub hostname_lookups: bool,
    /// Deny operations no policy rule covers
    pub strict_policy_default: bool,
    pub resolver_max_passes: usize,
    pub rip_cache: String,
    pub default_language: String,
    pub default_charset: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            listen: default_listen(),
            server_root: None,
            server_bin: None,
            state_dir: default_state_dir(),
            spool_dir: None,
            temp_dir: None,
            user: None,
            group: None,
            system_group: default_system_group(),
            printcap: None,
            printcap_format: "bsd".to_string(),
            max_clients: default_max_clients(),
            max_clients_per_host: default_max_clients_per_host(),
            max_subscriptions: default_max_subscriptions(),
            max_subscriptions_per_dest: default_max_subscriptions_per_dest(),
            max_events: default_max_events(),
            max_job_history: default_max_job_history(),
            job_history: true,
            job_auto_purge: false,
            job_retry_interval: default_job_retry_interval(),
            netif_ttl: default_netif_ttl(),
            hostname_lookups: false,
            strict_policy_default: default_true(),
            resolver_max_passes: default_resolver_passes(),
            rip_cache: default_rip_cache(),
            default_language: default_language(),
            default_charset: default_charset(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Load the file when present; fall back to defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(_) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn server_root(&self) -> PathBuf {
        self.server_root.clone().unwrap_or_else(|| self.state_dir.clone())
    }

    pub fn server_bin(&self) -> PathBuf {
        self.server_bin
            .clone()
            .unwrap_or_else(|| PathBuf::from("/usr/lib/press"))
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(|| self.state_dir.join("spool"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn printcap_format(&self) -> PrintcapFormat {
        PrintcapFormat::parse(&self.printcap_format).unwrap_or_default()
    }

    /// Resolve configured spool user/group to numeric ids. Only meaningful
    /// when the daemon starts privileged.
    pub fn spool_owner(&self) -> Option<(u32, u32)> {
        let user = self.user.as_deref()?;
        let group = self.group.as_deref()?;
        let uid = nix::unistd::User::from_name(user).ok()??.uid.as_raw();
        let gid = nix::unistd::Group::from_name(group).ok()??.gid.as_raw();
        Some((uid, gid))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
