// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pressd entry point.

use press_daemon::config::ServerConfig;
use press_daemon::lifecycle;
use std::path::PathBuf;
use std::process::ExitCode;

fn config_path() -> PathBuf {
    if let Some(arg) = std::env::args().nth(1) {
        return PathBuf::from(arg);
    }
    if let Ok(env) = std::env::var("PRESSD_CONFIG") {
        return PathBuf::from(env);
    }
    PathBuf::from("/etc/press/pressd.toml")
}

fn main() -> ExitCode {
    let config = match ServerConfig::load_or_default(&config_path()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pressd: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = lifecycle::init_logging(&config.state_dir);

    let mut daemon = match lifecycle::startup(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match daemon.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "daemon loop failed");
            ExitCode::FAILURE
        }
    }
}
