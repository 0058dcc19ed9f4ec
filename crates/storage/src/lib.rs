// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! press-storage: spool directory, persisted configs, and safe file access

pub mod fs;
pub mod printcap;
pub mod printers_conf;
pub mod spool;
pub mod subscriptions_conf;

pub use fs::{check_file, safe_create, safe_open, CheckKind, CheckResult, FsError};
pub use printcap::{write_printcap, PrintcapFormat};
pub use printers_conf::{load_destinations, save_destinations, DestBlock};
pub use spool::{SpoolDir, SpoolError as SpoolDirError};
pub use subscriptions_conf::{load_subscriptions, save_subscriptions, SubscriptionFile};
