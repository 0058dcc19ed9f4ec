// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Safe spool-file access.
//!
//! Spool files are opened with the paranoia a setuid-adjacent daemon needs:
//! no symlinks anywhere in the path, no multi-linked inodes, no directories
//! where files are expected, no `..` traversal. Created files get the
//! configured spool ownership and 0640 permissions.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Component, Path};
use thiserror::Error;

/// Permissions applied to created spool files.
pub const SPOOL_FILE_MODE: u32 = 0o640;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("{0} resolves through a symbolic link")]
    Symlink(String),
    #[error("{0} has multiple hard links")]
    HardLinks(String),
    #[error("{0} is a directory")]
    IsDirectory(String),
    #[error("{0} contains a parent-directory segment")]
    DotDot(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    fn io(path: &Path, source: std::io::Error) -> FsError {
        FsError::Io { path: path.display().to_string(), source }
    }
}

/// Verify no component of `path` is a symlink and reject `..` segments.
/// Missing trailing components are fine (the file may be being created).
fn check_lexical(path: &Path) -> Result<(), FsError> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(FsError::DotDot(path.display().to_string()));
    }

    let mut walked = std::path::PathBuf::new();
    for component in path.components() {
        walked.push(component);
        match std::fs::symlink_metadata(&walked) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(FsError::Symlink(path.display().to_string()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => return Err(FsError::io(path, e)),
        }
    }
    Ok(())
}

fn check_inode(path: &Path, file: &File) -> Result<(), FsError> {
    let meta = file.metadata().map_err(|e| FsError::io(path, e))?;
    if meta.is_dir() {
        return Err(FsError::IsDirectory(path.display().to_string()));
    }
    if meta.nlink() > 1 {
        return Err(FsError::HardLinks(path.display().to_string()));
    }
    Ok(())
}

/// Open an existing spool file for reading.
pub fn safe_open(path: &Path) -> Result<File, FsError> {
    check_lexical(path)?;
    let file = File::open(path).map_err(|e| FsError::io(path, e))?;
    check_inode(path, &file)?;
    Ok(file)
}

/// Create (truncating) a spool file with 0640 permissions and, when
/// configured, the spool uid/gid. The chown is best-effort: it only succeeds
/// for a privileged daemon, and an unprivileged run keeps the caller's
/// ownership.
pub fn safe_create(path: &Path, owner: Option<(u32, u32)>) -> Result<File, FsError> {
    check_lexical(path)?;
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SPOOL_FILE_MODE)
        .open(path)
        .map_err(|e| FsError::io(path, e))?;
    check_inode(path, &file)?;

    // An umask may have narrowed the create mode; restore 0640 exactly.
    let mut perms = file.metadata().map_err(|e| FsError::io(path, e))?.permissions();
    if perms.mode() & 0o777 != SPOOL_FILE_MODE {
        perms.set_mode(SPOOL_FILE_MODE);
        file.set_permissions(perms).map_err(|e| FsError::io(path, e))?;
    }

    if let Some((uid, gid)) = owner {
        let res = nix::unistd::fchown(
            file.as_raw_fd(),
            Some(nix::unistd::Uid::from_raw(uid)),
            Some(nix::unistd::Gid::from_raw(gid)),
        );
        if let Err(e) = res {
            tracing::debug!(path = %path.display(), error = %e, "spool chown skipped");
        }
    }
    Ok(file)
}

/// What a config path is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    File,
    Program,
    /// Like `File`, but the containing directory is not checked
    FileOnly,
    Directory,
}

/// Outcome of [`check_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Ok,
    Missing,
    BadPermissions,
    WrongType,
    RelativePath,
}

impl std::fmt::Display for CheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CheckResult::Ok => "ok",
            CheckResult::Missing => "missing",
            CheckResult::BadPermissions => "bad-permissions",
            CheckResult::WrongType => "wrong-type",
            CheckResult::RelativePath => "relative-path",
        })
    }
}

/// Validate a configured path. With `root_checks`, the file must be owned by
/// the superuser, must not be group- or world-writable, and must not be
/// setuid; the containing directory is held to the same rules unless `kind`
/// is [`CheckKind::FileOnly`].
pub fn check_file(
    path: &Path,
    kind: CheckKind,
    root_checks: bool,
    mut reporter: Option<&mut dyn FnMut(&str)>,
) -> CheckResult {
    let mut report = |msg: String| {
        if let Some(cb) = reporter.as_mut() {
            cb(&msg);
        }
    };

    if path.is_relative() {
        report(format!("{} is relative", path.display()));
        return CheckResult::RelativePath;
    }

    let result = check_one(path, kind, root_checks);
    if result != CheckResult::Ok {
        report(format!("{} failed {:?} check", path.display(), result));
        return result;
    }

    if root_checks && kind != CheckKind::FileOnly && kind != CheckKind::Directory {
        if let Some(parent) = path.parent() {
            let result = check_one(parent, CheckKind::Directory, true);
            if result != CheckResult::Ok {
                report(format!("{} failed directory check", parent.display()));
                return result;
            }
        }
    }
    CheckResult::Ok
}

fn check_one(path: &Path, kind: CheckKind, root_checks: bool) -> CheckResult {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CheckResult::Missing,
        Err(_) => return CheckResult::BadPermissions,
    };

    let want_dir = kind == CheckKind::Directory;
    if meta.is_dir() != want_dir {
        return CheckResult::WrongType;
    }

    if root_checks {
        let mode = meta.mode();
        if meta.uid() != 0 {
            return CheckResult::BadPermissions;
        }
        if mode & 0o022 != 0 {
            return CheckResult::BadPermissions;
        }
        if mode & 0o4000 != 0 {
            return CheckResult::BadPermissions;
        }
    }
    CheckResult::Ok
}

#[cfg(test)]
#[path = "fs_tests.rs"]
mod tests;
