// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The request root: on-disk job control and data files.
//!
//! Each active job owns a control file `cNNNNN` (serialized job record) and
//! one data file `dNNNNN-FFF` per submitted document, FFF 1-based. Job ids
//! are monotonic; after a restart the counter reseeds to `max(existing) + 1`.

use crate::fs::{safe_create, safe_open, FsError};
use press_core::{Job, JobId};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("control file {0} is corrupt: {1}")]
    Corrupt(String, #[source] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the request root directory.
#[derive(Debug, Clone)]
pub struct SpoolDir {
    root: PathBuf,
    /// Spool ownership applied to created files when the daemon is privileged
    owner: Option<(u32, u32)>,
}

impl SpoolDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), owner: None }
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some((uid, gid));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the request root when absent.
    pub fn ensure(&self) -> Result<(), SpoolError> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn control_path(&self, id: JobId) -> PathBuf {
        self.root.join(format!("c{:05}", id.0))
    }

    pub fn data_path(&self, id: JobId, index: usize) -> PathBuf {
        self.root.join(format!("d{:05}-{:03}", id.0, index))
    }

    /// Persist the job's control record.
    pub fn save_job(&self, job: &Job) -> Result<(), SpoolError> {
        let path = self.control_path(job.id);
        let mut file = safe_create(&path, self.owner)?;
        let body = serde_json::to_vec_pretty(job)
            .map_err(|e| SpoolError::Corrupt(path.display().to_string(), e))?;
        file.write_all(&body)?;
        Ok(())
    }

    /// Write one document's bytes, returning the spool filename.
    pub fn write_data(
        &self,
        id: JobId,
        index: usize,
        data: &[u8],
    ) -> Result<String, SpoolError> {
        let path = self.data_path(id, index);
        let mut file = safe_create(&path, self.owner)?;
        file.write_all(data)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(name)
    }

    pub fn data_size_k(&self, id: JobId, index: usize) -> u32 {
        std::fs::metadata(self.data_path(id, index))
            .map(|m| m.len().div_ceil(1024) as u32)
            .unwrap_or(0)
    }

    /// Read one control file back into a job record.
    pub fn load_job(&self, id: JobId) -> Result<Job, SpoolError> {
        let path = self.control_path(id);
        let mut body = String::new();
        safe_open(&path)?.read_to_string(&mut body)?;
        serde_json::from_str(&body)
            .map_err(|e| SpoolError::Corrupt(path.display().to_string(), e))
    }

    /// Load every parseable control file, skipping (and logging) corrupt
    /// ones, sorted by id.
    pub fn load_jobs(&self) -> Result<Vec<Job>, SpoolError> {
        let mut jobs = Vec::new();
        for id in self.control_ids()? {
            match self.load_job(id) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::warn!(job = %id, error = %e, "skipping unreadable control file");
                }
            }
        }
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    /// Unlink the job's control and data files.
    pub fn remove_job(&self, job: &Job) -> Result<(), SpoolError> {
        remove_quiet(&self.control_path(job.id));
        for index in 1..=job.files.len() {
            remove_quiet(&self.data_path(job.id, index));
        }
        Ok(())
    }

    /// The id to hand the next submitted job: `max(existing) + 1`, else 1.
    pub fn next_job_id(&self) -> Result<JobId, SpoolError> {
        let max = self.control_ids()?.into_iter().map(|id| id.0).max().unwrap_or(0);
        Ok(JobId(max + 1))
    }

    fn control_ids(&self) -> Result<Vec<JobId>, SpoolError> {
        let mut ids = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(digits) = name.strip_prefix('c') {
                if let Ok(id) = digits.parse::<u32>() {
                    ids.push(JobId(id));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn remove_quiet(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "unable to unlink spool file");
        }
    }
}

#[cfg(test)]
#[path = "spool_tests.rs"]
mod tests;
