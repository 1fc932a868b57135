use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{GanError, Result};

/// Step-keyed checkpoint directories under one root:
/// `<root>/step_00001000/`.
///
/// Every checkpoint is written into `<root>/.step_<N>.tmp` and renamed into
/// place only once all files are complete, so a crash never leaves a
/// half-written `step_*` directory behind. A failed attempt is retried once.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> CheckpointStore {
        CheckpointStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn step_dir(&self, step: u64) -> PathBuf {
        self.root.join(format!("step_{:08}", step))
    }

    fn temp_dir(&self, step: u64) -> PathBuf {
        self.root.join(format!(".step_{:08}.tmp", step))
    }

    /// Where an existing checkpoint for `step` waits while it is replaced.
    fn old_dir(&self, step: u64) -> PathBuf {
        self.root.join(format!(".step_{:08}.old", step))
    }

    /// Runs `write_files` against a fresh temporary directory and publishes
    /// it as the checkpoint for `step`.
    pub fn write<F>(&self, step: u64, write_files: F) -> Result<PathBuf>
    where
        F: Fn(&Path) -> Result<()>,
    {
        let target = self.step_dir(step);
        match self.attempt(step, &write_files) {
            Ok(()) => {}
            Err(first) => {
                warn!(step, error = %first, "checkpoint write failed, retrying once");
                self.attempt(step, &write_files).map_err(|source| GanError::CheckpointIo {
                    path: target.clone(),
                    source,
                })?;
            }
        }
        info!(step, path = %target.display(), "checkpoint written");
        Ok(target)
    }

    fn attempt<F>(&self, step: u64, write_files: &F) -> io::Result<()>
    where
        F: Fn(&Path) -> Result<()>,
    {
        let tmp = self.temp_dir(step);
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;
        if let Err(e) = write_files(&tmp) {
            let _ = fs::remove_dir_all(&tmp);
            return Err(match e {
                GanError::Io(io_err) => io_err,
                other => io::Error::new(io::ErrorKind::Other, other.to_string()),
            });
        }
        let target = self.step_dir(step);
        if !target.exists() {
            return fs::rename(&tmp, &target);
        }
        // the old checkpoint stays on disk until the new one is in place
        let old = self.old_dir(step);
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }
        fs::rename(&target, &old)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::rename(&old, &target);
            return Err(e);
        }
        fs::remove_dir_all(&old)
    }

    /// Completed checkpoint steps, ascending. A missing root means none.
    pub fn steps(&self) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut steps = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(step) = name.to_str().and_then(|n| n.strip_prefix("step_")).and_then(|n| n.parse().ok()) {
                steps.push(step);
            }
        }
        steps.sort_unstable();
        Ok(steps)
    }

    pub fn latest(&self) -> Result<Option<u64>> {
        Ok(self.steps()?.last().copied())
    }
}
