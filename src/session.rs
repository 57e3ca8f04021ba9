//! Per-item scratch space.
//!
//! An [`ExtractionSession`] owns one freshly created working directory for the time it
//! takes to process a single input. The directory goes away when the session is
//! dropped, which also happens while unwinding out of a panicking item, so no exit
//! path can leave it behind.
//!
//! A process exit skips destructors. Sessions tracked by [`LiveSessions`] can still be
//! removed from the outside before such an exit.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;

const SESSION_PREFIX: &str = "jar2source-";

/// Shared set of session directories that currently exist.
#[derive(Debug, Clone, Default)]
pub struct LiveSessions {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl LiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deletes every tracked directory and forgets it. Returns how many were removed.
    pub fn remove_all(&self) -> usize {
        let paths: Vec<PathBuf> = self.lock().drain().collect();
        let mut removed = 0;
        for path in paths {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to remove session directory {}: {}", path.display(), e),
            }
        }
        removed
    }

    fn register(&self, path: &Path) -> Registration {
        self.lock().insert(path.to_path_buf());
        Registration {
            live: self.clone(),
            path: path.to_path_buf(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Untracks its path when dropped.
struct Registration {
    live: LiveSessions,
    path: PathBuf,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.live.lock().remove(&self.path);
    }
}

pub struct ExtractionSession {
    label: String,
    dir: TempDir,
    registration: Option<Registration>,
}

impl ExtractionSession {
    /// Creates a uniquely named working directory under `work_root`, or under the
    /// system temporary directory when no root is configured.
    pub fn create(work_root: Option<&Path>, label: &str) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("{}{}-", SESSION_PREFIX, crate::metadata::sanitize(label));
        builder.prefix(&prefix);

        let dir = match work_root {
            Some(root) => {
                std::fs::create_dir_all(root)
                    .with_context(|| format!("Failed to create work root {}", root.display()))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .context("Failed to create extraction session directory")?;

        log::debug!("Session for {} at {}", label, dir.path().display());
        Ok(Self {
            label: label.to_string(),
            dir,
            registration: None,
        })
    }

    /// Adds the session to `live` until it is closed or dropped.
    pub fn tracked_by(mut self, live: &LiveSessions) -> Self {
        self.registration = Some(live.register(self.dir.path()));
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Named subdirectory of the session (not created).
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Removes the working directory now and reports failures, instead of the silent
    /// best-effort removal on drop.
    pub fn close(self) -> Result<()> {
        let Self {
            label,
            dir,
            registration,
        } = self;
        let path = dir.path().to_path_buf();
        let closed = dir.close();
        drop(registration);
        closed.with_context(|| format!("Failed to remove session directory {}", path.display()))?;
        log::debug!("Session for {} cleaned up", label);
        Ok(())
    }
}
