//! Hot-reload watcher
//!
//! Polls the modification time of the reload artifact. The first observation
//! only establishes a baseline; afterwards a strictly newer timestamp is a
//! reload trigger. The worker decides when to poll (only while the session is
//! `Ready`), so the watcher itself has no timer and no notion of state.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Informational output line rendered when a reload is triggered
pub const HOT_RELOAD_NOTICE: &str = "Hot reload!";

/// Tracks the artifact's last known modification time
#[derive(Debug, Clone, Default)]
pub struct HotReloadWatcher {
    artifact: Option<PathBuf>,
    baseline: Option<SystemTime>,
}

impl HotReloadWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch a new artifact path, forgetting the previous baseline
    pub fn set_artifact(&mut self, artifact: impl Into<PathBuf>) {
        self.artifact = Some(artifact.into());
        self.baseline = None;
    }

    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Last observed modification time
    pub fn baseline(&self) -> Option<SystemTime> {
        self.baseline
    }

    /// Stat the artifact and report whether a reload should fire
    pub fn poll(&mut self) -> bool {
        let modified = match self.artifact.as_deref() {
            Some(path) => modified_time(path),
            None => return false,
        };
        self.observe(modified)
    }

    /// Feed one sampled timestamp, `None` meaning the artifact is absent
    pub fn observe(&mut self, modified: Option<SystemTime>) -> bool {
        let Some(modified) = modified else {
            return false;
        };

        let triggered = matches!(self.baseline, Some(previous) if modified > previous);
        if self.baseline.is_none() {
            tracing::debug!(artifact = ?self.artifact, "Reload artifact baseline established");
        }
        self.baseline = Some(modified);
        triggered
    }
}

/// Modification time of `path`, or `None` when it cannot be read
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    match std::fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(time) => Some(time),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::debug!("Cannot stat reload artifact {:?}: {}", path, e);
            None
        }
    }
}
