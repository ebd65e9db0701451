//! Session data model
//!
//! A [`Session`] is the single long-lived controller state. It is owned by the
//! backend worker and mutated only from its control loop, so the reader and
//! timer activities never interleave a state transition with a watcher tick.
//!
//! The reload artifact path is always derived from the selected image: it is
//! recomputed in [`Session::select_image`] and has no independent setter.

use crate::types::ConnectionState;
use std::path::{Path, PathBuf};

/// Directory name that marks a repository's build output
const BUILD_DIR_MARKER: &str = "/build/";

/// Long-lived session state
#[derive(Debug, Clone)]
pub struct Session {
    state: ConnectionState,
    image: Option<PathBuf>,
    artifact: Option<PathBuf>,
    artifact_file_name: String,
    /// Consecutive transport deaths since the last upload began
    pub reconnect_attempts: u32,
}

impl Session {
    /// Create a session that derives artifacts named `artifact_file_name`
    pub fn new(artifact_file_name: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            image: None,
            artifact: None,
            artifact_file_name: artifact_file_name.into(),
            reconnect_attempts: 0,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Transition to a new state, returning whether it changed
    pub(crate) fn set_state(&mut self, state: ConnectionState) -> bool {
        if self.state == state {
            return false;
        }
        tracing::debug!(from = %self.state, to = %state, "Session state transition");
        self.state = state;
        true
    }

    /// Selected ROM image, if any
    pub fn image(&self) -> Option<&Path> {
        self.image.as_deref()
    }

    /// Reload artifact path derived from the selected image
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Select a new ROM image and derive its artifact path
    pub fn select_image(&mut self, image: impl Into<PathBuf>) -> &Path {
        let image = image.into();
        let artifact = artifact_path_for(&image, &self.artifact_file_name);
        self.image = Some(image);
        self.artifact.insert(artifact)
    }
}

/// Artifact path for an image: the image's directory plus `file_name`
pub fn artifact_path_for(image: &Path, file_name: &str) -> PathBuf {
    image.with_file_name(file_name)
}

/// Short name for an image, suitable for a status line
///
/// When the image lives under a `build/` directory the name starts at the
/// folder containing it (usually the repository), e.g. `dkr/build/game.z64`.
/// Otherwise it is just the file name.
pub fn image_display_name(image: &Path) -> String {
    let full = image.to_string_lossy().replace('\\', "/");

    if let Some(build_at) = full.rfind(BUILD_DIR_MARKER) {
        if let Some(slash) = full[..build_at].rfind('/') {
            return full[slash + 1..].to_string();
        }
    }

    image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_disconnected() {
        let session = Session::new("dkr_code.bin");
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.image().is_none());
        assert!(session.artifact().is_none());
        assert_eq!(session.reconnect_attempts, 0);
    }

    #[test]
    fn test_artifact_follows_image() {
        let mut session = Session::new("dkr_code.bin");
        let artifact = session.select_image("/repo/build/game.z64").to_path_buf();
        assert_eq!(artifact, PathBuf::from("/repo/build/dkr_code.bin"));

        session.select_image("/other/rom.bin");
        assert_eq!(session.artifact(), Some(Path::new("/other/dkr_code.bin")));
        assert_eq!(session.image(), Some(Path::new("/other/rom.bin")));
    }

    #[test]
    fn test_set_state_reports_change() {
        let mut session = Session::new("dkr_code.bin");
        assert!(session.set_state(ConnectionState::Started));
        assert!(!session.set_state(ConnectionState::Started));
        assert_eq!(session.state(), ConnectionState::Started);
    }

    #[test]
    fn test_display_name_includes_repo_folder() {
        assert_eq!(
            image_display_name(Path::new("/home/dev/dkr/build/us_1.0/dkr.z64")),
            "dkr/build/us_1.0/dkr.z64"
        );
    }

    #[test]
    fn test_display_name_falls_back_to_file_name() {
        assert_eq!(image_display_name(Path::new("/roms/game.z64")), "game.z64");
        assert_eq!(image_display_name(Path::new("build/game.z64")), "game.z64");
    }
}
