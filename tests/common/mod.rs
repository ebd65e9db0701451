//! Common test utilities and helpers
//!
//! Integration tests drive the backend against a shell script standing in for
//! the loader. The script lives in a temporary directory next to a fake ROM in
//! `build/`, and records what it receives into files in that directory.

#![allow(dead_code)] // Test utilities may not all be used in every test file

use dkr_reload::backend::{BackendMessage, FrontendReceiver};
use dkr_reload::config::{AppConfig, ReconnectConfig};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Default time to wait for a backend message
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Shell helper: read the next non-empty line from the terminal into `$LINE`
///
/// The terminal turns the `\r\n` we write into two line feeds, so empty lines
/// are skipped.
pub const READ_LINE_FN: &str = r#"read_line() {
    while IFS= read -r LINE; do
        LINE=$(printf '%s' "$LINE" | tr -d '\r')
        [ -n "$LINE" ] && return 0
    done
    return 1
}
"#;

/// A scripted stand-in for the loader
pub struct FakeLoader {
    dir: TempDir,
}

impl FakeLoader {
    /// Write a loader script running `body` with `$DIR` set to its directory
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("build").join("game.z64"), b"ROM").unwrap();

        let script = format!(
            "#!/bin/sh\nDIR=\"$(dirname \"$0\")\"\necho started >> \"$DIR/launches.txt\"\n{}\n{}\n",
            READ_LINE_FN, body
        );
        let program = dir.path().join("UNFLoader");
        fs::write(&program, script).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir }
    }

    pub fn program(&self) -> PathBuf {
        self.dir.path().join("UNFLoader")
    }

    pub fn image(&self) -> PathBuf {
        self.dir.path().join("build").join("game.z64")
    }

    pub fn artifact(&self) -> PathBuf {
        self.dir.path().join("build").join("dkr_code.bin")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Contents of a file the script wrote, empty if it does not exist
    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path(name)).unwrap_or_default()
    }

    /// Number of times the script has been started
    pub fn launches(&self) -> usize {
        self.read("launches.txt").lines().count()
    }

    /// Config pointing at this script with fast timers
    pub fn config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.loader.program = self.program();
        config.hot_reload.poll_interval_ms = 50;
        config.reconnect = ReconnectConfig {
            base_delay_ms: 50,
            step_ms: 10,
            max_steps: 5,
        };
        config
    }
}

/// Set a file's modification time to `secs` after the epoch
pub fn set_mtime(path: &Path, secs: u64) {
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .unwrap();
    file.set_modified(std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

/// Receive messages until `done` accepts one, returning everything seen
///
/// Panics if the backend goes quiet for longer than [`test_timeout`].
pub fn wait_for(
    frontend: &FrontendReceiver,
    mut done: impl FnMut(&BackendMessage) -> bool,
) -> Vec<BackendMessage> {
    let deadline = Instant::now() + test_timeout();
    let mut seen = Vec::new();

    while Instant::now() < deadline {
        if let Some(msg) = frontend.recv_timeout(Duration::from_millis(100)) {
            let finished = done(&msg);
            seen.push(msg);
            if finished {
                return seen;
            }
        }
    }

    panic!("Timed out waiting for backend message, saw: {:#?}", seen);
}

/// Whether `msg` is a status with exactly `text`
pub fn is_status(msg: &BackendMessage, text: &str) -> bool {
    matches!(msg, BackendMessage::Status { text: t, .. } if t == text)
}
