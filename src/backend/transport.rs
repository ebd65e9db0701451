//! Loader subprocess transport
//!
//! The loader is run inside a pseudo-terminal, the same way it behaves when
//! started by hand, and talks a `\r\n` line protocol in both directions.
//! [`SubprocessTransport`] owns the child and the write half;
//! [`TransportReader`] owns the read half and is drained on its own thread by
//! [`TransportReader::pump`], which forwards each line to the worker as a
//! [`TransportEvent`] tagged with the transport's generation.

use crate::error::{ReloadError, Result};
use crate::types::{FRAME_DELIMITER, NEWLINE, PAD_CHAR};
use crossbeam_channel::Sender;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Fixed loader arguments placed before the ROM path
const ARGS_BEFORE_IMAGE: [&str; 2] = ["-b", "-r"];

/// Fixed loader argument placed after the ROM path (enables debug mode)
const ARGS_AFTER_IMAGE: [&str; 1] = ["-d"];

/// Terminal size given to the loader
const PTY_SIZE: PtySize = PtySize {
    rows: 40,
    cols: 160,
    pixel_width: 0,
    pixel_height: 0,
};

/// Output of a running transport, tagged with the spawn generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One raw line including its terminator
    Line { generation: u64, line: String },
    /// The output stream ended; the process is gone or going
    Closed { generation: u64 },
}

impl TransportEvent {
    pub fn generation(&self) -> u64 {
        match self {
            TransportEvent::Line { generation, .. } | TransportEvent::Closed { generation } => {
                *generation
            }
        }
    }
}

/// Write side of a live loader connection
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Send `text` followed by the line terminator
    fn write_line(&mut self, text: &str) -> Result<()>;

    /// Whether the loader process is still running
    fn is_alive(&mut self) -> bool;

    /// Terminate the loader and release it; calling again does nothing
    fn close(&mut self);
}

/// Starts loader connections for an image
pub trait TransportLauncher: Send {
    /// Spawn a transport for `image` whose output is sent to `events`
    fn launch(
        &self,
        image: &Path,
        generation: u64,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>>;
}

impl<F> TransportLauncher for F
where
    F: Fn(&Path, u64, Sender<TransportEvent>) -> Result<Box<dyn Transport>> + Send,
{
    fn launch(
        &self,
        image: &Path,
        generation: u64,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>> {
        self(image, generation, events)
    }
}

/// Arguments passed to the loader for `image`
pub fn loader_args(image: &Path, extra: &[String]) -> Vec<OsString> {
    ARGS_BEFORE_IMAGE
        .iter()
        .map(OsString::from)
        .chain(std::iter::once(image.as_os_str().to_os_string()))
        .chain(ARGS_AFTER_IMAGE.iter().map(OsString::from))
        .chain(extra.iter().map(OsString::from))
        .collect()
}

/// Locate the loader executable before anything is spawned
///
/// Bare names are searched on `PATH`; anything with a directory part must
/// exist as given.
pub fn resolve_program(program: &Path) -> Result<PathBuf> {
    let not_found = |reason: &str| ReloadError::TransportSpawn {
        program: program.to_path_buf(),
        reason: reason.to_string(),
    };

    if program.as_os_str().is_empty() {
        return Err(not_found("no loader configured"));
    }

    if program.components().count() > 1 || program.is_absolute() {
        return if program.is_file() {
            Ok(program.to_path_buf())
        } else {
            Err(not_found("file does not exist"))
        };
    }

    // The working directory comes first, matching how the loader is usually shipped.
    if program.is_file() {
        return Ok(program.to_path_buf());
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| not_found("not found in the working directory or on PATH"))
}

/// Frame raw user input for the wire
///
/// Input already wrapped in `@...@` is passed through. Anything else is padded
/// with `_` until its length is 3 modulo 4, so that with the terminator it
/// fills whole 4-byte words. Empty input yields `None`.
pub fn frame_user_input(input: &str) -> Option<String> {
    if input.is_empty() {
        return None;
    }

    if input.starts_with(FRAME_DELIMITER) && input.ends_with(FRAME_DELIMITER) {
        return Some(input.to_string());
    }

    let mut framed = input.to_string();
    while framed.len() % 4 != 3 {
        framed.push(PAD_CHAR);
    }
    Some(framed)
}

/// Spawns the loader in a pseudo-terminal
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl SubprocessLauncher {
    /// Create a launcher for a program that was already resolved
    pub fn new(program: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    /// Resolve the configured program, failing if it is missing
    pub fn from_config(config: &crate::config::LoaderConfig) -> Result<Self> {
        let program = resolve_program(&config.program)?;
        Ok(Self::new(program, config.extra_args.clone()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl TransportLauncher for SubprocessLauncher {
    fn launch(
        &self,
        image: &Path,
        generation: u64,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>> {
        // The executable may have been deleted since startup.
        if !self.program.is_file() {
            return Err(ReloadError::TransportSpawn {
                program: self.program.clone(),
                reason: "file does not exist".to_string(),
            });
        }

        let (transport, reader) =
            SubprocessTransport::spawn(&self.program, &loader_args(image, &self.extra_args))?;

        std::thread::Builder::new()
            .name(format!("loader-reader-{}", generation))
            .spawn(move || reader.pump(generation, events))
            .map_err(|e| {
                ReloadError::TransportStart(format!("failed to start reader thread: {}", e))
            })?;

        Ok(Box::new(transport))
    }
}

/// A running loader process and its input side
pub struct SubprocessTransport {
    child: Option<Box<dyn Child + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    // Dropping the master closes the terminal, so it lives as long as the child.
    master: Option<Box<dyn MasterPty + Send>>,
}

impl SubprocessTransport {
    /// Start `program` with `args`, returning the transport and its reader
    ///
    /// Fails with [`ReloadError::TransportSpawn`] only when `program` does not
    /// exist. Any other failure is a [`ReloadError::TransportStart`].
    pub fn spawn(program: &Path, args: &[OsString]) -> Result<(Self, TransportReader)> {
        let start_error = |reason: String| ReloadError::TransportStart(reason);

        let pair = native_pty_system()
            .openpty(PTY_SIZE)
            .map_err(|e| start_error(format!("failed to open pty: {}", e)))?;

        let mut command = CommandBuilder::new(program);
        command.args(args);
        if let Ok(cwd) = std::env::current_dir() {
            command.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| {
                if program.exists() {
                    start_error(format!("failed to run {:?}: {}", program, e))
                } else {
                    ReloadError::TransportSpawn {
                        program: program.to_path_buf(),
                        reason: e.to_string(),
                    }
                }
            })?;
        // Only the child may hold the slave, or reads never see end-of-stream.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| start_error(format!("failed to open pty reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| start_error(format!("failed to open pty writer: {}", e)))?;

        tracing::info!(
            program = %program.display(),
            pid = ?child.process_id(),
            "Loader started"
        );

        let transport = Self {
            child: Some(child),
            writer: Some(writer),
            master: Some(pair.master),
        };
        Ok((transport, TransportReader::new(reader)))
    }
}

impl Transport for SubprocessTransport {
    fn write_line(&mut self, text: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(ReloadError::NoTransport)?;
        tracing::debug!(text, "Writing to loader");

        send_line(writer.as_mut(), text).map_err(ReloadError::TransportWrite)
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        self.writer = None;
        if matches!(child.try_wait(), Ok(None)) {
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to kill loader: {}", e);
            }
        }
        match child.wait() {
            Ok(status) => tracing::info!("Loader exited: {:?}", status),
            Err(e) => tracing::warn!("Failed to reap loader: {}", e),
        }
        self.master = None;
    }
}

fn send_line(writer: &mut dyn Write, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes())?;
    writer.write_all(NEWLINE.as_bytes())?;
    writer.flush()
}

fn normalize_terminator(line: &str) -> String {
    match line.strip_suffix('\n') {
        Some(content) => format!("{}{}", content.trim_end_matches('\r'), NEWLINE),
        None => line.to_string(),
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blocking line reader over the loader's output
pub struct TransportReader {
    inner: BufReader<Box<dyn Read + Send>>,
}

impl TransportReader {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Block until a full line is available
    ///
    /// The returned line keeps its terminator, normalized to `\r\n` (the
    /// terminal turns a child's `\r\n` into `\r\r\n`). `None` means
    /// end-of-stream; a read error (a pty reports the child hanging up as one)
    /// is treated the same way. A final unterminated fragment is still returned.
    pub fn read_line(&mut self) -> Option<String> {
        let mut buf = Vec::new();
        match self.inner.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => Some(normalize_terminator(&String::from_utf8_lossy(&buf))),
            Err(e) => {
                tracing::debug!("Loader output ended: {}", e);
                None
            }
        }
    }

    /// Forward every line to `events` until the stream ends
    pub fn pump(mut self, generation: u64, events: Sender<TransportEvent>) {
        while let Some(line) = self.read_line() {
            tracing::trace!(generation, line = ?line, "Loader output");
            if events.send(TransportEvent::Line { generation, line }).is_err() {
                // Worker is gone, nobody is listening.
                return;
            }
        }
        let _ = events.send(TransportEvent::Closed { generation });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn reader_over(data: &'static [u8]) -> TransportReader {
        TransportReader::new(Box::new(Cursor::new(data)))
    }

    #[test]
    fn test_loader_args() {
        let args = loader_args(Path::new("/repo/build/game.z64"), &[]);
        assert_eq!(args, vec!["-b", "-r", "/repo/build/game.z64", "-d"]);
    }

    #[test]
    fn test_loader_args_with_extra() {
        let args = loader_args(Path::new("rom.z64"), &["-v".to_string()]);
        assert_eq!(args, vec!["-b", "-r", "rom.z64", "-d", "-v"]);
    }

    #[test]
    fn test_frame_pads_to_three_mod_four() {
        assert_eq!(frame_user_input("hot").as_deref(), Some("hot"));
        assert_eq!(frame_user_input("a").as_deref(), Some("a__"));
        assert_eq!(frame_user_input("abcd").as_deref(), Some("abcd___"));
        assert_eq!(frame_user_input("give 1").as_deref(), Some("give 1_"));
    }

    #[test]
    fn test_framed_commands_pass_through() {
        assert_eq!(frame_user_input("@x.bin@").as_deref(), Some("@x.bin@"));
        assert_eq!(frame_user_input("@").as_deref(), Some("@"));
        assert_eq!(frame_user_input("@open").as_deref(), Some("@open__"));
    }

    #[test]
    fn test_empty_input_is_dropped() {
        assert_eq!(frame_user_input(""), None);
    }

    #[test]
    fn test_reader_keeps_terminators() {
        let mut reader = reader_over(b"Uploading ROM\r\nDebug mode started\r\npartial");
        assert_eq!(reader.read_line().as_deref(), Some("Uploading ROM\r\n"));
        assert_eq!(reader.read_line().as_deref(), Some("Debug mode started\r\n"));
        assert_eq!(reader.read_line().as_deref(), Some("partial"));
        assert_eq!(reader.read_line(), None);
    }

    #[test]
    fn test_reader_normalizes_terminators() {
        let mut reader = reader_over(b"Debug mode started\r\r\nbare\n");
        assert_eq!(reader.read_line().as_deref(), Some("Debug mode started\r\n"));
        assert_eq!(reader.read_line().as_deref(), Some("bare\r\n"));
    }

    #[test]
    fn test_send_line_appends_terminator() {
        let mut sink = Vec::new();
        send_line(&mut sink, "@/repo/build/dkr_code.bin@").unwrap();
        assert_eq!(sink, b"@/repo/build/dkr_code.bin@\r\n");
    }

    #[test]
    fn test_reader_replaces_invalid_utf8() {
        let mut reader = reader_over(b"bad \xff byte\r\n");
        assert_eq!(reader.read_line().as_deref(), Some("bad \u{fffd} byte\r\n"));
    }

    #[test]
    fn test_pump_tags_lines_and_reports_close() {
        let (tx, rx) = crossbeam_channel::unbounded();
        reader_over(b"one\r\ntwo\r\n").pump(7, tx);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::Line { generation: 7, line: "one\r\n".to_string() },
                TransportEvent::Line { generation: 7, line: "two\r\n".to_string() },
                TransportEvent::Closed { generation: 7 },
            ]
        );
    }

    #[test]
    fn test_resolve_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_program(&dir.path().join("UNFLoader")).unwrap_err();
        assert!(err.is_fatal());

        let err = resolve_program(Path::new("definitely-not-a-loader-3f9a")).unwrap_err();
        assert!(matches!(err, ReloadError::TransportSpawn { .. }));
    }

    #[test]
    fn test_launch_of_deleted_loader_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = SubprocessLauncher::new(dir.path().join("UNFLoader"), Vec::new());
        let (tx, _rx) = crossbeam_channel::unbounded();

        let err = launcher
            .launch(Path::new("/repo/build/game.z64"), 1, tx)
            .err()
            .unwrap();
        assert!(matches!(err, ReloadError::TransportSpawn { .. }));
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    #[test]
    fn test_unrunnable_loader_is_not_fatal() {
        // Exists but lacks the execute bit, so exec fails.
        let file = tempfile::NamedTempFile::new().unwrap();
        let launcher = SubprocessLauncher::new(file.path(), Vec::new());
        let (tx, _rx) = crossbeam_channel::unbounded();

        let err = launcher
            .launch(Path::new("/repo/build/game.z64"), 1, tx)
            .err()
            .unwrap();
        assert!(matches!(err, ReloadError::TransportStart(_)), "{:?}", err);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_resolve_existing_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(resolve_program(file.path()).unwrap(), file.path());
    }

    proptest! {
        #[test]
        fn test_padding_invariant(input in "[a-z0-9 ]{1,32}") {
            let framed = frame_user_input(&input).unwrap();
            prop_assert_eq!(framed.len() % 4, 3);
            prop_assert!(framed.starts_with(&input));
            prop_assert!(framed.len() - input.len() < 4);
            prop_assert!(framed[input.len()..].chars().all(|c| c == PAD_CHAR));
        }
    }
}
