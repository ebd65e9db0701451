//! Backend module driving the loader session
//!
//! This module runs the whole reload engine on one thread so that the
//! presentation shell stays responsive. It uses crossbeam channels for
//! thread-safe communication with the shell.
//!
//! # Architecture
//!
//! The backend runs in a separate thread from the shell, communicating via channels:
//!
//! - [`BackendCommand`] - Messages sent from the shell to the backend (select image, input, close)
//! - [`BackendMessage`] - Messages sent from the backend to the shell (status, output, input state)
//! - [`FrontendReceiver`] - Shell-side handle for sending commands and receiving messages
//! - [`ReloadBackend`] - Main backend entry point that owns the worker
//!
//! # Components
//!
//! - [`sanitizer`] - Cleans raw loader lines
//! - [`protocol`] - Classifies lines and describes state transitions
//! - [`dedup`] - Collapses repeated output lines
//! - [`watcher`] - Detects rebuilt reload artifacts
//! - [`backoff`] - Schedules reconnects after the loader dies
//! - [`transport`] - Runs the loader in a pseudo-terminal
//! - [`BackendWorker`] - Control loop tying them together
//!
//! # Example
//!
//! ```ignore
//! use dkr_reload::backend::{BackendMessage, ReloadBackend};
//! use dkr_reload::config::AppConfig;
//!
//! let (backend, frontend) = ReloadBackend::new(AppConfig::default())?;
//! std::thread::spawn(move || backend.run());
//!
//! frontend.select_image("/home/dev/dkr/build/dkr.z64");
//!
//! for msg in frontend.drain() {
//!     match msg {
//!         BackendMessage::Status { text, severity } => println!("[{}] {}", severity, text),
//!         _ => {}
//!     }
//! }
//! ```

pub mod backoff;
pub mod dedup;
pub mod protocol;
pub mod sanitizer;
pub mod transport;
pub mod watcher;
pub mod worker;

pub use backoff::{BackoffPolicy, ReconnectScheduler};
pub use dedup::{OutputBuffer, OutputEdit};
pub use protocol::{Effect, LineEvent, Transition};
pub use sanitizer::sanitize_line;
pub use transport::{
    frame_user_input, SubprocessLauncher, SubprocessTransport, Transport, TransportEvent,
    TransportLauncher, TransportReader,
};
pub use watcher::HotReloadWatcher;
pub use worker::BackendWorker;

use crate::config::AppConfig;
use crate::error::Result;
use crate::types::{ConnectionState, Severity};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Message sent from the shell to the backend
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Use a new ROM image and (re)start the loader for it
    SelectImage(PathBuf),
    /// Send user text to the console
    SubmitInput(String),
    /// Stop the loader and shut the backend down
    Close,
}

/// Message sent from the backend to the shell
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Status line changed
    Status { text: String, severity: Severity },
    /// Output area changed
    Output(OutputEdit),
    /// User input became available or unavailable
    InputEnabled(bool),
    /// Session state changed
    ConnectionState(ConnectionState),
    /// A ROM image was selected
    ImageSelected { image: PathBuf, artifact: PathBuf },
    /// Unrecoverable error; the backend stops
    Fatal(String),
    /// Backend is shutting down
    Shutdown,
}

/// Shell-side handle to the backend
pub struct FrontendReceiver {
    /// Receiver for backend messages
    pub receiver: Receiver<BackendMessage>,
    /// Sender for commands to the backend
    pub command_sender: Sender<BackendCommand>,
}

impl FrontendReceiver {
    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<BackendMessage> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for a message
    ///
    /// Returns `None` on timeout and once the backend has gone away.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BackendMessage> {
        match self.receiver.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Receive all pending messages
    pub fn drain(&self) -> Vec<BackendMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.receiver.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Send a command to the backend
    pub fn send_command(&self, cmd: BackendCommand) -> bool {
        self.command_sender.send(cmd).is_ok()
    }

    /// Select a ROM image
    pub fn select_image(&self, image: impl Into<PathBuf>) {
        let _ = self
            .command_sender
            .send(BackendCommand::SelectImage(image.into()));
    }

    /// Submit user input
    pub fn submit_input(&self, text: impl Into<String>) {
        let _ = self
            .command_sender
            .send(BackendCommand::SubmitInput(text.into()));
    }

    /// Request that the session be closed
    ///
    /// Safe to call repeatedly and after the backend has stopped.
    pub fn request_close(&self) {
        let _ = self.command_sender.send(BackendCommand::Close);
    }
}

/// The reload backend that runs in a separate thread
pub struct ReloadBackend {
    worker: BackendWorker,
    running: Arc<AtomicBool>,
}

impl ReloadBackend {
    /// Create a backend that spawns the configured loader
    ///
    /// Fails with [`ReloadError::TransportSpawn`](crate::error::ReloadError::TransportSpawn)
    /// when the loader executable cannot be found.
    pub fn new(config: AppConfig) -> Result<(Self, FrontendReceiver)> {
        let launcher = SubprocessLauncher::from_config(&config.loader)?;
        tracing::info!("Using loader {:?}", launcher.program());
        Ok(Self::with_launcher(config, Box::new(launcher)))
    }

    /// Create a backend with a custom transport launcher
    pub fn with_launcher(
        config: AppConfig,
        launcher: Box<dyn TransportLauncher>,
    ) -> (Self, FrontendReceiver) {
        let (cmd_tx, cmd_rx) = bounded(256);
        // Human-scale traffic; a full queue means the shell stopped draining.
        let (msg_tx, msg_rx) = bounded(1024);
        let running = Arc::new(AtomicBool::new(true));

        let worker = BackendWorker::new(config, launcher, cmd_rx, msg_tx, running.clone());
        let backend = Self { worker, running };

        let frontend = FrontendReceiver {
            receiver: msg_rx,
            command_sender: cmd_tx,
        };

        (backend, frontend)
    }

    /// Run the backend loop until closed
    pub fn run(mut self) {
        self.worker.run();
    }

    /// Get a handle to stop the backend
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
