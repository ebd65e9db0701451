//! Backend Worker Thread Implementation
//!
//! This module contains the control loop that owns the [`Session`] and runs in
//! a separate thread from the shell. It communicates with the shell through
//! crossbeam channels.
//!
//! # Responsibilities
//!
//! The worker thread handles:
//!
//! - **Command processing**: Responds to shell commands (select image, input, close)
//! - **Line handling**: Sanitizes loader output and applies protocol transitions
//! - **Hot reload**: Polls the reload artifact while the session is `Ready`
//! - **Reconnects**: Respawns the loader after it dies, with linear backoff
//!
//! # Event Sources
//!
//! A single `select!` waits on four sources, so no session field is ever
//! touched from two threads:
//!
//! - shell commands
//! - [`TransportEvent`]s from the reader thread of the live transport
//! - a fixed tick for the hot-reload watcher
//! - the pending reconnect deadline, if any
//!
//! Each spawned transport gets a new generation. Events from older
//! generations belong to transports that were closed on purpose and are
//! ignored, so only a real death schedules a reconnect.

use crate::backend::backoff::{reconnect_status, BackoffPolicy, ReconnectScheduler};
use crate::backend::dedup::OutputBuffer;
use crate::backend::protocol::{self, Effect, Transition};
use crate::backend::sanitizer::sanitize_line;
use crate::backend::transport::{frame_user_input, Transport, TransportEvent, TransportLauncher};
use crate::backend::watcher::{HotReloadWatcher, HOT_RELOAD_NOTICE};
use crate::backend::{BackendCommand, BackendMessage};
use crate::config::AppConfig;
use crate::error::ReloadError;
use crate::session::Session;
use crate::types::{ConnectionState, Severity, HOT_RELOAD_COMMAND};
use crossbeam_channel::{after, never, select, tick, unbounded, Receiver, RecvError, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub const STATUS_STARTED: &str = "Started";
pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const STATUS_SELECT_IMAGE: &str = "Please select a ROM file.";

/// What woke the control loop
enum Wakeup {
    Command(Result<BackendCommand, RecvError>),
    Transport(Result<TransportEvent, RecvError>),
    Tick,
    ReconnectDue,
}

/// Backend worker that owns the session
pub struct BackendWorker {
    /// Application configuration
    config: AppConfig,
    /// Command receiver from the shell
    command_rx: Receiver<BackendCommand>,
    /// Message sender to the shell
    message_tx: Sender<BackendMessage>,
    /// Transport events, cloned into every launched transport
    event_tx: Sender<TransportEvent>,
    event_rx: Receiver<TransportEvent>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Spawns loader connections
    launcher: Box<dyn TransportLauncher>,
    /// Live loader connection
    transport: Option<Box<dyn Transport>>,
    /// Generation of the most recently spawned transport
    generation: u64,
    session: Session,
    output: OutputBuffer,
    watcher: HotReloadWatcher,
    reconnect: ReconnectScheduler,
    input_enabled: bool,
}

impl BackendWorker {
    /// Create a new backend worker
    pub fn new(
        config: AppConfig,
        launcher: Box<dyn TransportLauncher>,
        command_rx: Receiver<BackendCommand>,
        message_tx: Sender<BackendMessage>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let (event_tx, event_rx) = unbounded();
        let session = Session::new(config.hot_reload.artifact_file_name.clone());
        let reconnect = ReconnectScheduler::new(BackoffPolicy::from(&config.reconnect));

        Self {
            config,
            command_rx,
            message_tx,
            event_tx,
            event_rx,
            running,
            launcher,
            transport: None,
            generation: 0,
            session,
            output: OutputBuffer::new(),
            watcher: HotReloadWatcher::new(),
            reconnect,
            input_enabled: false,
        }
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        tracing::info!("Backend worker started");

        if self.session.image().is_none() {
            self.send_status(STATUS_SELECT_IMAGE, Severity::Normal);
        }

        let ticker = tick(self.config.hot_reload.poll_interval());

        while self.running.load(Ordering::SeqCst) {
            let reconnect_timer = match self.reconnect.deadline() {
                Some(deadline) => after(deadline.saturating_duration_since(Instant::now())),
                None => never(),
            };

            let wakeup = select! {
                recv(self.command_rx) -> cmd => Wakeup::Command(cmd),
                recv(self.event_rx) -> event => Wakeup::Transport(event),
                recv(ticker) -> _ => Wakeup::Tick,
                recv(reconnect_timer) -> _ => Wakeup::ReconnectDue,
            };

            match wakeup {
                Wakeup::Command(Ok(cmd)) => self.handle_command(cmd),
                Wakeup::Command(Err(_)) => {
                    tracing::info!("Shell went away, shutting down");
                    self.close_session();
                    self.running.store(false, Ordering::SeqCst);
                }
                Wakeup::Transport(Ok(event)) => self.handle_transport_event(event),
                // The worker holds a sender, so this never disconnects.
                Wakeup::Transport(Err(_)) => {}
                Wakeup::Tick => self.on_tick(),
                Wakeup::ReconnectDue => self.on_reconnect_due(),
            }
        }

        // Cleanup
        self.close_session();

        let _ = self.send_message(BackendMessage::Shutdown);
        tracing::info!("Backend worker stopped");
    }

    /// Handle a command from the shell
    fn handle_command(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::SelectImage(image) => self.select_image(image),
            BackendCommand::SubmitInput(text) => {
                if self.input_enabled && self.session.state().accepts_input() {
                    self.submit_input(&text);
                } else {
                    tracing::warn!(state = %self.session.state(), "Console input is disabled, dropping {:?}", text);
                }
            }
            BackendCommand::Close => {
                tracing::info!("Close requested");
                self.close_session();
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Switch to a new image and start a loader for it
    fn select_image(&mut self, image: PathBuf) {
        self.reconnect.cancel();
        self.close_transport();

        let artifact = self.session.select_image(image).to_path_buf();
        self.watcher.set_artifact(&artifact);

        let image = self.session.image().map(|p| p.to_path_buf()).unwrap_or_default();
        tracing::info!("Selected image {:?} (artifact {:?})", image, artifact);
        let _ = self.send_message(BackendMessage::ImageSelected { image, artifact });

        self.start_transport();
    }

    /// Spawn a loader for the selected image unless one is already live
    fn start_transport(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if transport.is_alive() {
                tracing::debug!("Transport already live, not respawning");
                return;
            }
            self.close_transport();
        }

        let Some(image) = self.session.image().map(|p| p.to_path_buf()) else {
            self.send_status(STATUS_SELECT_IMAGE, Severity::Normal);
            return;
        };

        self.generation += 1;
        match self
            .launcher
            .launch(&image, self.generation, self.event_tx.clone())
        {
            Ok(transport) => {
                tracing::info!(generation = self.generation, "Transport started for {:?}", image);
                self.transport = Some(transport);
                self.update_state(ConnectionState::Started);
                self.send_status(STATUS_STARTED, Severity::Normal);
                self.set_input_enabled(false);
            }
            Err(e) if e.is_fatal() => self.fail(e),
            Err(e) => {
                tracing::warn!(generation = self.generation, "{}", e);
                self.disconnected();
                self.schedule_reconnect();
            }
        }
    }

    /// Report an unrecoverable error and stop the loop
    fn fail(&mut self, error: ReloadError) {
        tracing::error!("{}", error);
        self.update_state(ConnectionState::Disconnected);
        self.set_input_enabled(false);
        let _ = self.send_message(BackendMessage::Fatal(error.to_string()));
        self.running.store(false, Ordering::SeqCst);
    }

    /// Handle output from a transport
    fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.transport.is_none() || event.generation() != self.generation {
            tracing::trace!(generation = event.generation(), "Ignoring event from a closed transport");
            return;
        }

        match event {
            TransportEvent::Line { line, .. } => self.handle_line(&line),
            TransportEvent::Closed { .. } => self.on_transport_lost(),
        }
    }

    /// Sanitize and classify one loader line
    fn handle_line(&mut self, raw: &str) {
        let line = sanitize_line(raw);
        tracing::trace!(raw = ?raw, line = ?line, "Loader line");

        if let Some(transition) = protocol::handle_line(&line, self.session.artifact()) {
            self.apply_transition(transition);
        }
    }

    fn apply_transition(&mut self, transition: Transition) {
        tracing::debug!(event = ?transition.event, "Loader event");

        if let Some(next) = transition.next {
            self.update_state(next);
        }

        for effect in transition.effects {
            match effect {
                Effect::Status(text, severity) => self.send_status(&text, severity),
                Effect::Output(line) => self.push_output(&line),
                Effect::EnableInput => self.set_input_enabled(true),
                Effect::ArmWatcher => self.check_for_reload(),
                Effect::ResetReconnectAttempts => self.session.reconnect_attempts = 0,
                Effect::SendFramed(command) => self.write(&command),
            }
        }
    }

    /// Periodic watcher tick
    fn on_tick(&mut self) {
        self.check_for_reload();
    }

    /// Poll the artifact and send a reload command if it changed
    fn check_for_reload(&mut self) {
        if self.session.state() != ConnectionState::Ready {
            return;
        }

        if self.watcher.poll() {
            tracing::info!("Reload artifact changed, requesting hot reload");
            self.push_output(HOT_RELOAD_NOTICE);
            // Internal command, sent even though the console input is gated.
            if let Some(framed) = frame_user_input(HOT_RELOAD_COMMAND) {
                self.write(&framed);
            }
        }
    }

    /// Frame and send user text
    fn submit_input(&mut self, text: &str) {
        match frame_user_input(text) {
            Some(framed) => self.write(&framed),
            None => tracing::debug!("Ignoring empty input"),
        }
    }

    /// Write one line to the live transport
    ///
    /// Failures are only logged; the reader thread reports the death.
    fn write(&mut self, text: &str) {
        let Some(transport) = self.transport.as_mut() else {
            tracing::warn!("Dropping {:?}: {}", text, ReloadError::NoTransport);
            return;
        };

        if let Err(e) = transport.write_line(text) {
            tracing::warn!("{}", e);
        }
    }

    /// The live transport died on its own
    fn on_transport_lost(&mut self) {
        tracing::warn!(generation = self.generation, "{}", ReloadError::TransportLost);
        self.close_transport();
        self.disconnected();
        self.schedule_reconnect();
    }

    fn disconnected(&mut self) {
        self.update_state(ConnectionState::Disconnected);
        self.send_status(STATUS_DISCONNECTED, Severity::Failure);
        self.set_input_enabled(false);
    }

    fn schedule_reconnect(&mut self) {
        if self
            .reconnect
            .schedule(&mut self.session.reconnect_attempts, Instant::now())
            .is_some()
        {
            let status = reconnect_status(self.session.reconnect_attempts);
            self.send_status(&status, Severity::Normal);
        }
    }

    fn on_reconnect_due(&mut self) {
        if self.reconnect.take_due(Instant::now()) {
            tracing::info!(attempt = self.session.reconnect_attempts, "Reconnecting");
            self.start_transport();
        }
    }

    /// Close the live transport without treating it as a death
    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            tracing::debug!(generation = self.generation, "Closing transport");
            transport.close();
        }
    }

    /// Stop everything; safe to call in any state and more than once
    fn close_session(&mut self) {
        self.reconnect.cancel();
        self.close_transport();
        self.update_state(ConnectionState::Disconnected);
        self.set_input_enabled(false);
    }

    fn update_state(&mut self, state: ConnectionState) {
        if self.session.set_state(state) {
            let _ = self.send_message(BackendMessage::ConnectionState(state));
        }
    }

    fn send_status(&self, text: &str, severity: Severity) {
        let _ = self.send_message(BackendMessage::Status {
            text: text.to_string(),
            severity,
        });
    }

    /// Send a message to the shell, logging if it is gone
    fn send_message(&self, msg: BackendMessage) -> crate::error::Result<()> {
        self.message_tx.send(msg).map_err(|e| {
            let error = ReloadError::Channel(format!("shell stopped listening, dropped {:?}", e.0));
            tracing::warn!("{}", error);
            error
        })
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        if self.input_enabled != enabled {
            self.input_enabled = enabled;
            let _ = self.send_message(BackendMessage::InputEnabled(enabled));
        }
    }

    fn push_output(&mut self, line: &str) {
        if let Some(edit) = self.output.push_line(line) {
            let _ = self.send_message(BackendMessage::Output(edit));
        }
    }
}
