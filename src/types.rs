//! Core value types shared by the backend and the presentation shell
//!
//! # Main Types
//!
//! - [`ConnectionState`] - Session state driven by loader output
//! - [`Severity`] - Advisory rendering hint for status text
//!
//! The wire constants ([`NEWLINE`], [`FRAME_DELIMITER`], [`PAD_CHAR`]) are fixed
//! by the loader's line protocol and are not configurable.

/// Line terminator used by the loader in both directions
pub const NEWLINE: &str = "\r\n";

/// Delimiter wrapping pre-framed commands (`@payload@`)
pub const FRAME_DELIMITER: char = '@';

/// Filler used to align raw user input on the wire
pub const PAD_CHAR: char = '_';

/// Command sent to the loader when the build artifact changes
pub const HOT_RELOAD_COMMAND: &str = "hot";

/// State of the session with the development console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No loader process is running
    #[default]
    Disconnected,
    /// Loader just spawned, nothing classified yet
    Started,
    /// ROM upload in progress
    Uploading,
    /// Debug mode active, user input and hot reload available
    Ready,
    /// A reload artifact has been handed to the loader
    HotReloading,
}

impl ConnectionState {
    /// Whether user input should be accepted in this state
    pub fn accepts_input(self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Started => write!(f, "Started"),
            ConnectionState::Uploading => write!(f, "Uploading"),
            ConnectionState::Ready => write!(f, "Ready"),
            ConnectionState::HotReloading => write!(f, "Hot reloading"),
        }
    }
}

/// How a status message should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Normal,
    Success,
    Failure,
    Action,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Success => write!(f, "success"),
            Severity::Failure => write!(f, "failure"),
            Severity::Action => write!(f, "action"),
        }
    }
}
