//! Loader protocol state machine
//!
//! Sanitized loader lines are classified against an ordered rule table (first
//! match wins, case-insensitive) and each classified line produces a
//! [`Transition`]: an optional new [`ConnectionState`] plus the effects the
//! worker must carry out. Classification is pure and independent of the
//! transport, so the table can be tested on plain strings.

use crate::types::{ConnectionState, Severity, FRAME_DELIMITER, NEWLINE};
use std::path::Path;

pub const STATUS_UPLOADING: &str = "Uploading ROM (Please wait...)";
pub const STATUS_READY: &str = "Ready";
pub const STATUS_HOT_RELOADING: &str = "Hot reloading ROM (Please wait...)";

/// How a rule looks at a lowercased line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Line starts with the pattern
    Prefix(&'static str),
    /// Line ends with the pattern, ignoring the line terminator
    Suffix(&'static str),
}

impl Matcher {
    /// Test an already lowercased line
    pub fn matches(&self, lower: &str) -> bool {
        match self {
            Matcher::Prefix(pattern) => lower.starts_with(pattern),
            Matcher::Suffix(pattern) => lower
                .strip_suffix(NEWLINE)
                .unwrap_or(lower)
                .ends_with(pattern),
        }
    }
}

/// Meaning of a classified loader line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    /// ROM upload began
    UploadStarted,
    /// Console entered debug mode after the upload
    DebugModeStarted,
    /// Loader found a flashcart
    CartAutodetected,
    /// Loader echoed a command it sent
    CommandSent,
    /// Console asks for the reload artifact
    HotReloadRequested,
    /// Console finished applying the reload
    HotReloadDone,
    /// Loader reported an error
    LoaderError,
}

/// One row of the classification table
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub matcher: Matcher,
    pub event: LineEvent,
    /// State to enter, `None` leaves it unchanged
    pub next: Option<ConnectionState>,
}

/// Classification table, evaluated top-down
pub const RULES: &[Rule] = &[
    Rule {
        matcher: Matcher::Prefix("uploading rom"),
        event: LineEvent::UploadStarted,
        next: Some(ConnectionState::Uploading),
    },
    Rule {
        matcher: Matcher::Prefix("debug mode started"),
        event: LineEvent::DebugModeStarted,
        next: Some(ConnectionState::Ready),
    },
    Rule {
        matcher: Matcher::Suffix("autodetected"),
        event: LineEvent::CartAutodetected,
        next: None,
    },
    Rule {
        matcher: Matcher::Prefix("sent command"),
        event: LineEvent::CommandSent,
        next: None,
    },
    Rule {
        matcher: Matcher::Prefix("send_hotreload"),
        event: LineEvent::HotReloadRequested,
        next: Some(ConnectionState::HotReloading),
    },
    Rule {
        matcher: Matcher::Prefix("hotreload_done"),
        event: LineEvent::HotReloadDone,
        next: Some(ConnectionState::Ready),
    },
    Rule {
        matcher: Matcher::Prefix("error:"),
        event: LineEvent::LoaderError,
        next: None,
    },
];

/// Find the first rule matching a sanitized line
pub fn classify(line: &str) -> Option<&'static Rule> {
    let lower = line.to_lowercase();
    RULES.iter().find(|rule| rule.matcher.matches(&lower))
}

/// Work the worker must do for a classified line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Replace the status text
    Status(String, Severity),
    /// Render a line in the output area
    Output(String),
    /// Allow user input again
    EnableInput,
    /// Check the reload artifact right away
    ArmWatcher,
    /// A new upload began, forget earlier reconnect attempts
    ResetReconnectAttempts,
    /// Write a command that is already framed
    SendFramed(String),
}

/// Outcome of one loader line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub event: LineEvent,
    pub next: Option<ConnectionState>,
    pub effects: Vec<Effect>,
}

/// Frame a payload as `@payload@`
pub fn frame_command(payload: &str) -> String {
    format!("{}{}{}", FRAME_DELIMITER, payload, FRAME_DELIMITER)
}

/// Classify `line` and describe what should happen
///
/// `artifact` is the current reload artifact, written back when the console
/// requests a hot reload. Unmatched lines yield `None`.
pub fn handle_line(line: &str, artifact: Option<&Path>) -> Option<Transition> {
    let rule = classify(line)?;

    let effects = match rule.event {
        LineEvent::UploadStarted => vec![
            Effect::ResetReconnectAttempts,
            Effect::Status(STATUS_UPLOADING.to_string(), Severity::Normal),
        ],
        LineEvent::DebugModeStarted | LineEvent::HotReloadDone => vec![
            Effect::Status(STATUS_READY.to_string(), Severity::Success),
            Effect::EnableInput,
            Effect::ArmWatcher,
        ],
        LineEvent::CartAutodetected | LineEvent::CommandSent | LineEvent::LoaderError => {
            vec![Effect::Output(line.to_string())]
        }
        LineEvent::HotReloadRequested => {
            let mut effects = vec![Effect::Status(
                STATUS_HOT_RELOADING.to_string(),
                Severity::Action,
            )];
            match artifact {
                Some(path) => effects.push(Effect::SendFramed(frame_command(
                    &path.to_string_lossy(),
                ))),
                None => tracing::warn!("Hot reload requested but no artifact path is known"),
            }
            effects
        }
    };

    Some(Transition {
        event: rule.event,
        next: rule.next,
        effects,
    })
}
