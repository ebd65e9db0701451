//! Line sanitizer for raw loader output
//!
//! The loader writes to a terminal, so its lines carry VT100 escape sequences,
//! repeated error prefixes and bell-terminated prompt noise. [`sanitize_line`]
//! reduces a raw line to what should be classified and displayed.

use once_cell::sync::Lazy;
use regex::Regex;

/// Substring marking an error message from the loader
pub const ERROR_MARKER: &str = "Error:";

/// Alert/bell control character ending prompt noise
pub const BELL: char = '\x07';

/// Two-character escapes and CSI sequences
static RE_ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap());

/// Remove ANSI/VT100 escape sequences
pub fn strip_ansi(line: &str) -> std::borrow::Cow<'_, str> {
    RE_ANSI_ESCAPE.replace_all(line, "")
}

/// Produce a display-ready line from raw loader output
///
/// Escape sequences are removed first. Then only the text from the last
/// `Error:` onwards is kept, and finally everything up to and including the
/// last bell character is dropped. Never fails; odd input just gets shorter.
pub fn sanitize_line(raw: &str) -> String {
    let stripped = strip_ansi(raw);
    let mut text: &str = &stripped;

    if let Some(at) = text.rfind(ERROR_MARKER) {
        text = &text[at..];
    }

    if let Some(at) = text.rfind(BELL) {
        text = &text[at + BELL.len_utf8()..];
    }

    text.to_string()
}
