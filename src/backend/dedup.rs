//! Output deduplication
//!
//! The output area is one text block of `\r\n`-terminated lines. When the loader
//! repeats a line, the last line is rewritten as `line (2)`, `line (3)`, ...
//! instead of growing the block.
//!
//! The backend keeps an [`OutputBuffer`] mirror of what the presentation shell
//! displays and describes every mutation as an [`OutputEdit`], so the shell can
//! apply the same edit to its own copy. Edits only ever carry one line, and the
//! oldest lines are dropped once the buffer holds
//! [`DEFAULT_MAX_OUTPUT_LINES`].

use crate::error::ReloadError;
use crate::types::NEWLINE;

/// Lines kept before the oldest are dropped
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 10_000;

/// A mutation of the displayed output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEdit {
    /// Append a terminated line to the end of the output
    Append(String),
    /// Replace the last line with this terminated line
    ReplaceLast(String),
}

/// Ordered output lines as one text block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    text: String,
    lines: usize,
    max_lines: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_max_lines(DEFAULT_MAX_OUTPUT_LINES)
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer keeping at most `max_lines` lines (at least 2)
    pub fn with_max_lines(max_lines: usize) -> Self {
        Self {
            text: String::new(),
            lines: 0,
            max_lines: max_lines.max(2),
        }
    }

    /// The whole rendered text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of terminated lines held
    pub fn line_count(&self) -> usize {
        self.lines
    }

    /// Apply an edit produced by [`OutputBuffer::push_line`]
    pub fn apply(&mut self, edit: &OutputEdit) {
        match edit {
            OutputEdit::Append(line) => {
                self.text.push_str(line);
                self.lines += line.matches(NEWLINE).count();
                self.trim_front();
            }
            OutputEdit::ReplaceLast(line) => {
                match last_line_span(&self.text) {
                    Some((start, _)) => self.text.truncate(start),
                    None => self.text.clear(),
                }
                self.text.push_str(line);
                self.lines = self.lines.max(1);
            }
        }
    }

    /// Add a line, collapsing an immediate repeat into a counter
    ///
    /// Returns the edit that was applied, or `None` when the line was empty
    /// and dropped.
    pub fn push_line(&mut self, line: &str) -> Option<OutputEdit> {
        let content = line.strip_suffix(NEWLINE).unwrap_or(line);
        if content.trim_end_matches(['\r', '\n']).is_empty() {
            return None;
        }

        let edit = match collapse_repeat(&self.text, content) {
            Ok(Some(counted)) => OutputEdit::ReplaceLast(counted),
            Ok(None) => OutputEdit::Append(format!("{}{}", content, NEWLINE)),
            Err(e) => {
                tracing::warn!("Output counter not understood, appending instead: {}", e);
                OutputEdit::Append(format!("{}{}", content, NEWLINE))
            }
        };

        self.apply(&edit);
        Some(edit)
    }

    fn trim_front(&mut self) {
        while self.lines > self.max_lines {
            match self.text.find(NEWLINE) {
                Some(at) => {
                    self.text.drain(..at + NEWLINE.len());
                    self.lines -= 1;
                }
                None => break,
            }
        }
    }
}

/// Byte range of the last complete line, without its terminator
fn last_line_span(output: &str) -> Option<(usize, usize)> {
    let end = output.rfind(NEWLINE)?;
    let start = output[..end]
        .rfind(NEWLINE)
        .map_or(0, |at| at + NEWLINE.len());
    Some((start, end))
}

/// Count one more repeat of `line` on the last line of `output`
///
/// `line` carries no terminator. Returns the terminated replacement for the
/// last line, or `Ok(None)` when `line` is not a repeat of it, including when
/// `output` has no complete line yet. An unparseable `(N)` suffix is a
/// [`ReloadError::MalformedCounterState`].
pub fn collapse_repeat(output: &str, line: &str) -> Result<Option<String>, ReloadError> {
    let Some((start, end)) = last_line_span(output) else {
        return Ok(None);
    };
    let last_line = &output[start..end];

    let count = if last_line == line {
        2
    } else if last_line.starts_with(&format!("{} (", line)) {
        parse_counter(last_line)? + 1
    } else {
        return Ok(None);
    };

    Ok(Some(format!("{} ({}){}", line, count, NEWLINE)))
}

/// Read `N` from a trailing `(N)` suffix
fn parse_counter(last_line: &str) -> Result<u64, ReloadError> {
    let malformed = || ReloadError::MalformedCounterState(last_line.to_string());

    let open = last_line.rfind('(').ok_or_else(malformed)?;
    let close = last_line.rfind(')').ok_or_else(malformed)?;
    if close <= open {
        return Err(malformed());
    }

    last_line[open + 1..close].trim().parse().map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(lines: &[&str]) -> OutputBuffer {
        let mut buffer = OutputBuffer::new();
        for line in lines {
            buffer.push_line(line);
        }
        buffer
    }

    #[test]
    fn test_first_line_appends() {
        let mut buffer = OutputBuffer::new();
        let edit = buffer.push_line("Sent command\r\n");
        assert_eq!(edit, Some(OutputEdit::Append("Sent command\r\n".to_string())));
        assert_eq!(buffer.as_str(), "Sent command\r\n");
    }

    #[test]
    fn test_repeat_collapses_into_counter() {
        let buffer = buffer_with(&["X\r\n", "X\r\n"]);
        assert_eq!(buffer.as_str(), "X (2)\r\n");

        let buffer = buffer_with(&["X\r\n", "X\r\n", "X\r\n"]);
        assert_eq!(buffer.as_str(), "X (3)\r\n");
    }

    #[test]
    fn test_different_line_after_counter_appends() {
        let buffer = buffer_with(&["X\r\n", "X\r\n", "Y\r\n"]);
        assert_eq!(buffer.as_str(), "X (2)\r\nY\r\n");
    }

    #[test]
    fn test_counter_only_touches_last_line() {
        let buffer = buffer_with(&["A\r\n", "B\r\n", "B\r\n", "B\r\n"]);
        assert_eq!(buffer.as_str(), "A\r\nB (3)\r\n");
    }

    #[test]
    fn test_older_line_is_not_a_repeat() {
        let buffer = buffer_with(&["A\r\n", "B\r\n", "A\r\n"]);
        assert_eq!(buffer.as_str(), "A\r\nB\r\nA\r\n");
    }

    #[test]
    fn test_repeat_edit_carries_only_the_last_line() {
        let mut buffer = buffer_with(&["A\r\n", "B\r\n"]);
        let edit = buffer.push_line("B\r\n");
        assert_eq!(edit, Some(OutputEdit::ReplaceLast("B (2)\r\n".to_string())));
        assert_eq!(buffer.as_str(), "A\r\nB (2)\r\n");
    }

    #[test]
    fn test_unterminated_line_is_terminated() {
        let buffer = buffer_with(&["Hot reload!", "Hot reload!"]);
        assert_eq!(buffer.as_str(), "Hot reload! (2)\r\n");
    }

    #[test]
    fn test_empty_lines_dropped() {
        let mut buffer = OutputBuffer::new();
        assert_eq!(buffer.push_line(""), None);
        assert_eq!(buffer.push_line("\r\n"), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_no_history_is_never_duplicate() {
        assert_eq!(collapse_repeat("", "X").unwrap(), None);
        assert_eq!(collapse_repeat("X", "X").unwrap(), None);
    }

    #[test]
    fn test_malformed_counter_falls_back_to_append() {
        assert!(matches!(
            collapse_repeat("X (lots)\r\n", "X"),
            Err(ReloadError::MalformedCounterState(_))
        ));

        let mut buffer = buffer_with(&["X (lots)\r\n"]);
        let edit = buffer.push_line("X\r\n");
        assert_eq!(edit, Some(OutputEdit::Append("X\r\n".to_string())));
        assert_eq!(buffer.as_str(), "X (lots)\r\nX\r\n");
    }

    #[test]
    fn test_unclosed_counter_is_malformed() {
        assert!(collapse_repeat("X (4\r\n", "X").is_err());
    }

    #[test]
    fn test_oldest_lines_dropped_at_capacity() {
        let mut buffer = OutputBuffer::with_max_lines(3);
        for line in ["A\r\n", "B\r\n", "C\r\n", "D\r\n", "D\r\n"] {
            buffer.push_line(line);
        }
        assert_eq!(buffer.as_str(), "B\r\nC\r\nD (2)\r\n");
        assert_eq!(buffer.line_count(), 3);
    }

    #[test]
    fn test_apply_mirrors_push() {
        let mut core = OutputBuffer::with_max_lines(2);
        let mut shell = OutputBuffer::with_max_lines(2);
        for line in ["A\r\n", "A\r\n", "B\r\n", "B\r\n", "B\r\n", "C\r\n"] {
            if let Some(edit) = core.push_line(line) {
                shell.apply(&edit);
            }
        }
        assert_eq!(core, shell);
        assert_eq!(shell.as_str(), "B (3)\r\nC\r\n");
    }
}
