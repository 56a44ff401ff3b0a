//! Event frame recognition for reassembled upstream lines.
//!
//! Only the `data: ` field is interpreted. `event:`, `id:`, `retry:` and
//! comment lines are dropped, as is anything else without the prefix.

/// Field prefix recognized on upstream lines (case-sensitive, one space).
pub const DATA_PREFIX: &str = "data: ";

/// Payload value that marks the end of the upstream event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A recognized upstream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFrame<'a> {
    /// Payload text after the `data: ` prefix, not yet parsed as JSON.
    Data(&'a str),
    /// `data: [DONE]`.
    Terminator,
}

/// Classify one logical line.
///
/// Returns `None` for blank lines and for lines without the `data: ` prefix.
/// A leading byte-order mark counts as whitespace.
#[must_use]
pub fn parse_event_line(line: &str) -> Option<EventFrame<'_>> {
    let trimmed = line.trim_matches(|c: char| c.is_whitespace() || c == '\u{FEFF}');
    if trimmed.is_empty() {
        return None;
    }
    let payload = trimmed.strip_prefix(DATA_PREFIX)?;
    if payload == DONE_SENTINEL {
        Some(EventFrame::Terminator)
    } else {
        Some(EventFrame::Data(payload))
    }
}
