pub mod frame;
pub mod lines;
pub mod sse;
pub mod subscription;
pub mod transcoder;

pub use frame::{parse_event_line, EventFrame};
pub use lines::LineReassembler;
pub use sse::{encode_normalized_event, sse_body_stream};
pub use subscription::{delta_sequence, ChatDelta};
pub use transcoder::{transcode_stream, StreamTranscoder, TranscodeState};

use serde::Serialize;
use serde_json::Value;

const FALLBACK_ERROR_MESSAGE: &str = "upstream stream failed";

/// An incremental text fragment, with the upstream identifiers copied verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentDelta {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Value>,
}

/// The reason a choice stopped generating.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishDelta {
    pub finish_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// Provider-independent stream event.
///
/// `Content` and `Finish` may repeat. Exactly one of `Done` or `Error` ends
/// every transcoded stream.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    Content(ContentDelta),
    Finish(FinishDelta),
    Error { message: String },
    Done,
}

impl NormalizedEvent {
    /// Build a terminal error event; an empty message is replaced so the
    /// caller always sees some diagnostic text.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = FALLBACK_ERROR_MESSAGE.to_owned();
        }
        Self::Error { message }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}
