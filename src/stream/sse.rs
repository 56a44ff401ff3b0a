//! SSE (Server-Sent Events) frame encoding for normalized events.
//!
//! Wire shapes produced for the client:
//! - content: `data: {"content","id","model","created"}\n\n`
//! - finish: `event: finish\ndata: {"finish_reason","id"}\n\n`
//! - done: `event: done\ndata: [DONE]\n\n`
//! - error: `event: error\ndata: {"error":"..."}\n\n`

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;

use super::NormalizedEvent;

/// Terminal frame for normal completion.
pub const DONE_FRAME: &str = "event: done\ndata: [DONE]\n\n";

#[derive(Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

/// Format an unnamed SSE frame (just data).
#[must_use]
pub fn data_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// Format an SSE frame with a named event type.
#[must_use]
pub fn named_frame(event_type: &str, data: &str) -> String {
    let mut out = String::with_capacity(16 + event_type.len() + data.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(data);
    out.push_str("\n\n");
    out
}

/// Format the terminal error frame.
#[must_use]
pub fn error_frame(message: &str) -> String {
    let json = serde_json::to_string(&ErrorPayload { error: message })
        .unwrap_or_else(|_| String::from("{\"error\":\"stream error\"}"));
    named_frame("error", &json)
}

/// Encode one normalized event as SSE wire text.
#[must_use]
pub fn encode_normalized_event(event: &NormalizedEvent) -> String {
    let encoded = match event {
        NormalizedEvent::Content(delta) => serde_json::to_string(delta).map(|json| data_frame(&json)),
        NormalizedEvent::Finish(delta) => {
            serde_json::to_string(delta).map(|json| named_frame("finish", &json))
        }
        NormalizedEvent::Done => return DONE_FRAME.to_owned(),
        NormalizedEvent::Error { message } => return error_frame(message),
    };
    encoded.unwrap_or_else(|err| {
        tracing::error!("failed to serialize stream event: {err}");
        error_frame(&format!("failed to serialize stream event: {err}"))
    })
}

/// Turn a normalized event stream into SSE body bytes.
///
/// Events are encoded one frame per item in arrival order; the body ends
/// right after the terminal frame.
pub fn sse_body_stream<S>(events: S) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = NormalizedEvent> + Send + 'static,
{
    events.map(|event| Bytes::from(encode_normalized_event(&event)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ContentDelta, FinishDelta};
    use serde_json::json;

    #[test]
    fn test_content_frame() {
        let event = NormalizedEvent::Content(ContentDelta {
            content: "Hi".to_string(),
            id: Some(json!("1")),
            model: Some(json!("m")),
            created: Some(json!(1)),
        });
        assert_eq!(
            encode_normalized_event(&event),
            "data: {\"content\":\"Hi\",\"id\":\"1\",\"model\":\"m\",\"created\":1}\n\n"
        );
    }

    #[test]
    fn test_finish_frame() {
        let event = NormalizedEvent::Finish(FinishDelta {
            finish_reason: "stop".to_string(),
            id: Some(json!("1")),
        });
        assert_eq!(
            encode_normalized_event(&event),
            "event: finish\ndata: {\"finish_reason\":\"stop\",\"id\":\"1\"}\n\n"
        );
    }

    #[test]
    fn test_done_frame() {
        assert_eq!(
            encode_normalized_event(&NormalizedEvent::Done),
            "event: done\ndata: [DONE]\n\n"
        );
    }

    #[test]
    fn test_error_frame_escapes_message() {
        let event = NormalizedEvent::error("bad \"quote\"\nline");
        assert_eq!(
            encode_normalized_event(&event),
            "event: error\ndata: {\"error\":\"bad \\\"quote\\\"\\nline\"}\n\n"
        );
    }

    #[test]
    fn test_content_with_newline_stays_single_data_line() {
        let event = NormalizedEvent::Content(ContentDelta {
            content: "a\nb".to_string(),
            id: None,
            model: None,
            created: None,
        });
        let frame = encode_normalized_event(&event);
        assert_eq!(frame, "data: {\"content\":\"a\\nb\"}\n\n");
        assert_eq!(frame.matches('\n').count(), 2);
    }

    #[tokio::test]
    async fn test_sse_body_stream_preserves_order() {
        let events = futures_util::stream::iter(vec![
            NormalizedEvent::Content(ContentDelta {
                content: "x".to_string(),
                id: None,
                model: None,
                created: None,
            }),
            NormalizedEvent::Done,
        ]);
        let frames: Vec<Bytes> = sse_body_stream(events).collect().await;
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"data: {\"content\":\"x\"}\n\n"),
                Bytes::from_static(b"event: done\ndata: [DONE]\n\n"),
            ]
        );
    }
}
