//! Lazy-sequence mode for subscription-style consumers.
//!
//! The sequence yields only non-terminal deltas. Upstream completion and
//! unrecoverable errors both end it without a distinguished final item.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use super::sse::named_frame;
use super::NormalizedEvent;

/// Frame closing a subscription operation on the SSE transport.
pub const COMPLETE_FRAME: &str = "event: complete\ndata: \n\n";

/// One item of the subscription field. Every field but `id` is nullable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatDelta {
    pub content: Option<String>,
    pub id: String,
    pub model: Option<Value>,
    pub created: Option<Value>,
    pub finish_reason: Option<String>,
}

fn id_string(id: Option<Value>) -> String {
    match id {
        Some(Value::String(id)) => id,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl ChatDelta {
    /// Map a non-terminal event; terminal events have no item form.
    #[must_use]
    pub fn from_event(event: NormalizedEvent) -> Option<Self> {
        match event {
            NormalizedEvent::Content(delta) => Some(Self {
                content: Some(delta.content),
                id: id_string(delta.id),
                model: delta.model,
                created: delta.created,
                finish_reason: None,
            }),
            NormalizedEvent::Finish(delta) => Some(Self {
                content: None,
                id: id_string(delta.id),
                model: None,
                created: None,
                finish_reason: Some(delta.finish_reason),
            }),
            NormalizedEvent::Done | NormalizedEvent::Error { .. } => None,
        }
    }
}

/// Finite, single-pass sequence of deltas; ends at the first terminal event.
///
/// Dropping the sequence drops the underlying event stream and with it the
/// upstream body.
pub fn delta_sequence<S>(events: S) -> impl Stream<Item = ChatDelta> + Send
where
    S: Stream<Item = NormalizedEvent> + Send + 'static,
{
    let events: Pin<Box<S>> = Box::pin(events);
    futures_util::stream::unfold(events, |mut events| async move {
        match events.as_mut().next().await? {
            NormalizedEvent::Error { message } => {
                tracing::warn!("subscription stream ended by upstream error: {message}");
                None
            }
            event => ChatDelta::from_event(event).map(|delta| (delta, events)),
        }
    })
}

#[derive(Serialize)]
struct NextPayload<'a> {
    data: std::collections::BTreeMap<&'a str, &'a ChatDelta>,
}

/// Encode one item as a `next` frame: `{"data":{<field>:<item>}}`.
#[must_use]
pub fn next_frame(field: &str, delta: &ChatDelta) -> String {
    let mut data = std::collections::BTreeMap::new();
    data.insert(field, delta);
    match serde_json::to_string(&NextPayload { data }) {
        Ok(json) => named_frame("next", &json),
        Err(err) => {
            tracing::error!("failed to serialize subscription item: {err}");
            String::new()
        }
    }
}

/// Serialize a delta sequence as SSE-over-subscription frames, closing
/// with [`COMPLETE_FRAME`] once the sequence ends.
pub fn subscription_sse_stream<S>(field: &'static str, deltas: S) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = ChatDelta> + Send + 'static,
{
    deltas
        .map(move |delta| Bytes::from(next_frame(field, &delta)))
        .filter(|frame| futures_util::future::ready(!frame.is_empty()))
        .chain(futures_util::stream::once(futures_util::future::ready(
            Bytes::from_static(COMPLETE_FRAME.as_bytes()),
        )))
}
