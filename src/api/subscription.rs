use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::api::common::{open_upstream_stream, sse_ok_response};
use crate::error::RelayError;
use crate::observability::log_stream_start;
use crate::protocol::ChatRequest;
use crate::state::AppState;
use crate::stream::subscription::subscription_sse_stream;
use crate::stream::{delta_sequence, transcode_stream, ChatDelta};

/// Name of the subscription field the deltas are published under.
pub const CHAT_STREAM_FIELD: &str = "chatStream";

/// Resolve the `chatStream` subscription: a lazy, finite sequence of deltas.
///
/// The upstream call is opened before this returns, so setup failures
/// surface as `Err`. A failure after that simply ends the sequence.
///
/// # Errors
///
/// Returns the same setup errors as `POST /chat/api`.
pub async fn chat_stream(
    state: &AppState,
    request: &ChatRequest,
) -> Result<BoxStream<'static, ChatDelta>, RelayError> {
    let upstream = open_upstream_stream(state, request).await?;
    log_stream_start(
        &upstream.request_id,
        upstream.provider,
        &upstream.model,
        "subscription",
    );
    Ok(delta_sequence(transcode_stream(upstream.body, upstream.provider.adapter())).boxed())
}

/// `POST /chat/subscribe`: serve [`chat_stream`] as `next`/`complete` frames.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let result = match ChatRequest::from_slice(&body) {
        Ok(request) => chat_stream(&state, &request).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(deltas) => {
            let frames = subscription_sse_stream(CHAT_STREAM_FIELD, deltas);
            sse_ok_response(Body::from_stream(frames.map(Ok::<_, Infallible>)))
        }
        Err(err) => {
            tracing::error!("chat subscription failed: {err}");
            err.into_response()
        }
    }
}
