use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;

use crate::api::common::{open_upstream_stream, sse_ok_response};
use crate::error::RelayError;
use crate::observability::log_stream_start;
use crate::protocol::ChatRequest;
use crate::state::AppState;
use crate::stream::{sse_body_stream, transcode_stream};

/// `POST /chat/api`: relay one chat completion as normalized SSE.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match stream_response(&state, &body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!("chat request failed: {err}");
            err.into_response()
        }
    }
}

async fn stream_response(state: &AppState, body: &[u8]) -> Result<Response, RelayError> {
    let request = ChatRequest::from_slice(body)?;
    let upstream = open_upstream_stream(state, &request).await?;
    log_stream_start(&upstream.request_id, upstream.provider, &upstream.model, "sse");

    let events = transcode_stream(upstream.body, upstream.provider.adapter());
    let body = Body::from_stream(sse_body_stream(events).map(Ok::<_, Infallible>));
    Ok(sse_ok_response(body))
}
