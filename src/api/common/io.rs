use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::error::RelayError;
use crate::protocol::{ChatRequest, ProviderKind, UpstreamChatRequest};
use crate::state::AppState;
use crate::util::truncate_for_log;

const MAX_LOGGED_ERROR_CHARS: usize = 500;

/// An accepted upstream response whose body has not been read yet.
pub(crate) struct UpstreamStream {
    pub(crate) provider: ProviderKind,
    pub(crate) model: String,
    pub(crate) request_id: uuid::Uuid,
    pub(crate) body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

/// Resolve provider, model and credential for `request`, then open the
/// upstream streaming call.
///
/// Everything that can fail before the first downstream byte fails here.
pub(crate) async fn open_upstream_stream(
    state: &AppState,
    request: &ChatRequest,
) -> Result<UpstreamStream, RelayError> {
    let provider = ProviderKind::from_tag(request.provider.as_deref())?;
    let upstream = state.upstream(provider);
    let headers = upstream.headers_for_token(&request.token)?;
    let model = upstream.resolve_model(request.requested_model()).to_owned();
    let request_id = state.next_request_id();

    let body = serde_json::to_vec(&UpstreamChatRequest {
        model: &model,
        messages: &request.messages,
        stream: true,
    })
    .map_err(|err| RelayError::Internal(format!("Failed to encode upstream request: {err}")))?;

    tracing::debug!(
        request_id = %request_id,
        provider = provider.as_str(),
        url = %upstream.completions_url(),
        messages = request.messages.len(),
        "opening upstream stream"
    );

    let response = state
        .transport
        .send_stream(upstream.completions_url(), headers, Bytes::from(body))
        .await?;

    let status = response.status();
    if !status.is_success() {
        let detail = match response.bytes().await {
            Ok(body) => sanitize_upstream_error(&body),
            Err(err) => format!("<unreadable error body: {err}>"),
        };
        tracing::error!(
            request_id = %request_id,
            provider = provider.as_str(),
            status = status.as_u16(),
            "{} API error: {detail}",
            provider.display_name()
        );
        return Err(RelayError::Upstream {
            provider: provider.display_name(),
            status: status.as_u16(),
        });
    }

    Ok(UpstreamStream {
        provider,
        model,
        request_id,
        body: response.bytes_stream().boxed(),
    })
}

/// Reduce an upstream error body to something safe to log.
///
/// Prefers the JSON `error.message` field; falls back to the raw text.
/// Either way the result is capped at 500 characters.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return truncate_for_log(msg, MAX_LOGGED_ERROR_CHARS).into_owned();
        }
    }
    let text = String::from_utf8_lossy(body);
    truncate_for_log(text.trim(), MAX_LOGGED_ERROR_CHARS).into_owned()
}
