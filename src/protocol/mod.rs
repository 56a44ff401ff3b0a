pub mod openai_compat;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::stream::NormalizedEvent;

pub use openai_compat::OpenAiCompatAdapter;

/// Which upstream provider a request is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    #[default]
    DeepSeek,
    ChatGpt,
}

static OPENAI_COMPAT: OpenAiCompatAdapter = OpenAiCompatAdapter;

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::DeepSeek, ProviderKind::ChatGpt];

    /// Resolve the request's variant tag. A missing or blank tag selects
    /// DeepSeek.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for an unknown tag.
    pub fn from_tag(tag: Option<&str>) -> Result<Self, RelayError> {
        let tag = tag.map(str::trim).unwrap_or_default();
        if tag.is_empty() || tag.eq_ignore_ascii_case("deepseek") {
            Ok(Self::DeepSeek)
        } else if tag.eq_ignore_ascii_case("chatgpt") {
            Ok(Self::ChatGpt)
        } else {
            Err(RelayError::InvalidRequest(format!(
                "unknown provider type '{tag}'; expected 'deepseek' or 'chatgpt'"
            )))
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek",
            Self::ChatGpt => "chatgpt",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::DeepSeek => "DeepSeek",
            Self::ChatGpt => "ChatGPT",
        }
    }

    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::ChatGpt => "https://api.openai.com/v1",
        }
    }

    /// Model used when the caller does not pick one.
    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek-chat",
            Self::ChatGpt => "gpt-5",
        }
    }

    /// Delta extraction strategy for this provider's stream payloads.
    #[must_use]
    pub fn adapter(self) -> &'static dyn DeltaAdapter {
        match self {
            Self::DeepSeek | Self::ChatGpt => &OPENAI_COMPAT,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps one upstream `data:` payload to zero or more normalized events.
pub trait DeltaAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parse `payload` and append the events it carries to `out`, in the
    /// order the client should see them.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when `payload` does not parse. The transcoder
    /// treats this as a skippable line, never as a stream failure.
    fn extract_deltas(
        &self,
        payload: &str,
        out: &mut Vec<NormalizedEvent>,
    ) -> Result<(), serde_json::Error>;
}

/// One role/content pair of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body accepted by the chat endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub token: String,
    #[serde(default, rename = "type")]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ChatRequest {
    /// Parse a request body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] when the body is not a valid
    /// chat request.
    pub fn from_slice(body: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(body)
            .map_err(|err| RelayError::InvalidRequest(format!("invalid chat request body: {err}")))
    }

    /// The caller's model choice, if it made a non-blank one.
    #[must_use]
    pub fn requested_model(&self) -> Option<&str> {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
    }
}

/// Body POSTed to the upstream `chat/completions` endpoint.
#[derive(Debug, Serialize)]
pub struct UpstreamChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}
