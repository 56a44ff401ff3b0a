use http::{HeaderMap, HeaderValue};

use crate::config::{ConfigError, ProviderConfig, ProvidersConfig};
use crate::error::RelayError;
use crate::protocol::ProviderKind;

/// Precomputed upstream metadata used by the request path.
#[derive(Debug, Clone)]
pub struct PreparedUpstream {
    completions_url: url::Url,
    default_model: String,
    api_key: Option<String>,
    static_headers: HeaderMap,
}

impl PreparedUpstream {
    /// Build a prepared upstream from provider configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the base URL does not form a
    /// valid completions URL.
    pub fn new(kind: ProviderKind, provider: &ProviderConfig) -> Result<Self, ConfigError> {
        let base = provider.base_url_or_default(kind).trim().trim_end_matches('/');
        let completions_url = url::Url::parse(&format!("{base}/chat/completions")).map_err(|err| {
            ConfigError::Validation(format!(
                "providers.{kind}.base_url does not form a valid completions URL: {err}"
            ))
        })?;
        let api_key = provider
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_owned);

        Ok(Self {
            completions_url,
            default_model: provider.default_model_or_builtin(kind).trim().to_owned(),
            api_key,
            static_headers: build_static_headers(),
        })
    }

    #[must_use]
    pub fn completions_url(&self) -> &url::Url {
        &self.completions_url
    }

    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    #[must_use]
    pub fn has_configured_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The caller's model if given, otherwise this provider's default.
    #[must_use]
    pub fn resolve_model<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.default_model)
    }

    /// Build request headers carrying the credential for this call.
    ///
    /// A non-blank request token wins over the configured key.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when neither a token nor a configured
    /// key is available, and [`RelayError::InvalidRequest`] when the token
    /// cannot be sent as a header value.
    pub fn headers_for_token(&self, token: &str) -> Result<HeaderMap, RelayError> {
        let token = token.trim();
        let key = if token.is_empty() {
            self.api_key
                .as_deref()
                .ok_or_else(|| RelayError::Config("API key not configured".to_string()))?
        } else {
            token
        };

        let mut authorization = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
            RelayError::InvalidRequest("token contains characters not allowed in a header".to_string())
        })?;
        authorization.set_sensitive(true);

        let mut headers = self.static_headers.clone();
        headers.insert(http::header::AUTHORIZATION, authorization);
        Ok(headers)
    }
}

fn build_static_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        http::header::ACCEPT,
        HeaderValue::from_static("text/event-stream"),
    );
    headers
}

/// One prepared upstream per supported provider.
#[derive(Debug, Clone)]
pub struct PreparedUpstreams {
    deepseek: PreparedUpstream,
    chatgpt: PreparedUpstream,
}

impl PreparedUpstreams {
    /// # Errors
    ///
    /// Returns the first provider's [`ConfigError`] encountered.
    pub fn new(providers: &ProvidersConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            deepseek: PreparedUpstream::new(
                ProviderKind::DeepSeek,
                providers.get(ProviderKind::DeepSeek),
            )?,
            chatgpt: PreparedUpstream::new(
                ProviderKind::ChatGpt,
                providers.get(ProviderKind::ChatGpt),
            )?,
        })
    }

    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> &PreparedUpstream {
        match kind {
            ProviderKind::DeepSeek => &self.deepseek,
            ProviderKind::ChatGpt => &self.chatgpt,
        }
    }
}
