use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;

use crate::config::ServerConfig;
use crate::error::RelayError;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    use_env_proxy: bool,
) -> Result<reqwest::Client, RelayError> {
    // No overall `.timeout()`: it would cut long generations mid-stream.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none());

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP transport client for opening streaming requests to upstream providers.
pub struct HttpTransport {
    client: reqwest::Client,
    headers_timeout: Duration,
}

impl HttpTransport {
    /// Build the shared client from server settings.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the TLS backend or connection
    /// pool cannot be initialized.
    pub fn new(config: &ServerConfig) -> Result<Self, RelayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host,
            pool_idle_timeout,
            config.http_use_env_proxy,
        )?;
        Ok(Self {
            client,
            headers_timeout: Duration::from_secs(config.timeout),
        })
    }

    /// POST `body` to `url` and wait for the response headers.
    ///
    /// The timeout covers connecting and receiving headers only. The returned
    /// response's body is left unread for the caller to stream.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] on connection failure or when the
    /// headers do not arrive in time. Non-2xx statuses are returned as `Ok`.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let send = self
            .client
            .post(url.clone())
            .headers(headers)
            .body(body)
            .send();

        match tokio::time::timeout(self.headers_timeout, send).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(RelayError::Transport(format!(
                "Request to {} failed: {err}",
                url.host_str().unwrap_or("upstream")
            ))),
            Err(_) => Err(RelayError::Transport(format!(
                "Upstream did not respond within {}s",
                self.headers_timeout.as_secs()
            ))),
        }
    }
}
