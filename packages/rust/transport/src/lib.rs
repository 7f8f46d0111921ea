//! HTTP transport with bounded retry and exponential backoff.
//!
//! Every outbound request in TenderScope (listing pages, detail pages,
//! open-data lookups, Browserless calls) goes through [`HttpTransport`].

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use tenderscope_shared::{Result, TenderScopeError, TransportConfig};

/// User-Agent string for all outbound requests.
const USER_AGENT: &str = concat!("TenderScope/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// When and how long to wait before retrying a request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay; attempt `n` (1-based) waits `base * 2^(n-1)`.
    pub backoff_base: Duration,
    /// Statuses considered transient.
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }

    fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status.as_u16())
    }
}

impl From<&TransportConfig> for RetryPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            retry_statuses: config.retry_statuses.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// Final response of a request after retries.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Shared HTTP client with a retry policy. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    policy: RetryPolicy,
}

impl HttpTransport {
    /// Build a transport from the `[transport]` config section.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TenderScopeError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            policy: RetryPolicy::from(config),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` with query `params` and return the body text.
    pub async fn fetch(&self, url: &Url, params: &[(&str, &str)]) -> Result<String> {
        self.send_expect_success(url, || self.client.get(url.as_str()).query(params))
            .await
    }

    /// GET `url` with query `params` and decode the JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let body = self.fetch(url, params).await?;
        serde_json::from_str(&body)
            .map_err(|e| TenderScopeError::parse(format!("{url}: invalid JSON: {e}")))
    }

    /// POST a JSON `body` to `url` and return the response text.
    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &Url, body: &B) -> Result<String> {
        let reply = self.post_json_with_status(url, body).await?;
        if reply.is_success() {
            Ok(reply.body)
        } else {
            Err(TenderScopeError::Transport(format!("{url}: HTTP {}", reply.status)))
        }
    }

    /// POST a JSON `body`, returning non-retryable error statuses to the caller
    /// instead of failing. Transient statuses are still retried.
    pub async fn post_json_with_status<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<HttpReply> {
        self.execute(url, || {
            self.client.request(Method::POST, url.as_str()).json(body)
        })
        .await
    }

    /// Like [`Self::execute`], but any non-success status is an error.
    async fn send_expect_success<F>(&self, url: &Url, build: F) -> Result<String>
    where
        F: Fn() -> RequestBuilder,
    {
        let reply = self.execute(url, build).await?;
        if reply.is_success() {
            Ok(reply.body)
        } else {
            Err(TenderScopeError::Transport(format!("{url}: HTTP {}", reply.status)))
        }
    }

    /// Send the request built by `build`, retrying transient failures.
    #[instrument(skip_all, fields(url = %url))]
    async fn execute<F>(&self, url: &Url, build: F) -> Result<HttpReply>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let failure = match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || !self.policy.is_retryable_status(status) {
                        let body = response.text().await.map_err(|e| {
                            TenderScopeError::Transport(format!("{url}: body read failed: {e}"))
                        })?;
                        return Ok(HttpReply {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    format!("HTTP {status}")
                }
                Err(e) if e.is_connect() || e.is_timeout() => e.to_string(),
                Err(e) => {
                    return Err(TenderScopeError::Transport(format!("{url}: {e}")));
                }
            };

            if attempt >= self.policy.max_retries {
                return Err(TenderScopeError::Transport(format!(
                    "{url}: {failure} after {} attempts",
                    attempt + 1
                )));
            }
            attempt += 1;
            let delay = self.policy.backoff(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, reason = %failure, "retrying request");
            tokio::time::sleep(delay).await;
            debug!(attempt, "retry attempt");
        }
    }
}
