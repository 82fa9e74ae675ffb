//! Retrying HTTP transport.
//!
//! Executes one logical request, absorbing rate limiting (429), server
//! errors (5xx) and network faults with capped exponential backoff. Every
//! other response is handed back untouched; interpreting it is the caller's
//! job. The transport keeps no per-feed state, so one instance (or clones of
//! it, which share the connection pool) can serve any number of feeds.

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{BackoffPolicy, TransportConfig};

/// Why an attempt was retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransientCause {
    #[error("rate limited (429)")]
    RateLimited,

    #[error("server error ({0})")]
    Server(u16),

    #[error("request timed out")]
    Timeout,

    #[error("network failure: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{path} failed after {attempts} attempts: {cause}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        cause: TransientCause,
    },

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Coarse classification of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    Success,
    Gone,
    RateLimited,
    ClientError,
    ServerError,
    Other,
}

impl From<StatusCode> for StatusCategory {
    fn from(status: StatusCode) -> Self {
        match status {
            s if s.is_success() => StatusCategory::Success,
            StatusCode::GONE => StatusCategory::Gone,
            StatusCode::TOO_MANY_REQUESTS => StatusCategory::RateLimited,
            s if s.is_client_error() => StatusCategory::ClientError,
            s if s.is_server_error() => StatusCategory::ServerError,
            _ => StatusCategory::Other,
        }
    }
}

/// Final response of a logical request.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn category(&self) -> StatusCategory {
        self.status.into()
    }

    /// Body as text, cut down for log lines and error messages
    pub fn body_excerpt(&self) -> String {
        const LIMIT: usize = 200;
        let text = String::from_utf8_lossy(&self.body);
        match text.char_indices().nth(LIMIT) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.into_owned(),
        }
    }
}

/// One logical request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    payload: Option<Value>,
    timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            query: Vec::new(),
            payload: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Override the transport's per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Delay schedule for one logical request.
///
/// Yields `initial * 2^n` capped at `max`. Jitter adds at most one extra
/// step's worth before the cap is applied, so consecutive delays never
/// decrease.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Backoff {
            next: policy.initial_delay(),
            max: policy.max_delay(),
            jitter: policy.jitter.clamp(0.0, 1.0),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let step = self.next.min(self.max);
        self.next = step.saturating_mul(2).min(self.max);

        let delay = if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            step + step.mul_f64(extra)
        } else {
            step
        };
        Some(delay.min(self.max))
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
    policy: BackoffPolicy,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Self::with_client(client, config)
    }

    /// Build on an existing client so several transports share one pool
    pub fn with_client(client: Client, config: &TransportConfig) -> Result<Self, TransportError> {
        let mut raw = config.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).map_err(|e| TransportError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(HttpTransport {
            client,
            base_url,
            request_timeout: config.request_timeout(),
            policy: config.backoff.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Execute `request`, retrying transient failures per the backoff policy
    pub async fn execute(&self, request: &Request) -> Result<RawResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        let timeout = request.timeout.unwrap_or(self.request_timeout);
        let mut delays = Backoff::new(&self.policy);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let cause = match self.send_once(&url, request, timeout).await {
                Ok(response) => match transient_status(response.status) {
                    None => return Ok(response),
                    Some(cause) => cause,
                },
                Err(e) => match transient_error(&e) {
                    Some(cause) => cause,
                    None => return Err(TransportError::Client(e)),
                },
            };

            if attempt >= self.policy.max_attempts {
                warn!(
                    path = %request.path,
                    attempts = attempt,
                    %cause,
                    "giving up on request"
                );
                return Err(TransportError::RetriesExhausted {
                    path: request.path.clone(),
                    attempts: attempt,
                    cause,
                });
            }

            let delay = delays.next().unwrap_or_else(|| self.policy.max_delay());
            debug!(
                path = %request.path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %cause,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        url: &Url,
        request: &Request,
        timeout: Duration,
    ) -> Result<RawResponse, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .timeout(timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse { status, body })
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                reason: e.to_string(),
            })
    }
}

fn transient_status(status: StatusCode) -> Option<TransientCause> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(TransientCause::RateLimited)
    } else if status.is_server_error() {
        Some(TransientCause::Server(status.as_u16()))
    } else {
        None
    }
}

fn transient_error(error: &reqwest::Error) -> Option<TransientCause> {
    if error.is_timeout() {
        Some(TransientCause::Timeout)
    } else if error.is_connect() || error.is_request() || error.is_body() {
        Some(TransientCause::Network(error.to_string()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categories() {
        assert_eq!(StatusCategory::from(StatusCode::OK), StatusCategory::Success);
        assert_eq!(StatusCategory::from(StatusCode::GONE), StatusCategory::Gone);
        assert_eq!(
            StatusCategory::from(StatusCode::TOO_MANY_REQUESTS),
            StatusCategory::RateLimited
        );
        assert_eq!(StatusCategory::from(StatusCode::BAD_REQUEST), StatusCategory::ClientError);
        assert_eq!(StatusCategory::from(StatusCode::BAD_GATEWAY), StatusCategory::ServerError);
    }

    #[test]
    fn test_only_rate_limit_and_server_errors_are_transient() {
        assert_eq!(
            transient_status(StatusCode::TOO_MANY_REQUESTS),
            Some(TransientCause::RateLimited)
        );
        assert_eq!(
            transient_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(TransientCause::Server(503))
        );
        assert_eq!(transient_status(StatusCode::BAD_REQUEST), None);
        assert_eq!(transient_status(StatusCode::GONE), None);
    }

    #[test]
    fn test_backoff_without_jitter() {
        let delays: Vec<u64> = Backoff::new(&BackoffPolicy::default())
            .take(6)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![50, 100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_url_join_keeps_base_path() {
        let config = TransportConfig {
            base_url: "http://exchange.local:9000/api".to_string(),
            ..TransportConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let url = transport.url_for("/updates").unwrap();
        assert_eq!(url.as_str(), "http://exchange.local:9000/api/updates");
    }

    #[test]
    fn test_body_excerpt_truncates() {
        let response = RawResponse {
            status: StatusCode::OK,
            body: vec![b'x'; 500],
        };
        assert_eq!(response.body_excerpt().len(), 203);
    }
}
