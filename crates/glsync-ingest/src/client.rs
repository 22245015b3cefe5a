//! Authenticated GitLab REST client
//!
//! Every call carries the `PRIVATE-TOKEN` header, goes through the
//! [`RetryPolicy`], and classifies non-success responses via
//! [`HttpError`](crate::error::HttpError) before the body is parsed.
//! Collections are walked with [`PageCursor`], which follows GitLab's
//! `X-Next-Page` header.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ErrorKind, HttpError};

/// Default GitLab API root
pub const DEFAULT_API_URL: &str = "https://gitlab.com/api/v4";

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Records requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Header announcing the next page of a collection
pub const NEXT_PAGE_HEADER: &str = "x-next-page";

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Retry/backoff behaviour for a single logical request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `base_delay * 2^n`
    pub base_delay: Duration,
    /// Wait after a 429 that carried no usable rate-limit headers
    pub rate_limit_fallback: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            rate_limit_fallback: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget with no waiting. Used by tests.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            rate_limit_fallback: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Exponential backoff after the given (1-based) failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Wait before retrying `err`. Rate-limit responses use the server's
    /// hint in place of the exponential step.
    pub fn delay_for(&self, err: &ClientError, attempt: u32) -> Duration {
        match err {
            ClientError::Http(http) if http.kind == ErrorKind::RateLimited => {
                http.retry_after.unwrap_or(self.rate_limit_fallback)
            }
            _ => self.backoff(attempt),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(&err, attempt);
                    warn!(
                        request = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Connection settings for [`GitLabClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub private_token: String,
    pub user_agent: Option<String>,
    pub timeout: Duration,
    pub page_size: u32,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, private_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            private_token: private_token.into(),
            user_agent: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A decoded successful response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// `Value::Null` for 204 and empty bodies
    pub body: Value,
}

/// One page of a collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub next_page: Option<u64>,
}

impl Page {
    /// Build a page from a response body. Single-resource endpoints return an
    /// object, which becomes a page of one record.
    pub fn from_body(body: Value, next_page: Option<u64>) -> Self {
        let records = match body {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Self { records, next_page }
    }

    pub fn is_last(&self) -> bool {
        self.next_page.is_none() || self.records.is_empty()
    }
}

/// GitLab REST client
#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    config: ClientConfig,
}

impl GitLabClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.private_token.trim().is_empty() {
            return Err(ClientError::MissingCredential);
        }
        Url::parse(&config.base_url).map_err(|_| ClientError::InvalidUrl(config.base_url.clone()))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self { http, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Resolve an API path (`projects/42/users`) against the base URL.
    /// Absolute URLs pass through.
    pub fn endpoint_url(&self, path: &str) -> Result<Url, ClientError> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        Url::parse(&raw).map_err(|_| ClientError::InvalidUrl(raw))
    }

    /// Issue a request with retries and return the parsed body
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        headers: HeaderMap,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        self.send(method, path, params, headers, body)
            .await
            .map(|resp| resp.body)
    }

    pub async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value, ClientError> {
        self.request(Method::GET, path, params, HeaderMap::new(), None)
            .await
    }

    pub async fn post(
        &self,
        path: &str,
        params: &[(String, String)],
        body: &Value,
    ) -> Result<Value, ClientError> {
        self.request(Method::POST, path, params, HeaderMap::new(), Some(body))
            .await
    }

    /// Issue a request with retries, keeping status and headers
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        headers: HeaderMap,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ClientError> {
        let url = self.endpoint_url(path)?;
        self.config
            .retry
            .run(path, |attempt| {
                self.send_once(method.clone(), &url, params, headers.clone(), body, attempt)
            })
            .await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        params: &[(String, String)],
        headers: HeaderMap,
        body: Option<&Value>,
        attempt: u32,
    ) -> Result<ApiResponse, ClientError> {
        debug!(%method, url = %url, attempt, "GitLab request");

        let mut request = self
            .http
            .request(method, url.clone())
            .query(params)
            .headers(headers)
            .header(TOKEN_HEADER, &self.config.private_token);
        if let Some(agent) = &self.config.user_agent {
            request = request.header(USER_AGENT, agent);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::transport(url.as_str(), e))?;

        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpError::from_response(status.as_u16(), headers, text).into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::transport(url.as_str(), e))?;

        let body = if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?
        };

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    /// Fetch one page of a collection
    pub async fn get_page(
        &self,
        path: &str,
        params: &[(String, String)],
        page: u64,
    ) -> Result<Page, ClientError> {
        let mut query = params.to_vec();
        query.push(("page".to_string(), page.to_string()));
        query.push(("per_page".to_string(), self.config.page_size.to_string()));

        let response = self
            .send(Method::GET, path, &query, HeaderMap::new(), None)
            .await?;

        let has_next = response
            .headers
            .get(NEXT_PAGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| !v.trim().is_empty());

        Ok(Page::from_body(response.body, has_next.then_some(page + 1)))
    }

    /// Fetch every page of a collection
    pub async fn paginate(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Vec<Value>, ClientError> {
        let mut cursor = PageCursor::new(path, params.to_vec());
        let mut records = Vec::new();
        while let Some(page) = cursor.next_page(self).await? {
            records.extend(page.records);
        }
        Ok(records)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    NotStarted,
    Fetching,
    Exhausted,
}

/// Walks a paginated collection one page at a time
#[derive(Debug, Clone)]
pub struct PageCursor {
    path: String,
    params: Vec<(String, String)>,
    page: u64,
    state: CursorState,
}

impl PageCursor {
    pub fn new(path: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self {
            path: path.into(),
            params,
            page: 1,
            state: CursorState::NotStarted,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Fetch the next page, or `None` once the collection is exhausted
    pub async fn next_page(&mut self, client: &GitLabClient) -> Result<Option<Page>, ClientError> {
        if self.state == CursorState::Exhausted {
            return Ok(None);
        }

        let page = client.get_page(&self.path, &self.params, self.page).await?;
        if page.is_last() {
            self.state = CursorState::Exhausted;
        } else {
            self.state = CursorState::Fetching;
            self.page += 1;
        }
        debug!(
            path = %self.path,
            records = page.records.len(),
            fetching = self.state == CursorState::Fetching,
            "Fetched page"
        );
        Ok(Some(page))
    }
}
