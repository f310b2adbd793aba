use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, LINK, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiErrorKind};

pub const API_ROOT: &str = "/api/v1/";
pub const DEFAULT_USER_AGENT: &str = "tabmigrate/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_ATTEMPTS: usize = 4;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 0;
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Ordered query parameters. Setting or merging a key replaces every
/// existing value for that key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.0.retain(|(existing, _)| existing != key);
        self.0.push((key.to_string(), value.to_string()));
    }

    pub fn merge(&mut self, other: &QueryParams) {
        self.0
            .retain(|(existing, _)| !other.0.iter().any(|(key, _)| key == existing));
        self.0.extend(other.0.iter().cloned());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            // Repeated keys from a link are kept verbatim.
            params.0.push((key, value));
        }
        params
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub link: Option<String>,
    pub body: String,
}

/// One raw HTTP exchange. Status handling, decoding and retries live in
/// [`ApiClient`].
pub trait Transport {
    fn send(&mut self, method: Method, url: &Url, params: &QueryParams)
    -> Result<RawResponse, ApiError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .context("API key contains characters that cannot be sent in a header")?;
        authorization.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .context("failed to build Canvas HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &mut self,
        method: Method,
        url: &Url,
        params: &QueryParams,
    ) -> Result<RawResponse, ApiError> {
        let transport_error = |error: reqwest::Error| ApiError::Transport {
            method: method.clone(),
            url: url.to_string(),
            message: error.to_string(),
        };
        let response = self
            .client
            .request(method.clone(), url.clone())
            .query(params.pairs())
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        let link = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let body = response.text().map_err(transport_error)?;
        Ok(RawResponse { status, link, body })
    }
}

/// Bounded retry around a single network operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
    pub retryable: fn(&ApiError) -> bool,
}

impl RetryPolicy {
    pub fn reads(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retryable: is_retryable_read,
        }
    }

    pub fn writes(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retryable: is_retryable_write,
        }
    }

    /// Runs `call` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub fn run<T>(&self, mut call: impl FnMut() -> Result<T, ApiError>) -> Result<T, ApiError> {
        let budget = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(error) if attempt < budget && (self.retryable)(&error) => {
                    warn!(attempt, max_attempts = budget, %error, "call attempt failed; retrying");
                    if !self.delay.is_zero() {
                        sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub fn is_retryable_read(error: &ApiError) -> bool {
    matches!(
        error.kind(),
        ApiErrorKind::Transport | ApiErrorKind::Status | ApiErrorKind::Decode
    )
}

pub fn is_retryable_write(error: &ApiError) -> bool {
    matches!(error.kind(), ApiErrorKind::Transport | ApiErrorKind::Status)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub data: Value,
    pub next_page_params: Option<QueryParams>,
}

pub trait CanvasApi {
    fn get(&mut self, path: &str, params: &QueryParams) -> Result<PageResponse, ApiError>;
    fn put(&mut self, path: &str, params: &QueryParams) -> Result<Value, ApiError>;
    fn request_count(&self) -> usize;

    /// Follows `next` links from `endpoint` and concatenates every page.
    ///
    /// Stops when no next link is returned, or once at least `limit` items
    /// have been collected; the result is then truncated to `limit`.
    fn get_all_pages(
        &mut self,
        endpoint: &str,
        params: &QueryParams,
        page_size: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, ApiError> {
        let mut request_params = params.clone();
        request_params.set("per_page", page_size);

        let mut results = Vec::new();
        let mut pages = 0usize;
        loop {
            debug!(endpoint, params = ?request_params, "requesting page");
            let page = self.get(endpoint, &request_params)?;
            pages += 1;
            match page.data {
                Value::Array(items) => results.extend(items),
                other => {
                    return Err(ApiError::UnexpectedShape {
                        method: Method::GET,
                        url: endpoint.to_string(),
                        detail: format!("expected a JSON array page, got {}", json_kind(&other)),
                    });
                }
            }

            let Some(next) = page.next_page_params else {
                break;
            };
            if limit.is_some_and(|limit| results.len() >= limit) {
                break;
            }
            request_params.merge(&next);
        }

        if let Some(limit) = limit {
            results.truncate(limit);
        }
        debug!(endpoint, pages, results = results.len(), "pagination finished");
        Ok(results)
    }
}

pub struct ApiClient<T: Transport> {
    transport: T,
    base_url: Url,
    read_policy: RetryPolicy,
    write_policy: RetryPolicy,
    request_count: usize,
}

impl ApiClient<ReqwestTransport> {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config)?;
        let client = Self::new(
            transport,
            &config.base_url,
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
        )?;
        Ok(client)
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(
        transport: T,
        base_url: &str,
        max_attempts: usize,
        retry_delay: Duration,
    ) -> Result<Self, ApiError> {
        let root = format!("{}{API_ROOT}", base_url.trim().trim_end_matches('/'));
        let base_url = Url::parse(&root).map_err(|error| ApiError::InvalidUrl {
            url: root.clone(),
            message: error.to_string(),
        })?;
        Ok(Self {
            transport,
            base_url,
            read_policy: RetryPolicy::reads(max_attempts, retry_delay),
            write_policy: RetryPolicy::writes(max_attempts, retry_delay),
            request_count: 0,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn endpoint_url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|error| ApiError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                message: error.to_string(),
            })
    }

    fn get_once(&mut self, url: &Url, params: &QueryParams) -> Result<PageResponse, ApiError> {
        self.request_count += 1;
        let response = self.transport.send(Method::GET, url, params)?;
        ensure_success(Method::GET, url, response.status)?;

        let data: Value =
            serde_json::from_str(&response.body).map_err(|source| ApiError::Decode {
                method: Method::GET,
                url: url.to_string(),
                source,
            })?;
        let next_page_params = response
            .link
            .as_deref()
            .and_then(|header| next_page_params(header, url));
        Ok(PageResponse {
            data,
            next_page_params,
        })
    }

    fn put_once(&mut self, url: &Url, params: &QueryParams) -> Result<Value, ApiError> {
        self.request_count += 1;
        let response = self.transport.send(Method::PUT, url, params)?;
        ensure_success(Method::PUT, url, response.status)?;

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|source| ApiError::Decode {
            method: Method::PUT,
            url: url.to_string(),
            source,
        })
    }
}

impl<T: Transport> CanvasApi for ApiClient<T> {
    fn get(&mut self, path: &str, params: &QueryParams) -> Result<PageResponse, ApiError> {
        let url = self.endpoint_url(path)?;
        debug!(%url, ?params, "GET");
        let policy = self.read_policy;
        policy.run(|| self.get_once(&url, params))
    }

    fn put(&mut self, path: &str, params: &QueryParams) -> Result<Value, ApiError> {
        let url = self.endpoint_url(path)?;
        debug!(%url, ?params, "PUT");
        let policy = self.write_policy;
        policy.run(|| self.put_once(&url, params))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn ensure_success(method: Method, url: &Url, status: StatusCode) -> Result<(), ApiError> {
    if status.is_success() {
        return Ok(());
    }
    Err(ApiError::Status {
        method,
        url: url.to_string(),
        status,
    })
}

/// Extracts the query parameters of the `rel="next"` entry of a `Link`
/// header. Relative targets resolve against `request_url`.
///
/// Entries are found by their `<...>` targets, so commas inside a target
/// do not split it.
pub fn next_page_params(link_header: &str, request_url: &Url) -> Option<QueryParams> {
    let mut rest = link_header;
    while let Some(open) = rest.find('<') {
        let after_open = &rest[open + 1..];
        let close = after_open.find('>')?;
        let target = &after_open[..close];
        let after_close = &after_open[close + 1..];
        let attributes_end = after_close.find('<').unwrap_or(after_close.len());
        let attributes = &after_close[..attributes_end];
        rest = &after_close[attributes_end..];

        let is_next = attributes.split(';').any(|part| {
            part.trim()
                .trim_end_matches(',')
                .trim()
                .strip_prefix("rel=")
                .map(|rel| {
                    rel.trim_matches('"')
                        .split_whitespace()
                        .any(|value| value.eq_ignore_ascii_case("next"))
                })
                .unwrap_or(false)
        });
        if !is_next {
            continue;
        }

        let url = request_url.join(target.trim()).ok()?;
        return Some(
            url.query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect(),
        );
    }
    None
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
