//! Bearer-token request client with one-shot refresh-and-retry.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};
use crate::store::TokenStore;

/// One-shot token refresh attempted when a request comes back 401.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Returns true when a new access token was stored and the request should
    /// be retried. Must not surface refresh errors to the caller.
    async fn try_refresh(&self) -> bool;
}

/// Options for a single API request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: HeaderMap,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
            headers: HeaderMap::new(),
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: reqwest::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }
}

/// API client that attaches the stored bearer token and retries exactly once
/// after a successful 401-triggered refresh.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use erp_oauth::client::{ApiClient, RequestOptions};
/// use erp_oauth::flow::OauthFlow;
/// use erp_oauth::config::OauthConfig;
/// use erp_oauth::store::{MemorySessionStorage, TokenStore};
///
/// # async fn example() -> erp_oauth::Result<()> {
/// let store = Arc::new(TokenStore::new(Arc::new(MemorySessionStorage::new())));
/// let config = OauthConfig::new("https://erp.example.com", "client", None);
/// let flow = Arc::new(OauthFlow::new(config, store));
/// let api = flow.api();
/// let vehicles = api.request("/api/resource/Vehicle", RequestOptions::get()).await?;
/// println!("{vehicles}");
/// # Ok(())
/// # }
/// ```
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            store,
            refresher,
        }
    }

    /// Issue a request against the configured base URL.
    ///
    /// Contract:
    /// - a body without an explicit content-type defaults to JSON;
    /// - the stored access token is attached as `Bearer` unless an
    ///   Authorization header was supplied;
    /// - a 401 triggers exactly one refresh, and on refresh success the
    ///   request is reissued exactly once with rebuilt headers;
    /// - an unparseable body reads as empty without masking the status;
    /// - non-success statuses fail with [`AuthError::RequestFailed`] carrying
    ///   the best message the body offers.
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value> {
        let url = join_url(&self.base_url, path);

        let mut response = self.send(&url, &options, false).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(path, "request unauthorized, attempting token refresh");
            if self.refresher.try_refresh().await {
                response = self.send(&url, &options, true).await?;
            }
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let json = parse_body(&body);

        if !status.is_success() {
            let fallback = status.canonical_reason().unwrap_or("request failed");
            return Err(AuthError::RequestFailed {
                status: status.as_u16(),
                message: extract_error_message(&json, fallback),
            });
        }
        Ok(json)
    }

    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        force_bearer: bool,
    ) -> Result<reqwest::Response> {
        let headers = self.build_headers(options, force_bearer);
        let mut request = self
            .http
            .request(options.method.clone(), url)
            .headers(headers);
        if let Some(body) = &options.body {
            request = request.body(body.to_string());
        }
        Ok(request.send().await?)
    }

    /// Headers are rebuilt per attempt so the retry picks up the refreshed
    /// token. On the first attempt an explicit Authorization header wins; the
    /// post-refresh retry always carries the fresh token.
    fn build_headers(&self, options: &RequestOptions, force_bearer: bool) -> HeaderMap {
        let mut headers = options.headers.clone();
        if options.body.is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if force_bearer || !headers.contains_key(AUTHORIZATION) {
            if let Some(token) = self.store.access_token().filter(|t| !t.is_empty()) {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                    headers.insert(AUTHORIZATION, value);
                }
            }
        }
        headers
    }
}

/// Join base URL and path with exactly one separator.
fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Lenient body parse: an unparseable body reads as an empty object.
fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Error fields the provider may set, in priority order. Frappe adds
/// `_server_messages` and `exception` on top of the OAuth-style fields.
const ERROR_MESSAGE_FIELDS: [&str; 5] = [
    "error_description",
    "error",
    "message",
    "_server_messages",
    "exception",
];

/// Best available error message, in priority order; falls back to the HTTP
/// status text.
///
/// Each field is read on its own — Frappe sometimes returns a structured
/// `message` object, and a non-string sibling must not hide a valid
/// candidate elsewhere in the chain.
pub(crate) fn extract_error_message(body: &Value, fallback: &str) -> String {
    ERROR_MESSAGE_FIELDS
        .iter()
        .filter_map(|field| body.get(field).and_then(Value::as_str))
        .find(|message| !message.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
