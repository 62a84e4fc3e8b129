//! OAuth2 authorization-code flow against a Frappe identity provider.
//!
//! The flow object owns every token-endpoint interaction: authorize-URL
//! construction, code exchange, refresh, and the claims-first identity
//! resolution. Collaborators obtain an [`ApiClient`] from [`OauthFlow::api`]
//! for authenticated resource calls.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::client::{extract_error_message, ApiClient, RequestOptions, TokenRefresher};
use crate::config::OauthConfig;
use crate::error::{AuthError, Result};
use crate::jwt::{decode_claims, pick_identifier};
use crate::pkce::PKCE_METHOD;
use crate::store::{RefreshUpdate, TokenStore};
use crate::token::TokenResponse;

/// Frappe OAuth2 endpoints, relative to the configured base URL.
const AUTHORIZE_PATH: &str = "/api/method/frappe.integrations.oauth2.authorize";
const TOKEN_PATH: &str = "/api/method/frappe.integrations.oauth2.get_token";
const PROFILE_PATH: &str = "/api/method/frappe.integrations.oauth2.openid_profile";
const USER_RESOURCE_PATH: &str = "/api/resource/User";

const DEFAULT_SCOPE: &str = "openid all";

/// Parameters for [`OauthFlow::build_authorize_url`].
///
/// Client id, redirect URI, and scope default from configuration when unset.
#[derive(Debug, Clone)]
pub struct AuthorizeParams {
    pub challenge: String,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
}

impl AuthorizeParams {
    pub fn new(challenge: impl Into<String>) -> Self {
        Self {
            challenge: challenge.into(),
            state: None,
            scope: None,
            client_id: None,
            redirect_uri: None,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

/// Parameters for [`OauthFlow::exchange_code`].
#[derive(Debug, Clone)]
pub struct ExchangeParams {
    pub code: String,
    pub verifier: String,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
}

impl ExchangeParams {
    pub fn new(code: impl Into<String>, verifier: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            verifier: verifier.into(),
            client_id: None,
            redirect_uri: None,
        }
    }
}

/// Resolved user record fields. All-`None` when every lookup failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub email: Option<String>,
    pub default_location: Option<String>,
    pub canonical_username: Option<String>,
}

/// Authorization-code-with-PKCE orchestrator.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use erp_oauth::config::OauthConfig;
/// use erp_oauth::flow::{AuthorizeParams, OauthFlow};
/// use erp_oauth::pkce::PkcePair;
/// use erp_oauth::store::{MemorySessionStorage, TokenStore};
///
/// # fn example() -> erp_oauth::Result<()> {
/// let config = OauthConfig::new("https://erp.example.com", "fleet-dashboard", None);
/// let store = Arc::new(TokenStore::new(Arc::new(MemorySessionStorage::new())));
/// let flow = Arc::new(OauthFlow::new(config, store.clone()));
///
/// let pair = PkcePair::generate();
/// store.stash_verifier(&pair.verifier)?;
/// let url = flow.build_authorize_url(AuthorizeParams::new(&pair.challenge))?;
/// // redirect the user to `url`; the callback page exchanges the code.
/// # Ok(())
/// # }
/// ```
pub struct OauthFlow {
    http: reqwest::Client,
    config: OauthConfig,
    store: Arc<TokenStore>,
    // Serializes refresh attempts; Frappe rotates refresh tokens on use, so
    // concurrent 401 handlers must not race each other to the token endpoint.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl OauthFlow {
    pub fn new(config: OauthConfig, store: Arc<TokenStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            store,
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn config(&self) -> &OauthConfig {
        &self.config
    }

    /// Request client bound to this flow's refresh behavior.
    pub fn api(self: &Arc<Self>) -> ApiClient {
        ApiClient::new(
            self.config.base_url.clone(),
            self.store.clone(),
            self.clone() as Arc<dyn TokenRefresher>,
        )
    }

    /// Build the provider's authorize URL.
    ///
    /// `response_type=code` and `code_challenge_method=S256` are fixed.
    /// `state` is omitted from the query string entirely when absent or
    /// empty, never included blank.
    pub fn build_authorize_url(&self, params: AuthorizeParams) -> Result<String> {
        let mut url = Url::parse(&format!("{}{AUTHORIZE_PATH}", self.config.base_url))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair(
                "client_id",
                params.client_id.as_deref().unwrap_or(&self.config.client_id),
            );
            query.append_pair(
                "redirect_uri",
                params
                    .redirect_uri
                    .as_deref()
                    .unwrap_or(&self.config.redirect_uri),
            );
            query.append_pair("scope", params.scope.as_deref().unwrap_or(DEFAULT_SCOPE));
            query.append_pair("code_challenge_method", PKCE_METHOD);
            query.append_pair("code_challenge", &params.challenge);
            if let Some(state) = params.state.as_deref().filter(|s| !s.is_empty()) {
                query.append_pair("state", state);
            }
        }
        Ok(url.into())
    }

    /// Exchange an authorization code (plus its verifier) for tokens.
    ///
    /// On success the returned bundle is stored as one update: access token
    /// always, refresh and id tokens when present.
    pub async fn exchange_code(&self, params: ExchangeParams) -> Result<TokenResponse> {
        let (status, body) = self
            .token_post(&[
                ("grant_type", "authorization_code"),
                ("code", &params.code),
                (
                    "client_id",
                    params.client_id.as_deref().unwrap_or(&self.config.client_id),
                ),
                (
                    "redirect_uri",
                    params
                        .redirect_uri
                        .as_deref()
                        .unwrap_or(&self.config.redirect_uri),
                ),
                ("code_verifier", &params.verifier),
            ])
            .await?;
        if !status.is_success() {
            return Err(AuthError::TokenExchangeFailed(extract_error_message(
                &body,
                "token exchange failed",
            )));
        }
        let response: TokenResponse = serde_json::from_value(body)?;
        self.store_grant(&response);
        tracing::debug!("authorization code exchanged");
        Ok(response)
    }

    /// Exchange the stored refresh token for a new bundle.
    ///
    /// Returns `Ok(None)` without any network call when no refresh token is
    /// stored. Failures surface as [`AuthError::TokenRefreshFailed`]; the
    /// 401-retry path catches them and forces a local logout instead of
    /// propagating.
    pub async fn refresh(&self) -> Result<Option<String>> {
        let Some(refresh_token) = self.store.refresh_token() else {
            return Ok(None);
        };
        let (status, body) = self
            .token_post(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &self.config.client_id),
            ])
            .await?;
        if !status.is_success() {
            return Err(AuthError::TokenRefreshFailed(extract_error_message(
                &body,
                "token refresh failed",
            )));
        }
        let response: TokenResponse = serde_json::from_value(body)?;
        self.store_grant(&response);
        tracing::debug!("access token refreshed");
        Ok(Some(response.access_token))
    }

    /// Best-effort identifier for the current user.
    ///
    /// Reads the id-token claims first (no network), then falls back to the
    /// provider's profile endpoint. `None` when both paths fail.
    pub async fn resolve_current_user(&self) -> Option<String> {
        if let Some(claims) = decode_claims(self.store.id_token().as_deref()) {
            if let Some(id) = claims.identifier() {
                return Some(id.to_string());
            }
        }
        let profile = self.fetch_openid_profile().await?;
        // Frappe may wrap the payload in a `message` envelope.
        let inner = profile.get("message").cloned().unwrap_or(profile);
        let record: ProfileRecord = serde_json::from_value(inner).ok()?;
        pick_identifier([
            record.email.as_deref(),
            record.preferred_username.as_deref(),
            record.username.as_deref(),
            record.name.as_deref(),
            record.sub.as_deref(),
        ])
        .map(str::to_string)
    }

    /// Resolve email, default location, and canonical username for the
    /// current user.
    ///
    /// Tries a direct `User/<id>` lookup, then a filtered search by email,
    /// then by username. Each lookup failure moves to the next strategy;
    /// nothing propagates.
    pub async fn resolve_user_profile(self: &Arc<Self>) -> UserProfile {
        let Some(id) = self.resolve_current_user().await else {
            return UserProfile::default();
        };
        let api = self.api();
        let fields = json!(["name", "email", "user_default_location"]).to_string();

        if let Some(path) = user_document_path(&self.config.base_url, &id, &fields) {
            if let Ok(body) = api.request(&path, RequestOptions::get()).await {
                let record = first_user_record(&body).unwrap_or_default();
                return record.into_profile();
            }
        }

        for field in ["email", "username"] {
            let path = user_query_path(field, &id, &fields);
            let Ok(body) = api.request(&path, RequestOptions::get()).await else {
                continue;
            };
            let Some(record) = first_user_record(&body) else {
                continue;
            };
            if record.name.is_some() || record.email.is_some() {
                return record.into_profile();
            }
        }
        UserProfile::default()
    }

    async fn token_post(&self, form: &[(&str, &str)]) -> Result<(StatusCode, Value)> {
        let response = self
            .http
            .post(format!("{}{TOKEN_PATH}", self.config.base_url))
            .form(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, serde_json::from_str(&body).unwrap_or_else(|_| json!({}))))
    }

    /// Store a successful grant: id token silently, then credentials with the
    /// single auth-change broadcast.
    fn store_grant(&self, response: &TokenResponse) {
        if let Some(id_token) = &response.id_token {
            self.store.set_id_token(Some(id_token));
        }
        let refresh = match &response.refresh_token {
            Some(token) => RefreshUpdate::Set(token.clone()),
            None => RefreshUpdate::Keep,
        };
        self.store.set_credentials(Some(&response.access_token), refresh);
    }

    async fn fetch_openid_profile(&self) -> Option<Value> {
        let mut request = self
            .http
            .get(format!("{}{PROFILE_PATH}", self.config.base_url));
        if let Some(token) = self.store.access_token().filter(|t| !t.is_empty()) {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }
}

#[async_trait]
impl TokenRefresher for OauthFlow {
    async fn try_refresh(&self) -> bool {
        let seen = self.store.access_token();
        let _gate = self.refresh_gate.lock().await;
        if self.store.access_token() != seen {
            // Another caller refreshed while we waited for the gate.
            return self.store.is_authenticated();
        }
        match self.refresh().await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(error = %err, "token refresh failed, clearing session");
                self.store.logout();
                false
            }
        }
    }
}

/// Fields the provider's profile endpoint may return.
#[derive(Debug, Default, Deserialize)]
struct ProfileRecord {
    email: Option<String>,
    preferred_username: Option<String>,
    username: Option<String>,
    name: Option<String>,
    sub: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UserRecord {
    name: Option<String>,
    email: Option<String>,
    user_default_location: Option<String>,
}

impl UserRecord {
    fn into_profile(self) -> UserProfile {
        UserProfile {
            email: self.email.clone().or_else(|| self.name.clone()),
            default_location: self.user_default_location,
            canonical_username: self.name,
        }
    }
}

/// `User/<id>` document path with the id percent-encoded as a path segment.
fn user_document_path(base: &str, id: &str, fields: &str) -> Option<String> {
    let mut url = Url::parse(base).ok()?;
    url.path_segments_mut()
        .ok()?
        .extend(["api", "resource", "User", id]);
    url.query_pairs_mut().append_pair("fields", fields);
    Some(format!("{}?{}", url.path(), url.query().unwrap_or_default()))
}

/// `User?filters=...&fields=...` query path for an equality filter.
fn user_query_path(filter_field: &str, id: &str, fields: &str) -> String {
    let filters = json!([["User", filter_field, "=", id]]).to_string();
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("filters", &filters)
        .append_pair("fields", fields)
        .finish();
    format!("{USER_RESOURCE_PATH}?{query}")
}

/// `{data: {...}}` or `{data: [...]}` — first record either way.
fn first_user_record(body: &Value) -> Option<UserRecord> {
    let data = body.get("data")?;
    let record = match data {
        Value::Array(items) => items.first()?.clone(),
        other => other.clone(),
    };
    serde_json::from_value(record).ok()
}
