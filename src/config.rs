//! Environment-sourced configuration for the identity provider.

use crate::error::{AuthError, Result};

/// Recognized environment variables.
const ENV_BASE_URL: &str = "ERP_BASE_URL";
const ENV_CLIENT_ID: &str = "ERP_OAUTH_CLIENT_ID";
const ENV_REDIRECT_URI: &str = "ERP_OAUTH_REDIRECT_URI";

/// Path appended to the base URL when no redirect URI is configured.
const DEFAULT_CALLBACK_PATH: &str = "/auth/callback";

/// Connection settings for an ERPNext/Frappe identity provider.
///
/// # Example
/// ```no_run
/// use erp_oauth::config::OauthConfig;
///
/// let config = OauthConfig::new(
///     "https://erp.example.com",
///     "fleet-dashboard",
///     Some("https://fleet.example.com/auth/callback"),
/// );
/// assert_eq!(config.base_url, "https://erp.example.com");
/// ```
#[derive(Debug, Clone)]
pub struct OauthConfig {
    /// Root for authorize/token/profile/resource endpoints, no trailing slash.
    pub base_url: String,
    /// OAuth client identifier sent on every authorize/token request.
    pub client_id: String,
    /// Where the provider sends the user after login.
    pub redirect_uri: String,
}

impl OauthConfig {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: Option<&str>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let redirect_uri = redirect_uri
            .map(str::to_string)
            .unwrap_or_else(|| format!("{base_url}{DEFAULT_CALLBACK_PATH}"));
        Self {
            base_url,
            client_id: client_id.into(),
            redirect_uri,
        }
    }

    /// Load from environment variables (`ERP_BASE_URL`, `ERP_OAUTH_CLIENT_ID`,
    /// `ERP_OAUTH_REDIRECT_URI`).
    ///
    /// The redirect URI falls back to `<base_url>/auth/callback` when unset.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let base_url = std::env::var(ENV_BASE_URL)
            .map_err(|_| AuthError::Config(format!("{ENV_BASE_URL} is not set")))?;
        let client_id = std::env::var(ENV_CLIENT_ID)
            .map_err(|_| AuthError::Config(format!("{ENV_CLIENT_ID} is not set")))?;
        let redirect_uri = std::env::var(ENV_REDIRECT_URI).ok();
        Ok(Self::new(base_url, client_id, redirect_uri.as_deref()))
    }
}
