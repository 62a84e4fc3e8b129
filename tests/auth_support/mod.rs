#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use erp_oauth::config::OauthConfig;
use erp_oauth::flow::OauthFlow;
use erp_oauth::store::{MemorySessionStorage, RefreshUpdate, TokenStore};
use wiremock::MockServer;

pub const TOKEN_PATH: &str = "/api/method/frappe.integrations.oauth2.get_token";
pub const PROFILE_PATH: &str = "/api/method/frappe.integrations.oauth2.openid_profile";

pub fn memory_store() -> Arc<TokenStore> {
    Arc::new(TokenStore::new(Arc::new(MemorySessionStorage::new())))
}

pub fn flow_for(server: &MockServer, store: Arc<TokenStore>) -> Arc<OauthFlow> {
    let config = OauthConfig::new(
        server.uri(),
        "fleet-dashboard",
        Some("https://app.example.com/auth/callback"),
    );
    Arc::new(OauthFlow::new(config, store))
}

pub fn seed_credentials(store: &TokenStore, access: &str, refresh: Option<&str>) {
    let update = match refresh {
        Some(token) => RefreshUpdate::Set(token.to_string()),
        None => RefreshUpdate::Keep,
    };
    store.set_credentials(Some(access), update);
}

/// Compact three-segment token with a base64url payload; signature is not
/// verified by the decoder.
pub fn encode_id_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
