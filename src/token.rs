use serde::{Deserialize, Serialize};

/// Token-endpoint response payload, for both grant types.
///
/// # Example
/// ```
/// use erp_oauth::token::TokenResponse;
///
/// let json = r#"{"access_token":"at","token_type":"Bearer","expires_in":3600}"#;
/// let resp: TokenResponse = serde_json::from_str(json).unwrap();
/// assert_eq!(resp.access_token, "at");
/// assert!(resp.refresh_token.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}
