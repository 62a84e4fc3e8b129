//! Unverified JWT payload decoding.
//!
//! Signature trust is delegated to the issuing server over TLS; this module
//! only reads the payload segment. Malformed tokens are common (stale
//! storage, truncated values) and are represented as `None`, never as errors.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

/// Identity claims carried in an id token payload.
///
/// Known claim names are typed; everything else lands in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdClaims {
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub sub: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IdClaims {
    /// Best identifying claim, in priority order:
    /// email, preferred_username, username, name, sub.
    pub fn identifier(&self) -> Option<&str> {
        pick_identifier([
            self.email.as_deref(),
            self.preferred_username.as_deref(),
            self.username.as_deref(),
            self.name.as_deref(),
            self.sub.as_deref(),
        ])
    }
}

/// First non-empty candidate wins.
pub(crate) fn pick_identifier<const N: usize>(candidates: [Option<&str>; N]) -> Option<&str> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
}

/// Decode the payload segment of a compact JWT without verifying it.
///
/// Requires exactly three dot-separated segments. The payload is base64url
/// decoded (padding tolerated), interpreted as UTF-8, and parsed as JSON.
/// Any failure yields `None`.
///
/// # Example
/// ```
/// use erp_oauth::jwt::decode_claims;
///
/// assert!(decode_claims(None).is_none());
/// assert!(decode_claims(Some("not.a.valid.jwt")).is_none());
/// ```
pub fn decode_claims(token: Option<&str>) -> Option<IdClaims> {
    let token = token?;
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    serde_json::from_str(&text).ok()
}
