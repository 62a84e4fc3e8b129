//! PKCE (Proof Key for Code Exchange) verifier/challenge generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE challenge method sent to the provider.
pub const PKCE_METHOD: &str = "S256";

/// Characters allowed in the verifier (RFC 7636 unreserved set).
const VERIFIER_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Verifier length in characters (the RFC 7636 maximum).
const VERIFIER_LENGTH: usize = 128;

/// A verifier and its derived S256 challenge.
///
/// The verifier is the secret: it stays on this machine until the token
/// exchange and must never appear in the authorize redirect. Only the
/// challenge is sent there.
///
/// # Example
/// ```
/// use erp_oauth::pkce::PkcePair;
///
/// let pair = PkcePair::generate();
/// assert_eq!(pair.challenge, PkcePair::challenge_for(&pair.verifier));
/// ```
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a new pair from the thread-local CSPRNG.
    ///
    /// `rand::rng()` is cryptographically secure; there is no weak fallback.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let verifier: String = (0..VERIFIER_LENGTH)
            .map(|_| {
                let idx = rng.random_range(0..VERIFIER_CHARS.len());
                VERIFIER_CHARS[idx] as char
            })
            .collect();
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Compute the S256 challenge for a verifier: base64url(SHA-256(verifier)),
    /// no padding. Deterministic given the verifier.
    #[must_use]
    pub fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}
