//! erp-oauth — OAuth2 PKCE client for ERPNext/Frappe.
//!
//! Cookie-less Bearer-token authentication: code-verifier/challenge
//! generation, authorization-code exchange, session-persisted token storage
//! with change broadcast, unverified JWT claims decoding, and an API client
//! that transparently refreshes and retries once on 401.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use erp_oauth::config::OauthConfig;
//! use erp_oauth::flow::{AuthorizeParams, ExchangeParams, OauthFlow};
//! use erp_oauth::pkce::PkcePair;
//! use erp_oauth::store::{FileSessionStorage, TokenStore};
//!
//! # async fn example() -> erp_oauth::Result<()> {
//! let config = OauthConfig::from_env()?;
//! let store = Arc::new(TokenStore::new(Arc::new(FileSessionStorage::new_default())));
//! store.rehydrate();
//! let flow = Arc::new(OauthFlow::new(config, store.clone()));
//!
//! // Login entry point: stash the verifier, send the user to the provider.
//! let pair = PkcePair::generate();
//! store.stash_verifier(&pair.verifier)?;
//! let authorize_url = flow.build_authorize_url(AuthorizeParams::new(&pair.challenge))?;
//!
//! // Callback entry point: consume the verifier, redeem the code.
//! let verifier = store.take_verifier().expect("no login in progress");
//! flow.exchange_code(ExchangeParams::new("code-from-redirect", verifier)).await?;
//! assert!(store.is_authenticated());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod jwt;
pub mod pkce;
pub mod store;
pub mod token;

pub use client::{ApiClient, RequestOptions, TokenRefresher};
pub use config::OauthConfig;
pub use error::{AuthError, Result};
pub use flow::{AuthorizeParams, ExchangeParams, OauthFlow, UserProfile};
pub use jwt::{decode_claims, IdClaims};
pub use pkce::PkcePair;
pub use store::{
    FileSessionStorage, MemorySessionStorage, RefreshUpdate, SessionStorage, TokenStore,
};
pub use token::TokenResponse;
