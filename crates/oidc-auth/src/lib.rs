//! OIDC token handling and identity-provider collaborators
//!
//! Provides the immutable `TokenSet`, ID-token claim decoding, and the two
//! collaborator traits the credential lifecycle is built against:
//! `Authenticator` (identity provider) and `Persistence` (durable storage).
//! This crate has no dependency on the lifecycle crate or the demo binary.
//!
//! Credential flow:
//! 1. An external browser flow obtains a token response
//! 2. `Authenticator::sign_in()` turns it into a `TokenSet`
//! 3. The token set is saved through `Persistence::save()`
//! 4. `Authenticator::refresh()` swaps the refresh token for a new set
//! 5. `Authenticator::sign_out()` revokes it at the provider

pub mod authenticator;
pub mod claims;
pub mod endpoints;
pub mod error;
pub mod persistence;
pub mod token;

pub use authenticator::{
    AuthFuture, Authenticator, HttpAuthenticator, PresentationContext, TokenHandoff,
};
pub use endpoints::{DEFAULT_SCOPES, OidcEndpoints};
pub use error::{Error, Result};
pub use persistence::{FilePersistence, MemoryPersistence, PersistFuture, Persistence};
pub use token::{TokenResponse, TokenSet, fetch_user_info, refresh_token, revoke_token};
