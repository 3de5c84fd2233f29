//! OAuth2/OIDC credential lifecycle
//!
//! Manages the single credential of a signed-in user:
//! - `CredentialStore` holds zero or one credential and persists it
//! - `RefreshCoordinator` guarantees at most one in-flight refresh
//! - `claims` turns token or user-info claims into display strings
//! - `AuthorizingHttpClient` attaches a valid bearer token to requests
//! - `Session` wires these around an injected `Authenticator`
//!
//! The identity provider and storage backend are collaborators from the
//! `oidc-auth` crate and are injected, never global.

pub mod claims;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod refresh;
pub mod session;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;

pub use claims::{ClaimsView, NOT_AVAILABLE, extract, extract_user_info};
pub use client::AuthorizingHttpClient;
pub use coordinator::RefreshCoordinator;
pub use error::{Error, Result};
pub use refresh::spawn_refresh_task;
pub use session::{Session, UserInfo};
pub use state::{CredentialEvent, CredentialState, transition};
pub use store::{Credential, CredentialStore};
