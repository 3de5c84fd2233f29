//! Error taxonomy for credential lifecycle operations

/// Errors surfaced by the store, coordinator and authorizing client.
///
/// `Clone` so a single refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no credential: sign in first")]
    NoCredential,

    #[error("credential has no refresh token")]
    NoRefreshToken,

    #[error("refresh token invalidated, sign in again: {0}")]
    InvalidatedRefreshToken(String),

    #[error("authenticator failure: {0}")]
    AuthenticatorFailure(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP request failed: {0}")]
    Http(String),
}

impl Error {
    /// Wrap a storage collaborator error.
    pub fn persistence(err: oidc_auth::Error) -> Self {
        Error::PersistenceFailure(err.to_string())
    }
}

impl From<oidc_auth::Error> for Error {
    fn from(err: oidc_auth::Error) -> Self {
        match err {
            oidc_auth::Error::InvalidCredentials(msg) => Error::InvalidatedRefreshToken(msg),
            oidc_auth::Error::Cancelled => Error::Cancelled,
            other => Error::AuthenticatorFailure(other.to_string()),
        }
    }
}

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
