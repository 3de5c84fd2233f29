//! Error types for OIDC collaborator operations

/// Errors from the authenticator and persistence collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid token set: {0}")]
    InvalidTokenSet(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Result alias for OIDC operations.
pub type Result<T> = std::result::Result<T, Error>;
