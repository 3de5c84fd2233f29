//! OIDC provider endpoints
//!
//! Endpoint URLs default to the Okta authorization-server layout
//! (`{issuer}/v1/token` and friends). Any of them can be overridden from
//! configuration for providers that publish a different layout.

/// Scopes requested when the configuration does not list any.
/// `offline_access` is what makes the provider issue a refresh token.
pub const DEFAULT_SCOPES: &str = "openid profile offline_access";

/// Resolved endpoint set for one OIDC issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcEndpoints {
    pub issuer: String,
    pub token: String,
    pub userinfo: String,
    pub revocation: String,
}

impl OidcEndpoints {
    /// Derive the default endpoint layout from an issuer URL.
    pub fn for_issuer(issuer: &str) -> Self {
        let issuer = issuer.trim_end_matches('/').to_string();
        Self {
            token: format!("{issuer}/v1/token"),
            userinfo: format!("{issuer}/v1/userinfo"),
            revocation: format!("{issuer}/v1/revoke"),
            issuer,
        }
    }

    pub fn with_token(mut self, url: impl Into<String>) -> Self {
        self.token = url.into();
        self
    }

    pub fn with_userinfo(mut self, url: impl Into<String>) -> Self {
        self.userinfo = url.into();
        self
    }

    pub fn with_revocation(mut self, url: impl Into<String>) -> Self {
        self.revocation = url.into();
        self
    }
}
