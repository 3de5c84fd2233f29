//! Token sets and the OAuth2/OIDC endpoint calls that produce them
//!
//! `TokenSet` is the immutable value handed around by the credential
//! lifecycle: it is built once from a token endpoint response and replaced
//! wholesale on refresh. The HTTP helpers here cover the three endpoint
//! interactions the core needs once a user has signed in:
//! 1. Refresh (`grant_type=refresh_token` against the token endpoint)
//! 2. User info (`GET` with the access token as bearer)
//! 3. Revocation (sign-out)

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};

use crate::claims;
use crate::error::{Error, Result};

/// Response from the token endpoint for both code exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. The caller
/// converts it to an absolute expiry when building a `TokenSet`.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Immutable access/ID/refresh token bundle with expiry and claims.
///
/// Invariants, checked at construction and on deserialization:
/// - `access_token` is non-empty
/// - `expires_at > issued_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TokenSetRecord", into = "TokenSetRecord")]
pub struct TokenSet {
    access_token: Secret<String>,
    id_token: Option<Secret<String>>,
    refresh_token: Option<Secret<String>>,
    token_type: String,
    scope: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    claims: BTreeMap<String, String>,
}

impl TokenSet {
    /// Create a bearer token set with no ID token, refresh token or claims.
    pub fn new(
        access_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(Error::InvalidTokenSet("access token is empty".into()));
        }
        if expires_at <= issued_at {
            return Err(Error::InvalidTokenSet(format!(
                "expires_at ({expires_at}) must be after issued_at ({issued_at})"
            )));
        }
        Ok(Self {
            access_token: Secret::new(access_token),
            id_token: None,
            refresh_token: None,
            token_type: default_token_type(),
            scope: None,
            issued_at,
            expires_at,
            claims: BTreeMap::new(),
        })
    }

    /// Build a token set from a token endpoint response received at `issued_at`.
    ///
    /// Claims are decoded from the ID token when one is present.
    pub fn from_response(response: TokenResponse, issued_at: DateTime<Utc>) -> Result<Self> {
        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| issued_at.checked_add_signed(delta))
            .ok_or_else(|| {
                Error::InvalidTokenSet(format!("expires_in out of range: {}", response.expires_in))
            })?;

        let mut token_set = Self::new(response.access_token, issued_at, expires_at)?;
        token_set.token_type = response.token_type;
        token_set.scope = response.scope;
        if let Some(refresh) = response.refresh_token {
            token_set = token_set.with_refresh_token(refresh);
        }
        if let Some(id_token) = response.id_token {
            token_set = token_set.with_id_token(id_token)?;
        }
        Ok(token_set)
    }

    /// Attach an ID token, merging its decoded claims over any existing ones.
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Result<Self> {
        let id_token = id_token.into();
        let decoded = claims::decode_id_token(&id_token)?;
        self.claims.extend(decoded);
        self.id_token = Some(Secret::new(id_token));
        Ok(self)
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        let refresh_token = refresh_token.into();
        self.refresh_token = (!refresh_token.is_empty()).then(|| Secret::new(refresh_token));
        self
    }

    pub fn with_claims(mut self, claims: BTreeMap<String, String>) -> Self {
        self.claims.extend(claims);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Fill in what a refresh response omitted from the set it replaces.
    ///
    /// Providers may skip refresh-token rotation and may not re-issue an ID
    /// token on refresh; in both cases the previous values stay in effect.
    pub fn inherit_from(mut self, previous: &TokenSet) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        if self.id_token.is_none() {
            self.id_token = previous.id_token.clone();
            for (key, value) in &previous.claims {
                self.claims
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        self
    }

    /// Copy of this set with the refresh token dropped.
    pub fn without_refresh_token(&self) -> Self {
        Self {
            refresh_token: None,
            ..self.clone()
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_str()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_ref().map(Secret::expose_str)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(Secret::expose_str)
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn claims(&self) -> &BTreeMap<String, String> {
        &self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).map(String::as_str)
    }

    /// Whether the access token is still usable at `now` with `margin` to spare.
    ///
    /// Valid means `now + margin < expires_at`. A margin too large to
    /// represent counts as not valid.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        TimeDelta::from_std(margin)
            .ok()
            .and_then(|margin| now.checked_add_signed(margin))
            .is_some_and(|deadline| deadline < self.expires_at)
    }

    /// Time left before expiry at `now` (negative once expired).
    pub fn remaining_at(&self, now: DateTime<Utc>) -> TimeDelta {
        self.expires_at - now
    }
}

/// Flat on-disk/wire form of a `TokenSet`.
#[derive(Serialize, Deserialize)]
struct TokenSetRecord {
    access_token: Secret<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<Secret<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<Secret<String>>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    claims: BTreeMap<String, String>,
}

impl TryFrom<TokenSetRecord> for TokenSet {
    type Error = Error;

    fn try_from(record: TokenSetRecord) -> Result<Self> {
        let mut token_set = TokenSet::new(
            record.access_token.expose_str(),
            record.issued_at,
            record.expires_at,
        )?;
        token_set.id_token = record.id_token;
        token_set.refresh_token = record.refresh_token;
        token_set.token_type = record.token_type;
        token_set.scope = record.scope;
        token_set.claims = record.claims;
        Ok(token_set)
    }
}

impl From<TokenSet> for TokenSetRecord {
    fn from(token_set: TokenSet) -> Self {
        Self {
            access_token: token_set.access_token,
            id_token: token_set.id_token,
            refresh_token: token_set.refresh_token,
            token_type: token_set.token_type,
            scope: token_set.scope,
            issued_at: token_set.issued_at,
            expires_at: token_set.expires_at,
            claims: token_set.claims,
        }
    }
}

/// OAuth error body (`{"error": "invalid_grant", ...}`), RFC 6749 section 5.2.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

/// Refresh an access token using a refresh token.
///
/// 400 `invalid_grant`, 401 and 403 mean the refresh token is revoked or
/// expired and map to `InvalidCredentials`; anything else non-2xx is a
/// retryable `TokenExchange` failure.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    scope: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(token_endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", client_id),
            ("scope", scope),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if is_rejected_grant(status.as_u16(), &body) {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

fn is_rejected_grant(status: u16, body: &str) -> bool {
    match status {
        401 | 403 => true,
        400 => serde_json::from_str::<OAuthErrorBody>(body)
            .map(|b| b.error == "invalid_grant")
            .unwrap_or(false),
        _ => false,
    }
}

/// Fetch the user-info document for an access token and flatten it to strings.
pub async fn fetch_user_info(
    client: &reqwest::Client,
    userinfo_endpoint: &str,
    access_token: &str,
) -> Result<BTreeMap<String, String>> {
    let response = client
        .get(userinfo_endpoint)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::Http(format!("user info request failed: {e}")))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::InvalidCredentials(
            "user info endpoint rejected the access token".into(),
        ));
    }
    if !status.is_success() {
        return Err(Error::Http(format!("user info endpoint returned {status}")));
    }

    let document = response
        .json::<serde_json::Map<String, serde_json::Value>>()
        .await
        .map_err(|e| Error::CredentialParse(format!("invalid user info response: {e}")))?;
    Ok(claims::flatten(document))
}

/// Revoke a token at the revocation endpoint (RFC 7009).
///
/// `token_type_hint` is `"refresh_token"` or `"access_token"`.
pub async fn revoke_token(
    client: &reqwest::Client,
    revocation_endpoint: &str,
    client_id: &str,
    token: &str,
    token_type_hint: &str,
) -> Result<()> {
    let response = client
        .post(revocation_endpoint)
        .form(&[
            ("token", token),
            ("token_type_hint", token_type_hint),
            ("client_id", client_id),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("revocation request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "revocation returned {status}: {body}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::encode_test_jwt;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn token_response_deserializes_minimal_body() {
        let json = r#"{"access_token":"at_abc","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, 3600);
        assert!(token.refresh_token.is_none());
        assert!(token.id_token.is_none());
    }

    #[test]
    fn from_response_computes_expiry_and_claims() {
        let id_token = encode_test_jwt(&json!({
            "iss": "https://idp.example.com",
            "preferred_username": "alice"
        }));
        let response = TokenResponse {
            access_token: "at_1".into(),
            token_type: "Bearer".into(),
            expires_in: 3600,
            refresh_token: Some("rt_1".into()),
            id_token: Some(id_token.clone()),
            scope: Some("openid offline_access".into()),
        };

        let token_set = TokenSet::from_response(response, at(1_000)).unwrap();
        assert_eq!(token_set.access_token(), "at_1");
        assert_eq!(token_set.refresh_token(), Some("rt_1"));
        assert_eq!(token_set.id_token(), Some(id_token.as_str()));
        assert_eq!(token_set.expires_at(), at(4_600));
        assert_eq!(token_set.claim("preferred_username"), Some("alice"));
        assert_eq!(token_set.scope(), Some("openid offline_access"));
    }

    #[test]
    fn rejects_empty_access_token() {
        let err = TokenSet::new("", at(0), at(10)).unwrap_err();
        assert!(matches!(err, Error::InvalidTokenSet(_)));
    }

    #[test]
    fn rejects_expiry_not_after_issue() {
        assert!(TokenSet::new("at", at(10), at(10)).is_err());
        assert!(TokenSet::new("at", at(10), at(5)).is_err());

        let response = TokenResponse {
            access_token: "at".into(),
            token_type: "Bearer".into(),
            expires_in: 0,
            refresh_token: None,
            id_token: None,
            scope: None,
        };
        assert!(TokenSet::from_response(response, at(10)).is_err());
    }

    #[test]
    fn validity_honours_margin() {
        let token_set = TokenSet::new("at", at(0), at(100)).unwrap();
        assert!(token_set.is_valid_at(at(10), Duration::from_secs(60)));
        assert!(!token_set.is_valid_at(at(40), Duration::from_secs(60)));
        assert!(!token_set.is_valid_at(at(100), Duration::ZERO));
        assert!(token_set.is_valid_at(at(99), Duration::ZERO));
        assert!(!token_set.is_valid_at(at(0), Duration::MAX));
    }

    #[test]
    fn inherit_keeps_previous_refresh_and_id_token() {
        let id_token = encode_test_jwt(&json!({"sub": "00u1", "preferred_username": "alice"}));
        let previous = TokenSet::new("at_old", at(0), at(100))
            .unwrap()
            .with_refresh_token("rt_old")
            .with_id_token(id_token.clone())
            .unwrap();

        let refreshed = TokenSet::new("at_new", at(90), at(190))
            .unwrap()
            .inherit_from(&previous);
        assert_eq!(refreshed.access_token(), "at_new");
        assert_eq!(refreshed.refresh_token(), Some("rt_old"));
        assert_eq!(refreshed.id_token(), Some(id_token.as_str()));
        assert_eq!(refreshed.claim("preferred_username"), Some("alice"));

        let rotated = TokenSet::new("at_new", at(90), at(190))
            .unwrap()
            .with_refresh_token("rt_new")
            .inherit_from(&previous);
        assert_eq!(rotated.refresh_token(), Some("rt_new"));
    }

    #[test]
    fn without_refresh_token_leaves_original_untouched() {
        let token_set = TokenSet::new("at", at(0), at(100))
            .unwrap()
            .with_refresh_token("rt");
        let stripped = token_set.without_refresh_token();
        assert_eq!(stripped.refresh_token(), None);
        assert_eq!(token_set.refresh_token(), Some("rt"));
        assert_eq!(stripped.access_token(), "at");
    }

    #[test]
    fn serde_round_trip_revalidates() {
        let token_set = TokenSet::new("at", at(0), at(100))
            .unwrap()
            .with_refresh_token("rt")
            .with_scope("openid");
        let json = serde_json::to_string(&token_set).unwrap();
        assert!(json.contains("\"refresh_token\":\"rt\""));
        let back: TokenSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token_set);

        let tampered = json.replace("\"access_token\":\"at\"", "\"access_token\":\"\"");
        assert!(serde_json::from_str::<TokenSet>(&tampered).is_err());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let token_set = TokenSet::new("at_sensitive", at(0), at(100))
            .unwrap()
            .with_refresh_token("rt_sensitive");
        let debug = format!("{token_set:?}");
        assert!(!debug.contains("at_sensitive"));
        assert!(!debug.contains("rt_sensitive"));
    }

    #[test]
    fn rejected_grant_classification() {
        assert!(is_rejected_grant(401, ""));
        assert!(is_rejected_grant(403, "forbidden"));
        assert!(is_rejected_grant(
            400,
            r#"{"error":"invalid_grant","error_description":"The refresh token is invalid or expired."}"#
        ));
        assert!(!is_rejected_grant(400, r#"{"error":"invalid_request"}"#));
        assert!(!is_rejected_grant(400, "not json"));
        assert!(!is_rejected_grant(503, "unavailable"));
    }
}
