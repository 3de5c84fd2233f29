//! Identity provider abstraction
//!
//! The credential lifecycle never talks to an identity provider directly.
//! Everything that needs the network or a browser goes through an injected
//! `Authenticator`, so tests can substitute a scripted double and the
//! interactive sign-in flow can live outside this workspace.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::endpoints::{DEFAULT_SCOPES, OidcEndpoints};
use crate::error::{Error, Result};
use crate::token::{self, TokenResponse, TokenSet};

/// Boxed future returned by `Authenticator` methods.
pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Opaque handle passed through to the authenticator's interactive calls.
///
/// A UI would put its window or view controller here. The credential
/// lifecycle never inspects it.
#[derive(Clone, Default)]
pub struct PresentationContext(Option<Arc<dyn Any + Send + Sync>>);

impl PresentationContext {
    /// Context carrying nothing, for non-interactive callers.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|value| value.downcast_ref::<T>())
    }
}

impl fmt::Debug for PresentationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "PresentationContext(..)"),
            None => write!(f, "PresentationContext(none)"),
        }
    }
}

/// Abstraction over the identity provider.
///
/// - `sign_in` runs the interactive flow and returns a fresh token set
/// - `sign_out` ends the provider session for `token_set`
/// - `refresh` exchanges a refresh token for a new token set
/// - `fetch_user_info` reads the user-info document for an access token
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Authenticator>`).
pub trait Authenticator: Send + Sync {
    /// Identifier for logging (e.g. "oidc", "scripted")
    fn id(&self) -> &str;

    fn sign_in<'a>(&'a self, context: &'a PresentationContext) -> AuthFuture<'a, TokenSet>;

    fn sign_out<'a>(
        &'a self,
        context: &'a PresentationContext,
        token_set: &'a TokenSet,
    ) -> AuthFuture<'a, ()>;

    /// Exchange `refresh_token` for a new token set.
    ///
    /// `Error::InvalidCredentials` means the provider rejected the refresh
    /// token itself; every other error is treated as retryable.
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> AuthFuture<'a, TokenSet>;

    fn fetch_user_info<'a>(
        &'a self,
        token_set: &'a TokenSet,
    ) -> AuthFuture<'a, BTreeMap<String, String>>;
}

/// Token endpoint response captured by an external browser flow.
///
/// Placed in a `PresentationContext` to hand the result of the interactive
/// sign-in over to `HttpAuthenticator::sign_in`.
#[derive(Debug, Clone)]
pub struct TokenHandoff {
    pub response: TokenResponse,
    pub received_at: DateTime<Utc>,
}

impl TokenHandoff {
    pub fn new(response: TokenResponse, received_at: DateTime<Utc>) -> Self {
        Self {
            response,
            received_at,
        }
    }
}

/// OIDC authenticator talking to a provider's token, user-info and
/// revocation endpoints with `reqwest`.
pub struct HttpAuthenticator {
    client: reqwest::Client,
    client_id: String,
    scope: String,
    endpoints: OidcEndpoints,
}

impl HttpAuthenticator {
    pub fn new(
        client: reqwest::Client,
        client_id: impl Into<String>,
        endpoints: OidcEndpoints,
    ) -> Self {
        Self {
            client,
            client_id: client_id.into(),
            scope: DEFAULT_SCOPES.to_string(),
            endpoints,
        }
    }

    /// Space-separated scopes sent with refresh requests.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn endpoints(&self) -> &OidcEndpoints {
        &self.endpoints
    }
}

impl Authenticator for HttpAuthenticator {
    fn id(&self) -> &str {
        "oidc"
    }

    fn sign_in<'a>(&'a self, context: &'a PresentationContext) -> AuthFuture<'a, TokenSet> {
        Box::pin(async move {
            let handoff = context.downcast_ref::<TokenHandoff>().ok_or_else(|| {
                Error::Unsupported(
                    "interactive sign-in requires a token handoff from the browser flow".into(),
                )
            })?;
            let token_set = TokenSet::from_response(handoff.response.clone(), handoff.received_at)?;
            info!(
                issuer = %self.endpoints.issuer,
                expires_at = %token_set.expires_at(),
                has_refresh_token = token_set.refresh_token().is_some(),
                "accepted sign-in token handoff"
            );
            Ok(token_set)
        })
    }

    fn sign_out<'a>(
        &'a self,
        _context: &'a PresentationContext,
        token_set: &'a TokenSet,
    ) -> AuthFuture<'a, ()> {
        Box::pin(async move {
            let (token, hint) = match token_set.refresh_token() {
                Some(refresh) => (refresh, "refresh_token"),
                None => (token_set.access_token(), "access_token"),
            };
            token::revoke_token(
                &self.client,
                &self.endpoints.revocation,
                &self.client_id,
                token,
                hint,
            )
            .await?;
            info!(token_type_hint = hint, "revoked token at provider");
            Ok(())
        })
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> AuthFuture<'a, TokenSet> {
        Box::pin(async move {
            debug!(endpoint = %self.endpoints.token, "refreshing access token");
            let response = token::refresh_token(
                &self.client,
                &self.endpoints.token,
                &self.client_id,
                &self.scope,
                refresh_token,
            )
            .await?;
            TokenSet::from_response(response, Utc::now())
        })
    }

    fn fetch_user_info<'a>(
        &'a self,
        token_set: &'a TokenSet,
    ) -> AuthFuture<'a, BTreeMap<String, String>> {
        Box::pin(token::fetch_user_info(
            &self.client,
            &self.endpoints.userinfo,
            token_set.access_token(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::encode_test_jwt;
    use axum::extract::Form;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    type Captured = Arc<Mutex<Vec<BTreeMap<String, String>>>>;

    async fn spawn_idp(router: axum::Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn authenticator(issuer: &str) -> HttpAuthenticator {
        HttpAuthenticator::new(
            reqwest::Client::new(),
            "0oa-test-client",
            OidcEndpoints::for_issuer(issuer),
        )
    }

    fn token_set_with_refresh(refresh: Option<&str>) -> TokenSet {
        let now = Utc::now();
        let token_set = TokenSet::new("at_current", now, now + chrono::TimeDelta::minutes(5)).unwrap();
        match refresh {
            Some(rt) => token_set.with_refresh_token(rt),
            None => token_set,
        }
    }

    #[tokio::test]
    async fn refresh_posts_refresh_grant_and_parses_response() {
        let captured: Captured = Arc::default();
        let seen = captured.clone();
        let id_token = encode_test_jwt(&serde_json::json!({"preferred_username": "alice"}));
        let router = axum::Router::new().route(
            "/v1/token",
            post(move |Form(form): Form<BTreeMap<String, String>>| {
                let seen = seen.clone();
                let id_token = id_token.clone();
                async move {
                    seen.lock().unwrap().push(form);
                    axum::Json(serde_json::json!({
                        "access_token": "at_new",
                        "token_type": "Bearer",
                        "expires_in": 3600,
                        "refresh_token": "rt_rotated",
                        "id_token": id_token,
                    }))
                }
            }),
        );
        let issuer = spawn_idp(router).await;

        let token_set = authenticator(&issuer).refresh("rt_old").await.unwrap();
        assert_eq!(token_set.access_token(), "at_new");
        assert_eq!(token_set.refresh_token(), Some("rt_rotated"));
        assert_eq!(token_set.claim("preferred_username"), Some("alice"));
        assert!(token_set.expires_at() > Utc::now());

        let forms = captured.lock().unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["grant_type"], "refresh_token");
        assert_eq!(forms[0]["refresh_token"], "rt_old");
        assert_eq!(forms[0]["client_id"], "0oa-test-client");
        assert_eq!(forms[0]["scope"], DEFAULT_SCOPES);
    }

    #[tokio::test]
    async fn refresh_maps_invalid_grant_to_invalid_credentials() {
        let router = axum::Router::new().route(
            "/v1/token",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    r#"{"error":"invalid_grant","error_description":"The refresh token is invalid or expired."}"#,
                )
            }),
        );
        let issuer = spawn_idp(router).await;

        let err = authenticator(&issuer).refresh("rt_revoked").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn refresh_server_error_is_retryable() {
        let router = axum::Router::new().route(
            "/v1/token",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let issuer = spawn_idp(router).await;

        let err = authenticator(&issuer).refresh("rt").await.unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn refresh_transport_failure_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = authenticator(&format!("http://{addr}"))
            .refresh("rt")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn user_info_sends_bearer_and_flattens_document() {
        let router = axum::Router::new().route(
            "/v1/userinfo",
            axum::routing::get(|headers: HeaderMap| async move {
                let auth = headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if auth != "Bearer at_current" {
                    return (StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({})));
                }
                (
                    StatusCode::OK,
                    axum::Json(serde_json::json!({
                        "sub": "00u1",
                        "preferred_username": "alice",
                        "updated_at": 1760781845,
                        "email_verified": true
                    })),
                )
            }),
        );
        let issuer = spawn_idp(router).await;

        let info = authenticator(&issuer)
            .fetch_user_info(&token_set_with_refresh(None))
            .await
            .unwrap();
        assert_eq!(info["sub"], "00u1");
        assert_eq!(info["preferred_username"], "alice");
        assert_eq!(info["updated_at"], "1760781845");
        assert_eq!(info["email_verified"], "true");
    }

    #[tokio::test]
    async fn user_info_unauthorized_is_invalid_credentials() {
        let router = axum::Router::new().route(
            "/v1/userinfo",
            axum::routing::get(|| async { StatusCode::UNAUTHORIZED }),
        );
        let issuer = spawn_idp(router).await;

        let err = authenticator(&issuer)
            .fetch_user_info(&token_set_with_refresh(None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn sign_out_revokes_refresh_token_when_present() {
        let captured: Captured = Arc::default();
        let seen = captured.clone();
        let router = axum::Router::new().route(
            "/v1/revoke",
            post(move |Form(form): Form<BTreeMap<String, String>>| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(form);
                    StatusCode::OK
                }
            }),
        );
        let issuer = spawn_idp(router).await;
        let auth = authenticator(&issuer);
        let context = PresentationContext::none();

        auth.sign_out(&context, &token_set_with_refresh(Some("rt_live")))
            .await
            .unwrap();
        auth.sign_out(&context, &token_set_with_refresh(None))
            .await
            .unwrap();

        let forms = captured.lock().unwrap();
        assert_eq!(forms[0]["token"], "rt_live");
        assert_eq!(forms[0]["token_type_hint"], "refresh_token");
        assert_eq!(forms[1]["token"], "at_current");
        assert_eq!(forms[1]["token_type_hint"], "access_token");
    }

    #[tokio::test]
    async fn sign_out_failure_propagates() {
        let router = axum::Router::new().route(
            "/v1/revoke",
            post(|| async { (StatusCode::BAD_REQUEST, r#"{"error":"invalid_client"}"#) }),
        );
        let issuer = spawn_idp(router).await;

        let err = authenticator(&issuer)
            .sign_out(&PresentationContext::none(), &token_set_with_refresh(Some("rt")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn sign_in_accepts_token_handoff() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "at_signed_in",
            "expires_in": 3600,
            "refresh_token": "rt_signed_in"
        }))
        .unwrap();
        let received_at = Utc::now();
        let context = PresentationContext::new(TokenHandoff::new(response, received_at));

        let token_set = authenticator("https://idp.invalid")
            .sign_in(&context)
            .await
            .unwrap();
        assert_eq!(token_set.access_token(), "at_signed_in");
        assert_eq!(token_set.refresh_token(), Some("rt_signed_in"));
        assert_eq!(token_set.issued_at(), received_at);
    }

    #[tokio::test]
    async fn sign_in_without_handoff_is_unsupported() {
        let err = authenticator("https://idp.invalid")
            .sign_in(&PresentationContext::new("a window"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)), "got: {err:?}");
    }

    #[test]
    fn presentation_context_is_opaque_in_debug() {
        let context = PresentationContext::new(String::from("secret window title"));
        assert_eq!(format!("{context:?}"), "PresentationContext(..)");
        assert_eq!(
            context.downcast_ref::<String>().map(String::as_str),
            Some("secret window title")
        );
        assert!(PresentationContext::none().downcast_ref::<String>().is_none());
    }
}
