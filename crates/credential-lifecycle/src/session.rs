//! Session façade over the credential lifecycle
//!
//! Wires one authenticator, one credential store, the refresh coordinator
//! and the authorizing client together. This is the surface a UI or CLI
//! talks to.

use std::sync::Arc;
use std::time::Duration;

use oidc_auth::{Authenticator, PresentationContext, TokenSet};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::claims::{self, ClaimsView};
use crate::client::AuthorizingHttpClient;
use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::state::CredentialState;
use crate::store::{Credential, CredentialStore};

/// Result of a user-info lookup. A failed fetch is never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInfo {
    Available(ClaimsView),
    Unavailable(String),
}

pub struct Session {
    authenticator: Arc<dyn Authenticator>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    http: AuthorizingHttpClient,
    margin: Duration,
    /// Last successful user-info lookup, keyed by store generation.
    user_info_cache: Mutex<Option<(u64, ClaimsView)>>,
}

impl Session {
    /// Build a session around an existing store.
    ///
    /// `margin` is how long a token must stay valid to be handed out without
    /// a refresh.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        store: Arc<CredentialStore>,
        http_client: reqwest::Client,
        margin: Duration,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            authenticator.clone(),
        ));
        let http = AuthorizingHttpClient::new(http_client, coordinator.clone(), margin);
        Self {
            authenticator,
            store,
            coordinator,
            http,
            margin,
            user_info_cache: Mutex::new(None),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_some()
    }

    pub fn state(&self) -> CredentialState {
        self.store.state()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.store.get()
    }

    pub fn id_token(&self) -> Option<String> {
        self.store
            .get()
            .and_then(|c| c.token_set().id_token().map(str::to_string))
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn http_client(&self) -> &AuthorizingHttpClient {
        &self.http
    }

    /// Run the authenticator's sign-in flow and store the result.
    ///
    /// A `PersistenceFailure` still leaves the new credential active in memory.
    pub async fn sign_in(&self, context: &PresentationContext) -> Result<Credential> {
        let token_set = self.authenticator.sign_in(context).await?;
        let credential = self.store.store(token_set).await?;
        info!(
            authenticator = self.authenticator.id(),
            username = credential.token_set().claim(oidc_auth::claims::PREFERRED_USERNAME).unwrap_or("unknown"),
            "signed in"
        );
        Ok(credential)
    }

    /// End the provider session and remove the credential.
    ///
    /// If the provider call fails the credential is kept and the error returned.
    pub async fn sign_out(&self, context: &PresentationContext) -> Result<()> {
        let Some(credential) = self.store.get() else {
            info!("sign-out requested with no credential");
            return Ok(());
        };
        self.authenticator
            .sign_out(context, credential.token_set())
            .await?;
        self.store.remove().await?;
        info!("signed out");
        Ok(())
    }

    pub async fn refresh_if_needed(&self) -> Result<Arc<TokenSet>> {
        self.coordinator.ensure_valid(self.margin).await
    }

    /// Claims from the current ID token, if signed in.
    pub fn token_info(&self) -> Option<ClaimsView> {
        self.store.get().map(|c| claims::extract(c.token_set()))
    }

    /// User-info claims for the current sign-in.
    ///
    /// A successful lookup is reused until the credential is replaced or
    /// removed; refreshes keep it. Failures are not cached.
    pub async fn user_info(&self) -> UserInfo {
        let generation = self.store.generation();
        if self.store.get().is_some() {
            if let Some((cached_generation, view)) = self.user_info_cache.lock().as_ref() {
                if *cached_generation == generation {
                    debug!("serving cached user info");
                    return UserInfo::Available(view.clone());
                }
            }
        }

        match self.fetch_user_info().await {
            Ok(view) => {
                if self.store.generation() == generation {
                    *self.user_info_cache.lock() = Some((generation, view.clone()));
                }
                UserInfo::Available(view)
            }
            Err(e) => {
                warn!(error = %e, "user info unavailable");
                UserInfo::Unavailable(e.to_string())
            }
        }
    }

    async fn fetch_user_info(&self) -> Result<ClaimsView> {
        let token_set = self.coordinator.ensure_valid(self.margin).await?;
        let info = self
            .authenticator
            .fetch_user_info(&token_set)
            .await
            .map_err(Error::from)?;
        Ok(claims::extract_user_info(&token_set, &info))
    }
}
