//! Single-flight token refresh
//!
//! At most one refresh runs per credential. The first caller to find the
//! token expiring creates a `RefreshTicket` and performs the network call;
//! every later caller clones the ticket's watch receiver and waits for the
//! same outcome. The ticket is resolved exactly once: by completion, or by
//! its `Drop` if the holder's future is cancelled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use oidc_auth::{Authenticator, TokenSet};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::state::{CredentialEvent, CredentialState};
use crate::store::{CredentialStore, InFlight, Outcome, Slot};

/// Serializes refreshes of the store's credential through one authenticator.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    authenticator: Arc<dyn Authenticator>,
}

/// What a caller does after inspecting the slot.
enum Plan<'a> {
    Wait(watch::Receiver<Option<Outcome>>),
    Refresh {
        ticket: RefreshTicket<'a>,
        current: Arc<TokenSet>,
    },
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            store,
            authenticator,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Return a token set valid for at least `margin`, refreshing if needed.
    ///
    /// Concurrent callers share a single refresh and observe the same result.
    pub async fn ensure_valid(&self, margin: Duration) -> Result<Arc<TokenSet>> {
        loop {
            let plan = {
                let mut slot = self.store.lock_slot();
                let credential = slot.credential().ok_or(Error::NoCredential)?;
                if credential.state() == CredentialState::Expired {
                    return Err(expired());
                }
                if credential.token_set().is_valid_at(Utc::now(), margin) {
                    return Ok(credential.token_set().clone());
                }
                self.plan_refresh(&mut slot)?
            };
            match self.run(plan).await {
                Outcome::Resolved(result) => return result,
                Outcome::Superseded => debug!("credential changed during refresh, checking again"),
            }
        }
    }

    /// Refresh after the server rejected `stale`, regardless of its expiry.
    ///
    /// If the credential no longer holds `stale` (another caller already
    /// refreshed or a new sign-in replaced it) and the current token set has
    /// not expired, it is returned without a network call.
    pub async fn force_refresh(&self, stale: &TokenSet) -> Result<Arc<TokenSet>> {
        loop {
            let plan = {
                let mut slot = self.store.lock_slot();
                let credential = slot.credential().ok_or(Error::NoCredential)?;
                if credential.state() == CredentialState::Expired {
                    return Err(expired());
                }
                let current = credential.token_set();
                if current.access_token() != stale.access_token()
                    && current.is_valid_at(Utc::now(), Duration::ZERO)
                {
                    debug!("token already replaced, skipping forced refresh");
                    return Ok(current.clone());
                }
                self.plan_refresh(&mut slot)?
            };
            match self.run(plan).await {
                Outcome::Resolved(result) => return result,
                Outcome::Superseded => debug!("credential changed during refresh, checking again"),
            }
        }
    }

    /// Join the in-flight refresh or start one. Called with the slot locked.
    fn plan_refresh<'a>(&'a self, slot: &mut Slot) -> Result<Plan<'a>> {
        if let Some(in_flight) = &slot.in_flight {
            debug!(ticket = in_flight.id, "refresh in flight, waiting");
            return Ok(Plan::Wait(in_flight.rx.clone()));
        }

        let current = slot
            .credential()
            .map(|c| c.token_set().clone())
            .ok_or(Error::NoCredential)?;
        if current.refresh_token().is_none() {
            return Err(Error::NoRefreshToken);
        }

        let (tx, rx) = watch::channel(None);
        let id = slot.next_ticket_id();
        slot.in_flight = Some(InFlight { id, rx });
        slot.apply(CredentialEvent::RefreshStarted);

        Ok(Plan::Refresh {
            ticket: RefreshTicket {
                store: &self.store,
                id,
                generation: slot.generation,
                tx: Some(tx),
            },
            current,
        })
    }

    async fn run(&self, plan: Plan<'_>) -> Outcome {
        match plan {
            Plan::Wait(rx) => wait(rx).await,
            Plan::Refresh { ticket, current } => {
                let Some(refresh_token) = current.refresh_token() else {
                    return Outcome::Resolved(Err(Error::NoRefreshToken));
                };
                info!(
                    ticket = ticket.id,
                    authenticator = self.authenticator.id(),
                    expires_at = %current.expires_at(),
                    "refreshing access token"
                );
                let outcome = self.authenticator.refresh(refresh_token).await;
                ticket.complete(outcome, &current).await
            }
        }
    }
}

fn expired() -> Error {
    Error::InvalidatedRefreshToken("credential expired, sign in again".into())
}

async fn wait(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    };
    outcome.unwrap_or(Outcome::Resolved(Err(Error::Cancelled)))
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("credential_refresh_total", "outcome" => outcome).increment(1);
}

/// The one in-flight refresh of a credential generation.
///
/// Owned by the caller performing the network call. Waiters hold clones of
/// the receiver stored in the slot.
struct RefreshTicket<'a> {
    store: &'a CredentialStore,
    id: u64,
    generation: u64,
    tx: Option<watch::Sender<Option<Outcome>>>,
}

impl RefreshTicket<'_> {
    /// Apply the authenticator's result to the slot and resolve all waiters.
    async fn complete(
        mut self,
        outcome: oidc_auth::Result<TokenSet>,
        previous: &TokenSet,
    ) -> Outcome {
        let (result, label, persist) = {
            let mut slot = self.store.lock_slot();
            let still_current = slot.generation == self.generation
                && slot.in_flight.as_ref().is_some_and(|f| f.id == self.id);

            if !still_current {
                info!(ticket = self.id, "credential changed during refresh, discarding result");
                (Outcome::Superseded, "discarded", false)
            } else {
                slot.in_flight = None;
                match outcome {
                    Ok(token_set) => {
                        let token_set = Arc::new(token_set.inherit_from(previous));
                        slot.update_token_set(token_set.clone(), CredentialEvent::Refreshed);
                        info!(
                            ticket = self.id,
                            expires_at = %token_set.expires_at(),
                            "access token refreshed"
                        );
                        (Outcome::Resolved(Ok(token_set)), "success", true)
                    }
                    Err(oidc_auth::Error::InvalidCredentials(msg)) => {
                        let stripped = Arc::new(previous.without_refresh_token());
                        slot.update_token_set(stripped, CredentialEvent::RefreshInvalidated);
                        warn!(ticket = self.id, error = %msg, "refresh token rejected, credential expired");
                        (
                            Outcome::Resolved(Err(Error::InvalidatedRefreshToken(msg))),
                            "invalidated",
                            true,
                        )
                    }
                    Err(e) => {
                        slot.apply(CredentialEvent::RefreshFailed);
                        warn!(ticket = self.id, error = %e, "token refresh failed, will retry on next use");
                        (Outcome::Resolved(Err(Error::from(e))), "failed", false)
                    }
                }
            }
        };

        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(result.clone()));
        }
        record_outcome(label);

        if persist {
            if let Err(e) = self.store.sync_persisted().await {
                warn!(error = %e, "failed to persist refreshed token");
            }
        }
        result
    }
}

impl Drop for RefreshTicket<'_> {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let still_current = {
            let mut slot = self.store.lock_slot();
            let current = slot.in_flight.as_ref().is_some_and(|f| f.id == self.id);
            if current {
                slot.in_flight = None;
                slot.apply(CredentialEvent::RefreshCancelled);
            }
            current
        };
        warn!(ticket = self.id, "refresh cancelled before completion");
        record_outcome("cancelled");
        let outcome = if still_current {
            Outcome::Resolved(Err(Error::Cancelled))
        } else {
            Outcome::Superseded
        };
        tx.send_replace(Some(outcome));
    }
}
