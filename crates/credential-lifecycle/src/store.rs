//! Process-wide credential slot with persistence
//!
//! The store owns zero or one credential. Every mutation happens under a
//! short synchronous lock that is never held across `.await`; durable
//! writes happen afterwards through a separate async gate that always
//! persists the latest in-memory snapshot. In-memory state is the source of
//! truth: a failed write is reported to the caller but never rolled back.

use std::sync::Arc;

use oidc_auth::{Persistence, TokenSet};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::state::{CredentialEvent, CredentialState, transition};

/// Result of one refresh, shared with every waiter.
#[derive(Clone)]
pub(crate) enum Outcome {
    Resolved(Result<Arc<TokenSet>>),
    /// The credential was removed or replaced while the refresh was out.
    /// Callers check the slot again instead of trusting the result.
    Superseded,
}

/// Snapshot of the current credential.
///
/// Cheap to clone; the token set is shared, never copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    token_set: Arc<TokenSet>,
    state: CredentialState,
}

impl Credential {
    pub fn token_set(&self) -> &Arc<TokenSet> {
        &self.token_set
    }

    pub fn state(&self) -> CredentialState {
        self.state
    }
}

/// An in-flight refresh, identified by ticket id.
pub(crate) struct InFlight {
    pub(crate) id: u64,
    pub(crate) rx: watch::Receiver<Option<Outcome>>,
}

/// Mutable state behind the store lock.
///
/// `generation` changes whenever the credential is replaced or removed, so a
/// refresh started against an older generation can tell its result is stale.
pub(crate) struct Slot {
    credential: Option<Credential>,
    pub(crate) generation: u64,
    pub(crate) in_flight: Option<InFlight>,
    next_ticket: u64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            credential: None,
            generation: 0,
            in_flight: None,
            next_ticket: 0,
        }
    }

    pub(crate) fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub(crate) fn state(&self) -> CredentialState {
        self.credential
            .as_ref()
            .map_or(CredentialState::Absent, |c| c.state)
    }

    /// Swap in a new credential (or none), invalidating any in-flight refresh.
    fn replace(&mut self, token_set: Option<Arc<TokenSet>>) -> Option<Credential> {
        let event = match token_set {
            Some(_) => CredentialEvent::SignedIn,
            None => CredentialEvent::SignedOut,
        };
        let state = transition(self.state(), event);
        self.generation += 1;
        self.in_flight = None;
        let next = token_set.map(|token_set| Credential { token_set, state });
        std::mem::replace(&mut self.credential, next)
    }

    /// Apply an event to the current credential's state.
    pub(crate) fn apply(&mut self, event: CredentialEvent) -> CredentialState {
        match self.credential.as_mut() {
            Some(credential) => {
                credential.state = transition(credential.state, event);
                credential.state
            }
            None => CredentialState::Absent,
        }
    }

    /// Replace the token set in place of a refresh, keeping the generation.
    pub(crate) fn update_token_set(&mut self, token_set: Arc<TokenSet>, event: CredentialEvent) {
        if let Some(credential) = self.credential.as_mut() {
            credential.token_set = token_set;
            credential.state = transition(credential.state, event);
        }
    }

    pub(crate) fn next_ticket_id(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

/// Holder of zero or one credential, with persistence hooks.
///
/// Created once at startup and shared via `Arc` for the life of the process.
pub struct CredentialStore {
    slot: Mutex<Slot>,
    persistence: Arc<dyn Persistence>,
    persist_gate: tokio::sync::Mutex<()>,
}

impl CredentialStore {
    /// Create an empty store backed by `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            slot: Mutex::new(Slot::empty()),
            persistence,
            persist_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a store and restore any persisted token set as an active credential.
    pub async fn load(persistence: Arc<dyn Persistence>) -> Result<Self> {
        let store = Self::new(persistence);
        match store.persistence.load().await.map_err(Error::persistence)? {
            Some(token_set) => {
                info!(
                    expires_at = %token_set.expires_at(),
                    has_refresh_token = token_set.refresh_token().is_some(),
                    "restored persisted credential"
                );
                store.slot.lock().replace(Some(Arc::new(token_set)));
            }
            None => info!("no persisted credential, starting signed out"),
        }
        Ok(store)
    }

    /// Current credential, if any. Never waits.
    pub fn get(&self) -> Option<Credential> {
        self.slot.lock().credential.clone()
    }

    pub fn state(&self) -> CredentialState {
        self.slot.lock().state()
    }

    /// Replace any existing credential with a new active one and persist it.
    ///
    /// On `PersistenceFailure` the new credential is still in place.
    pub async fn store(&self, token_set: TokenSet) -> Result<Credential> {
        let credential = {
            let mut slot = self.slot.lock();
            let previous = slot.replace(Some(Arc::new(token_set)));
            if previous.is_some() {
                debug!("replacing existing credential");
            }
            slot.credential.clone().ok_or(Error::NoCredential)?
        };
        info!(
            state = %credential.state,
            expires_at = %credential.token_set.expires_at(),
            "credential stored"
        );
        self.sync_persisted().await?;
        Ok(credential)
    }

    /// Clear the credential and its persisted form. No-op if absent.
    pub async fn remove(&self) -> Result<()> {
        let previous = self.slot.lock().replace(None);
        match previous {
            Some(_) => info!("credential removed"),
            None => debug!("no credential to remove"),
        }
        self.sync_persisted().await
    }

    /// Changes on every `store` and `remove`, but not on refresh.
    pub(crate) fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    pub(crate) fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock()
    }

    /// Bring durable storage in line with the in-memory slot.
    ///
    /// Writes are serialized and each one reads the snapshot after acquiring
    /// the gate, so the last write to finish always reflects the latest state.
    pub(crate) async fn sync_persisted(&self) -> Result<()> {
        let _gate = self.persist_gate.lock().await;
        let snapshot = self
            .slot
            .lock()
            .credential
            .as_ref()
            .map(|c| c.token_set.clone());
        let result = match snapshot {
            Some(token_set) => self.persistence.save(&token_set).await,
            None => self.persistence.delete().await,
        };
        result.map_err(Error::persistence)
    }
}
