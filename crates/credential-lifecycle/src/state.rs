//! Credential state machine
//!
//! Pure state machine: receives events, returns the new state.
//! The store and coordinator apply the result to the credential slot.

use std::fmt;

/// Lifecycle state of the process-wide credential.
///
/// Transitions:
/// - Absent → Active (sign-in)
/// - Active → Refreshing (refresh started)
/// - Refreshing → Active (refresh succeeded, failed transiently, or was cancelled)
/// - Refreshing → Expired (provider rejected the refresh token)
/// - Expired → Active (sign-in)
/// - any → Absent (sign-out)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialState {
    Absent,
    Active,
    Refreshing,
    Expired,
}

impl CredentialState {
    /// Status label for logging and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            CredentialState::Absent => "absent",
            CredentialState::Active => "active",
            CredentialState::Refreshing => "refreshing",
            CredentialState::Expired => "expired",
        }
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Events that drive credential state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialEvent {
    /// A token set was stored (sign-in or explicit store)
    SignedIn,
    /// A refresh ticket was created
    RefreshStarted,
    /// The refresh produced a new token set
    Refreshed,
    /// The refresh failed with a retryable error
    RefreshFailed,
    /// The provider rejected the refresh token
    RefreshInvalidated,
    /// The ticket holder went away before the refresh finished
    RefreshCancelled,
    /// The credential was removed
    SignedOut,
}

/// Handle a state transition. Pure function: no I/O.
pub fn transition(state: CredentialState, event: CredentialEvent) -> CredentialState {
    use CredentialEvent as E;
    use CredentialState as S;

    match (state, event) {
        (_, E::SignedIn) => S::Active,
        (_, E::SignedOut) => S::Absent,

        (S::Active, E::RefreshStarted) => S::Refreshing,

        (S::Refreshing, E::Refreshed | E::RefreshFailed | E::RefreshCancelled) => S::Active,
        (S::Refreshing, E::RefreshInvalidated) => S::Expired,

        // Invalid/unhandled transition: stay in current state
        (state, _) => state,
    }
}
