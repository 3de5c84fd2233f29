//! Scripted authenticator shared by the unit tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use oidc_auth::{AuthFuture, Authenticator, PresentationContext, TokenSet};
use parking_lot::Mutex;

/// How the next `refresh` call should end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshScript {
    /// New access token, no refresh-token rotation
    Succeed,
    /// Provider rejects the refresh token
    Invalidate,
    /// Transport failure
    Fail,
}

pub(crate) struct ScriptedAuthenticator {
    pub(crate) refresh_calls: AtomicUsize,
    pub(crate) sign_out_calls: AtomicUsize,
    pub(crate) user_info_calls: AtomicUsize,
    pub(crate) last_refresh_token: Mutex<Option<String>>,
    script: Mutex<RefreshScript>,
    delay: Mutex<Duration>,
    sign_in_token: Mutex<Option<TokenSet>>,
    user_info: Mutex<Option<BTreeMap<String, String>>>,
    sign_out_fails: AtomicBool,
    sign_in_blocked: AtomicBool,
}

impl ScriptedAuthenticator {
    pub(crate) fn new(script: RefreshScript) -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            user_info_calls: AtomicUsize::new(0),
            last_refresh_token: Mutex::new(None),
            script: Mutex::new(script),
            delay: Mutex::new(Duration::ZERO),
            sign_in_token: Mutex::new(None),
            user_info: Mutex::new(None),
            sign_out_fails: AtomicBool::new(false),
            sign_in_blocked: AtomicBool::new(false),
        })
    }

    pub(crate) fn set_script(&self, script: RefreshScript) {
        *self.script.lock() = script;
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub(crate) fn set_sign_in_token(&self, token_set: TokenSet) {
        *self.sign_in_token.lock() = Some(token_set);
    }

    pub(crate) fn set_user_info(&self, info: BTreeMap<String, String>) {
        *self.user_info.lock() = Some(info);
    }

    /// Make `sign_in` hang until its future is dropped.
    pub(crate) fn block_sign_in(&self) {
        self.sign_in_blocked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_sign_out(&self) {
        self.sign_out_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

impl Authenticator for ScriptedAuthenticator {
    fn id(&self) -> &str {
        "scripted"
    }

    fn sign_in<'a>(&'a self, _context: &'a PresentationContext) -> AuthFuture<'a, TokenSet> {
        let token = self.sign_in_token.lock().clone();
        let blocked = self.sign_in_blocked.load(Ordering::SeqCst);
        Box::pin(async move {
            if blocked {
                std::future::pending::<()>().await;
            }
            token.ok_or_else(|| oidc_auth::Error::Unsupported("user cancelled sign-in".into()))
        })
    }

    fn sign_out<'a>(
        &'a self,
        _context: &'a PresentationContext,
        _token_set: &'a TokenSet,
    ) -> AuthFuture<'a, ()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let fails = self.sign_out_fails.load(Ordering::SeqCst);
        Box::pin(async move {
            if fails {
                Err(oidc_auth::Error::Http("revocation endpoint unreachable".into()))
            } else {
                Ok(())
            }
        })
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> AuthFuture<'a, TokenSet> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_refresh_token.lock() = Some(refresh_token.to_string());
        let script = *self.script.lock();
        let delay = *self.delay.lock();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match script {
                RefreshScript::Succeed => {
                    let now = Utc::now();
                    Ok(TokenSet::new(
                        format!("at_refreshed_{call}"),
                        now,
                        now + TimeDelta::hours(1),
                    )?)
                }
                RefreshScript::Invalidate => Err(oidc_auth::Error::InvalidCredentials(
                    "invalid_grant: The refresh token is invalid or expired.".into(),
                )),
                RefreshScript::Fail => Err(oidc_auth::Error::Http("connection reset".into())),
            }
        })
    }

    fn fetch_user_info<'a>(
        &'a self,
        _token_set: &'a TokenSet,
    ) -> AuthFuture<'a, BTreeMap<String, String>> {
        self.user_info_calls.fetch_add(1, Ordering::SeqCst);
        let info = self.user_info.lock().clone();
        Box::pin(async move {
            info.ok_or_else(|| oidc_auth::Error::Http("user info endpoint returned 500".into()))
        })
    }
}
