//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::IdentityApi;
use crate::auth::credential::TokenGrant;
use crate::auth::session::{SessionController, SessionSettings};
use crate::auth::storage::MemoryStorage;
use crate::auth::token_store::TokenStore;
use crate::clock::ManualClock;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy)]
pub enum LogoutBehavior {
    Succeed,
    Fail,
    Hang,
}

/// Identity service that answers from a script and counts calls.
pub struct ScriptedIdentity {
    logins: Mutex<VecDeque<Result<TokenGrant, SessionError>>>,
    refreshes: Mutex<VecDeque<Result<TokenGrant, SessionError>>>,
    refresh_delay: Duration,
    logout: LogoutBehavior,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
}

impl ScriptedIdentity {
    pub fn new() -> Self {
        Self {
            logins: Mutex::new(VecDeque::new()),
            refreshes: Mutex::new(VecDeque::new()),
            refresh_delay: Duration::ZERO,
            logout: LogoutBehavior::Succeed,
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn login_ok(self, grant: TokenGrant) -> Self {
        self.logins.lock().unwrap().push_back(Ok(grant));
        self
    }

    pub fn login_err(self, error: SessionError) -> Self {
        self.logins.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn refresh_ok(self, grant: TokenGrant) -> Self {
        self.refreshes.lock().unwrap().push_back(Ok(grant));
        self
    }

    pub fn refresh_err(self, error: SessionError) -> Self {
        self.refreshes.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn logout_behavior(mut self, behavior: LogoutBehavior) -> Self {
        self.logout = behavior;
        self
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityApi for ScriptedIdentity {
    async fn login(&self, _username: &str, _password: &str) -> Result<TokenGrant, SessionError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.logins.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(SessionError::InvalidCredentials("no scripted response".into()))
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SessionError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        self.refreshes.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(SessionError::RefreshFailure("no scripted response".into()))
        })
    }

    async fn logout(&self, _refresh_token: &str) -> Result<(), SessionError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        match self.logout {
            LogoutBehavior::Succeed => Ok(()),
            LogoutBehavior::Fail => Err(SessionError::NetworkFailure("connection refused".into())),
            LogoutBehavior::Hang => futures::future::pending().await,
        }
    }
}

/// A session over `identity`, in-memory storage and a manual clock.
pub fn session_with(
    identity: Arc<ScriptedIdentity>,
) -> (Arc<SessionController>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(TokenStore::new(Box::new(MemoryStorage::new()), clock.clone()));
    let session = SessionController::new(identity, store, SessionSettings::default());
    (session, clock)
}
