//! Session controller: login, logout, restore and invalidation.
//!
//! The controller is the integration point between the identity service and
//! local state. It writes the token store and publishes the reactive mirror
//! right after, in the same call, so the UI never lags the store.
//!
//! ```text
//! Anonymous --login ok--> Authenticated --token expired--> Refreshing
//!     ^                        |                              |
//!     |   logout / idle / 401  |            refresh ok -------+--> Authenticated
//!     +------------------------+            refresh failed ---+--> Anonymous
//! ```

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::refresh::{RefreshCoordinator, RefreshListener, RefreshOutcome};
use super::state::{SessionEvent, SessionMirror, SessionState, SignOutReason};
use super::token_store::{TokenLookup, TokenStore};
use crate::api::IdentityApi;
use crate::config::Config;
use crate::error::SessionError;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound on the best-effort remote logout.
    pub logout_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            logout_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            logout_timeout: config.logout_timeout(),
        }
    }
}

pub struct SessionController {
    identity: Arc<dyn IdentityApi>,
    store: Arc<TokenStore>,
    refresh: RefreshCoordinator,
    mirror: SessionMirror,
    username: Mutex<Option<String>>,
    settings: SessionSettings,
}

impl SessionController {
    pub fn new(
        identity: Arc<dyn IdentityApi>,
        store: Arc<TokenStore>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<SessionController>| {
            let listener: Weak<dyn RefreshListener> = weak.clone();
            Self {
                refresh: RefreshCoordinator::new(identity.clone(), store.clone(), listener),
                identity,
                store,
                mirror: SessionMirror::new(),
                username: Mutex::new(None),
                settings,
            }
        })
    }

    // =========================================================================
    // Remote operations
    // =========================================================================

    /// Sign in. On rejection the message is kept as `last_error` and the
    /// session stays as it was.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        match self.identity.login(username, password).await {
            Ok(grant) => {
                self.store.set_credential(grant);
                *self.username.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(username.to_string());
                self.sync(None);
                self.mirror.emit(SessionEvent::SignedIn {
                    username: username.to_string(),
                });
                info!(username = %username, "Login successful");
                Ok(())
            }
            Err(e) => {
                error!(username = %username, kind = e.kind(), error = %e, "Login failed");
                self.sync(Some(e.clone()));
                Err(e)
            }
        }
    }

    /// End the session. The remote call is best effort; local state is
    /// cleared whatever it returns.
    pub async fn logout(&self) {
        self.logout_for(SignOutReason::Logout).await;
    }

    pub async fn logout_for(&self, reason: SignOutReason) {
        // Let a running refresh settle so the newest refresh token is the one
        // revoked. Anything it lands after the clear below is discarded.
        if let Some(refresh) = self.refresh.in_flight() {
            if tokio::time::timeout(self.settings.logout_timeout, refresh).await.is_err() {
                warn!("Refresh still running at logout, its result will be discarded");
            }
        }

        if let Some(refresh_token) = self.store.refresh_token() {
            match tokio::time::timeout(
                self.settings.logout_timeout,
                self.identity.logout(&refresh_token),
            )
            .await
            {
                Ok(Ok(())) => debug!("Remote logout acknowledged"),
                Ok(Err(e)) => warn!(error = %e, "Remote logout failed, clearing local session anyway"),
                Err(_) => warn!(
                    timeout_secs = self.settings.logout_timeout.as_secs(),
                    "Remote logout timed out, clearing local session anyway"
                ),
            }
        }

        let was_authenticated = self.mirror.snapshot().is_authenticated;
        self.store.clear();
        self.sync(None);
        if was_authenticated {
            self.mirror.emit(SessionEvent::SignedOut {
                reason,
                redirect: false,
            });
        }
        info!(reason = ?reason, "Logged out");
    }

    // =========================================================================
    // Local operations
    // =========================================================================

    /// Adopt a stored, unexpired credential without a network round-trip.
    /// An expired one is discarded and the session stays anonymous.
    pub fn restore_from_storage(&self) -> bool {
        match self.store.lookup() {
            TokenLookup::Fresh(_) => {
                self.sync(None);
                info!("Session restored from storage");
                true
            }
            TokenLookup::Expired { .. } => {
                debug!("Stored session has expired");
                self.store.clear();
                self.sync(None);
                false
            }
            TokenLookup::Missing => {
                self.sync(None);
                false
            }
        }
    }

    /// Drop the session after an unrecoverable 401 or a failed refresh. A
    /// refresh still in flight cannot bring the session back.
    pub fn invalidate(&self, reason: SessionError) {
        let was_authenticated = self.mirror.snapshot().is_authenticated;
        self.store.clear();
        self.mirror.publish(SessionState::anonymous(Some(reason.clone())));

        if was_authenticated {
            let reason = match reason {
                SessionError::RefreshFailure(_) => SignOutReason::RefreshFailed,
                _ => SignOutReason::Unauthorized,
            };
            warn!(reason = ?reason, "Session invalidated");
            self.mirror.emit(SessionEvent::SignedOut {
                reason,
                redirect: true,
            });
        }
    }

    /// The access token if it is fresh.
    ///
    /// An expired token is never returned: this starts (or joins) a refresh
    /// in the background and returns `None`. Ask again once it settles, or
    /// use [`valid_access_token`](Self::valid_access_token).
    pub fn access_token(&self) -> Option<String> {
        match self.store.lookup() {
            TokenLookup::Fresh(token) => Some(token),
            TokenLookup::Expired { refresh_token } => {
                debug!("Access token expired, refreshing in the background");
                drop(self.refresh.handle(refresh_token));
                None
            }
            TokenLookup::Missing => None,
        }
    }

    /// The access token, waiting for a refresh if the current one expired.
    pub async fn valid_access_token(&self) -> Option<String> {
        match self.store.lookup() {
            TokenLookup::Fresh(token) => Some(token),
            TokenLookup::Expired { refresh_token } => {
                match self.refresh.request_refresh(refresh_token).await {
                    RefreshOutcome::Refreshed => self.store.access_token(),
                    RefreshOutcome::Failed(_) => None,
                }
            }
            TokenLookup::Missing => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Username of the last login, for display only.
    pub fn username(&self) -> Option<String> {
        self.username.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Set the display username, e.g. from saved config on restore.
    pub fn set_username(&self, username: Option<String>) {
        *self.username.lock().unwrap_or_else(|e| e.into_inner()) = username;
    }

    // =========================================================================
    // Mirror
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.mirror.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.mirror.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.mirror.events()
    }

    pub(crate) fn notify(&self, event: SessionEvent) {
        self.mirror.emit(event);
    }

    /// Publish the store's current pair.
    fn sync(&self, last_error: Option<SessionError>) {
        let state = match self.store.credential() {
            Some(credential) => SessionState {
                is_authenticated: true,
                access_token: Some(credential.access_token),
                refresh_token: Some(credential.refresh_token),
                last_error,
            },
            None => SessionState::anonymous(last_error),
        };
        self.mirror.publish(state);
    }
}

impl RefreshListener for SessionController {
    fn refreshed(&self) {
        self.sync(None);
    }

    fn refresh_failed(&self, error: SessionError) {
        self.invalidate(error);
    }
}
