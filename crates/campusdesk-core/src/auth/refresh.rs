//! Single-flight refresh of the access token.
//!
//! At most one refresh call is outstanding at any time. Callers that ask for
//! a refresh while one is in flight get a clone of the same handle and observe
//! the same outcome. The handle is cleared only after the outcome has been
//! applied to the token store, so the next expiry starts a fresh cycle.
//!
//! A refresh that settles after the session was cleared or replaced (logout,
//! invalidation, a new login) leaves the store alone.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::token_store::{TokenLookup, TokenStore};
use crate::api::IdentityApi;
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Failed(SessionError),
}

/// The in-flight refresh. Awaiting it yields the shared outcome.
pub type RefreshHandle = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Told about refresh results after the token store has been updated.
pub trait RefreshListener: Send + Sync {
    fn refreshed(&self);

    /// The store has already been cleared; the listener ends the session.
    fn refresh_failed(&self, error: SessionError);
}

pub struct RefreshCoordinator {
    identity: Arc<dyn IdentityApi>,
    store: Arc<TokenStore>,
    listener: Weak<dyn RefreshListener>,
    in_flight: Arc<Mutex<Option<RefreshHandle>>>,
}

impl RefreshCoordinator {
    pub fn new(
        identity: Arc<dyn IdentityApi>,
        store: Arc<TokenStore>,
        listener: Weak<dyn RefreshListener>,
    ) -> Self {
        Self {
            identity,
            store,
            listener,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Refresh with `refresh_token`, or join the refresh already running.
    pub async fn request_refresh(&self, refresh_token: String) -> RefreshOutcome {
        self.handle(refresh_token).await
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// The refresh currently running, if any.
    pub fn in_flight(&self) -> Option<RefreshHandle> {
        lock(&self.in_flight).clone()
    }

    /// Get the in-flight handle, starting a refresh if none exists.
    ///
    /// The remote call runs on its own task, so it completes and is applied
    /// even if every caller stops waiting.
    pub fn handle(&self, refresh_token: String) -> RefreshHandle {
        let mut slot = lock(&self.in_flight);
        if let Some(handle) = slot.as_ref() {
            debug!("Joining in-flight refresh");
            return handle.clone();
        }

        // The store may have moved on since the caller saw `refresh_token`:
        // a refresh settled, or the session ended.
        let generation = self.store.generation();
        let refresh_token = match self.store.lookup() {
            TokenLookup::Fresh(_) => return settled(RefreshOutcome::Refreshed),
            TokenLookup::Expired { refresh_token: current } => {
                if current != refresh_token {
                    debug!("Refresh token replaced since lookup, using the current one");
                }
                current
            }
            TokenLookup::Missing => {
                debug!("Session ended before the refresh started");
                return settled(RefreshOutcome::Failed(SessionError::RefreshFailure(
                    "session ended".to_string(),
                )));
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("Refresh requested outside of a runtime");
                let error = SessionError::RefreshFailure("no async runtime".to_string());
                return settled(RefreshOutcome::Failed(error));
            }
        };

        debug!("Starting token refresh");
        let task = runtime.spawn(run_refresh(
            self.identity.clone(),
            self.store.clone(),
            self.listener.clone(),
            self.in_flight.clone(),
            refresh_token,
            generation,
        ));

        let handle = async move {
            task.await.unwrap_or_else(|e| {
                RefreshOutcome::Failed(SessionError::RefreshFailure(format!(
                    "refresh task failed: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared();

        *slot = Some(handle.clone());
        handle
    }
}

async fn run_refresh(
    identity: Arc<dyn IdentityApi>,
    store: Arc<TokenStore>,
    listener: Weak<dyn RefreshListener>,
    in_flight: Arc<Mutex<Option<RefreshHandle>>>,
    refresh_token: String,
    generation: u64,
) -> RefreshOutcome {
    let outcome = match identity.refresh(&refresh_token).await {
        Ok(grant) => match store.set_credential_if_current(generation, grant) {
            Some(credential) => {
                info!(expires_at = %credential.expires_at, "Access token refreshed");
                if let Some(listener) = listener.upgrade() {
                    listener.refreshed();
                }
                RefreshOutcome::Refreshed
            }
            None => {
                info!("Session changed during refresh, discarding the new tokens");
                RefreshOutcome::Failed(SessionError::RefreshFailure(
                    "session ended during refresh".to_string(),
                ))
            }
        },
        Err(e) => {
            let error = match e {
                SessionError::RefreshFailure(message) => SessionError::RefreshFailure(message),
                other => SessionError::RefreshFailure(other.to_string()),
            };
            if store.clear_if_current(generation) {
                warn!(error = %error, "Token refresh failed, ending session");
                if let Some(listener) = listener.upgrade() {
                    listener.refresh_failed(error.clone());
                }
            } else {
                debug!(error = %error, "Token refresh failed after the session changed");
            }
            RefreshOutcome::Failed(error)
        }
    };

    *lock(&in_flight) = None;
    outcome
}

fn settled(outcome: RefreshOutcome) -> RefreshHandle {
    future::ready(outcome).boxed().shared()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
