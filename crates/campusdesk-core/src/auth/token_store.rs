//! Process-wide cache of the current credential pair.
//!
//! The store is the single source of truth for "am I authenticated". It never
//! hands out an access token it knows to be expired. All mutation replaces the
//! credential whole (`set_credential` / `clear`), so readers never see a
//! half-written pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use tracing::{debug, warn};

use super::credential::{Credential, TokenGrant};
use super::storage::CredentialStorage;
use crate::clock::Clock;
use crate::config::DEFAULT_TOKEN_TTL_SECS;

/// Result of looking up the access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Fresh(String),
    /// An access token exists but has expired; the refresh token is still
    /// usable as far as this side knows.
    Expired { refresh_token: String },
    Missing,
}

pub struct TokenStore {
    storage: Box<dyn CredentialStorage>,
    clock: Arc<dyn Clock>,
    default_ttl_secs: u64,
    current: Mutex<Option<Credential>>,
    /// Bumped whenever the credential is replaced or cleared.
    generation: AtomicU64,
}

impl TokenStore {
    pub fn new(storage: Box<dyn CredentialStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            default_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// TTL assumed when a grant carries no `expires_in`.
    pub fn with_default_ttl(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Replace the current credential and write it through to storage.
    pub fn set_credential(&self, grant: TokenGrant) -> Credential {
        let mut current = self.lock();
        self.replace(&mut current, grant)
    }

    /// Like [`set_credential`](Self::set_credential), but only if nothing has
    /// replaced or cleared the credential since `generation` was read.
    pub fn set_credential_if_current(&self, generation: u64, grant: TokenGrant) -> Option<Credential> {
        let mut current = self.lock();
        if self.generation() != generation {
            return None;
        }
        Some(self.replace(&mut current, grant))
    }

    /// Changes on every `set_credential` and `clear`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn replace(&self, current: &mut Option<Credential>, grant: TokenGrant) -> Credential {
        let credential = Credential::from_grant(grant, self.clock.now(), self.default_ttl_secs);

        if let Err(e) = self.storage.save(&credential) {
            warn!(error = %e, "Failed to persist credential, keeping it in memory only");
        }
        *current = Some(credential.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);

        debug!(expires_at = %credential.expires_at, "Credential stored");
        credential
    }

    /// Look up the access token, hydrating from storage on a miss.
    pub fn lookup(&self) -> TokenLookup {
        let mut current = self.lock();
        self.hydrate(&mut current);

        match current.as_ref() {
            Some(c) if !c.is_expired_at(self.clock.now()) => TokenLookup::Fresh(c.access_token.clone()),
            Some(c) => TokenLookup::Expired {
                refresh_token: c.refresh_token.clone(),
            },
            None => TokenLookup::Missing,
        }
    }

    /// The access token, only while it is unexpired.
    ///
    /// This never triggers a refresh; the session layer does that when it
    /// sees [`TokenLookup::Expired`].
    pub fn access_token(&self) -> Option<String> {
        match self.lookup() {
            TokenLookup::Fresh(token) => Some(token),
            _ => None,
        }
    }

    /// The refresh token regardless of access-token expiry. Its own expiry is
    /// tracked by the identity service, not here.
    pub fn refresh_token(&self) -> Option<String> {
        let mut current = self.lock();
        self.hydrate(&mut current);
        current.as_ref().map(|c| c.refresh_token.clone())
    }

    /// Snapshot of the current credential, hydrating from storage on a miss.
    pub fn credential(&self) -> Option<Credential> {
        let mut current = self.lock();
        self.hydrate(&mut current);
        current.clone()
    }

    /// Time left on the access token, if any credential is held.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.credential()
            .map(|c| c.time_until_expiry(self.clock.now()))
    }

    /// Drop the credential from memory and storage. Idempotent.
    pub fn clear(&self) {
        let mut current = self.lock();
        self.wipe(&mut current);
    }

    /// Clear only if nothing has replaced or cleared the credential since
    /// `generation` was read. Returns whether it cleared.
    pub fn clear_if_current(&self, generation: u64) -> bool {
        let mut current = self.lock();
        if self.generation() != generation {
            return false;
        }
        self.wipe(&mut current);
        true
    }

    fn wipe(&self, current: &mut Option<Credential>) {
        *current = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.storage.remove() {
            warn!(error = %e, "Failed to remove stored credential");
        }
    }

    /// True iff a fresh access token is available without a refresh.
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    fn hydrate(&self, current: &mut Option<Credential>) {
        if current.is_some() {
            return;
        }
        match self.storage.load() {
            Ok(stored) => {
                if stored.is_some() {
                    debug!("Credential hydrated from storage");
                }
                *current = stored;
            }
            Err(e) => {
                warn!(error = %e, "Stored credential is unreadable, discarding it");
                if let Err(e) = self.storage.remove() {
                    warn!(error = %e, "Failed to remove unreadable credential");
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Credential>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStorage;
    use crate::clock::ManualClock;

    fn store_with(storage: MemoryStorage) -> (TokenStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (TokenStore::new(Box::new(storage), clock.clone()), clock)
    }

    #[test]
    fn test_set_then_get_returns_token() {
        let (store, _clock) = store_with(MemoryStorage::new());
        store.set_credential(TokenGrant::new("A1", "R1").expires_in(1800));

        assert_eq!(store.access_token().as_deref(), Some("A1"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_expired_token_is_never_returned() {
        let (store, clock) = store_with(MemoryStorage::new());
        store.set_credential(TokenGrant::new("A1", "R1").expires_in(60));

        clock.advance(Duration::seconds(59));
        assert_eq!(store.access_token().as_deref(), Some("A1"));

        clock.advance(Duration::seconds(1));
        assert_eq!(store.access_token(), None);
        assert_eq!(
            store.lookup(),
            TokenLookup::Expired {
                refresh_token: "R1".to_string()
            }
        );
        // Refresh token survives access-token expiry.
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_default_ttl_applies_when_missing() {
        let (store, clock) = store_with(MemoryStorage::new());
        let credential = store.set_credential(TokenGrant::new("A1", "R1"));
        assert_eq!(credential.expires_at - credential.issued_at, Duration::seconds(1800));

        clock.advance(Duration::seconds(1799));
        assert!(store.is_authenticated());
        clock.advance(Duration::seconds(1));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (store, _clock) = store_with(MemoryStorage::new());
        store.set_credential(TokenGrant::new("A1", "R1"));

        store.clear();
        assert!(!store.is_authenticated());
        assert_eq!(store.lookup(), TokenLookup::Missing);

        store.clear();
        assert!(!store.is_authenticated());
        assert_eq!(store.lookup(), TokenLookup::Missing);
    }

    #[test]
    fn test_hydrates_from_storage() {
        let storage = MemoryStorage::new();
        let credential = Credential::from_grant(TokenGrant::new("A9", "R9"), chrono::Utc::now(), 1800);
        storage.save(&credential).expect("save");

        let clock = Arc::new(ManualClock::new(credential.issued_at));
        let store = TokenStore::new(Box::new(storage), clock);
        assert_eq!(store.access_token().as_deref(), Some("A9"));
    }

    #[test]
    fn test_malformed_storage_is_treated_as_empty_and_cleared() {
        let storage = Arc::new(MemoryStorage::with_raw("{\"accessToken\": 42"));
        let clock = Arc::new(ManualClock::default());
        let store = TokenStore::new(Box::new(storage.clone()), clock);

        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);
        assert!(storage.raw().is_none());
    }

    #[test]
    fn test_set_credential_writes_through() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::default());
        let store = TokenStore::new(Box::new(storage.clone()), clock);

        store.set_credential(TokenGrant::new("A1", "R1"));
        assert!(storage.raw().expect("written").contains("A1"));

        store.clear();
        assert!(storage.raw().is_none());
    }

    #[test]
    fn test_conditional_writes_lose_to_a_clear() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::default());
        let store = TokenStore::new(Box::new(storage.clone()), clock);
        store.set_credential(TokenGrant::new("A1", "R1"));

        let generation = store.generation();
        store.clear();

        assert!(store.set_credential_if_current(generation, TokenGrant::new("A2", "R2")).is_none());
        assert!(!store.clear_if_current(generation));
        assert_eq!(store.lookup(), TokenLookup::Missing);
        assert!(storage.raw().is_none());

        let generation = store.generation();
        let credential = store
            .set_credential_if_current(generation, TokenGrant::new("A3", "R3"))
            .expect("unchanged since read");
        assert_eq!(credential.access_token, "A3");
        assert!(store.clear_if_current(store.generation()));
        assert!(store.credential().is_none());
    }
}
