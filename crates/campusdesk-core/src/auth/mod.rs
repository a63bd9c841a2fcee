//! Session and credential lifecycle.
//!
//! This module provides:
//! - `TokenStore`: the current credential pair, persisted through a
//!   `CredentialStorage` backend (file, OS keychain or memory)
//! - `RefreshCoordinator`: at most one refresh call in flight
//! - `SessionController`: login/logout/restore/invalidate plus the reactive
//!   `SessionState` mirror and `SessionEvent` notifications
//! - `InactivityWatchdog`: idle warning and forced logout
//!
//! Access tokens live 30 minutes unless the identity service says otherwise.

pub mod credential;
pub mod refresh;
pub mod session;
pub mod state;
pub mod storage;
pub mod token_store;
pub mod watchdog;

pub use credential::{Credential, RawCredential, TokenGrant};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use session::{SessionController, SessionSettings};
pub use state::{SessionEvent, SessionState, SignOutReason};
pub use storage::{CredentialStorage, FileStorage, KeyringStorage, MemoryStorage};
pub use token_store::{TokenLookup, TokenStore};
pub use watchdog::{ActivityKind, InactivityWatchdog, WatchdogHandle};
