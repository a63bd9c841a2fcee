//! Campusdesk core - session and credential lifecycle for the school-management console.
//!
//! The console's screens are thin collaborators. They ask this crate for a
//! bearer token, send their requests through [`api::ApiClient`], and listen
//! for the session ending. Everything that keeps tokens valid lives here:
//!
//! - [`auth::TokenStore`]: the current credential pair, persisted durably
//! - [`auth::RefreshCoordinator`]: single-flight access-token refresh
//! - [`auth::SessionController`]: login, logout, restore and invalidation
//! - [`auth::InactivityWatchdog`]: idle warning and forced logout
//! - [`api::ApiClient`]: attaches the bearer token and reacts to 401s

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod testutil;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::SessionError;
