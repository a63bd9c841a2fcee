//! HTTP side of the console.
//!
//! - `identity`: the remote identity service (login, refresh, logout)
//! - `client`: the authenticated client every domain screen sends its
//!   requests through. It attaches the bearer token and turns a 401 into a
//!   session invalidation.

pub mod client;
pub mod error;
pub mod identity;

pub use client::ApiClient;
pub use error::ApiError;
pub use identity::{HttpIdentityClient, IdentityApi};
