//! Client for the remote identity service.
//!
//! Only the three calls the session lifecycle depends on are modelled:
//!
//! - `POST /auth/login {username, password}`
//! - `POST /auth/refresh {refreshToken}`
//! - `POST /auth/logout {refreshToken}`
//!
//! Token responses are normalized here, so the rest of the crate only ever
//! sees a [`TokenGrant`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::credential::{RawCredential, TokenGrant};
use crate::error::SessionError;

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<TokenGrant, SessionError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SessionError>;

    async fn logout(&self, refresh_token: &str) -> Result<(), SessionError>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

/// Identity client over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpIdentityClient {
    client: Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(StatusCode, String), SessionError> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Identity request failed");
                SessionError::NetworkFailure(e.to_string())
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SessionError::NetworkFailure(e.to_string()))?;
        debug!(url = %url, status = %status, "Identity response");
        Ok((status, text))
    }
}

/// The message the server put in an error body, or the body itself.
fn server_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["message", "error_description", "error"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_string))
    });
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => format!("Status {}", status),
        None => ApiError::truncate_body(body.trim()),
    }
}

fn parse_raw(body: &str) -> Result<RawCredential, SessionError> {
    serde_json::from_str(body).map_err(|e| {
        SessionError::NetworkFailure(format!("Invalid response from identity service: {}", e))
    })
}

#[async_trait]
impl IdentityApi for HttpIdentityClient {
    async fn login(&self, username: &str, password: &str) -> Result<TokenGrant, SessionError> {
        let (status, body) = self
            .post("auth/login", &LoginRequest { username, password })
            .await?;

        if status.is_success() {
            return parse_raw(&body)?.into_grant().ok_or_else(|| {
                SessionError::NetworkFailure("Login response carried no token pair".to_string())
            });
        }

        let message = server_message(status, &body);
        if status.is_server_error() {
            Err(SessionError::NetworkFailure(message))
        } else {
            Err(SessionError::InvalidCredentials(message))
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SessionError> {
        let (status, body) = self
            .post("auth/refresh", &RefreshTokenRequest { refresh_token })
            .await?;

        if !status.is_success() {
            return Err(SessionError::RefreshFailure(server_message(status, &body)));
        }
        parse_raw(&body)?
            .into_grant_or_keep(refresh_token)
            .ok_or_else(|| {
                SessionError::RefreshFailure("Refresh response carried no access token".to_string())
            })
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), SessionError> {
        let (status, body) = self
            .post("auth/logout", &RefreshTokenRequest { refresh_token })
            .await?;

        if !status.is_success() {
            return Err(SessionError::NetworkFailure(server_message(status, &body)));
        }
        let acknowledged = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("success").and_then(Value::as_bool))
            .unwrap_or(true);
        if !acknowledged {
            debug!("Identity service did not acknowledge logout");
        }
        Ok(())
    }
}
