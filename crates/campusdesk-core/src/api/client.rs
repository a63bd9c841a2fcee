//! Authenticated client for the console's domain API.
//!
//! Every outbound domain request goes through [`ApiClient`]. Before sending
//! it attaches `Authorization: Bearer <token>` when a fresh access token is
//! available. A request issued while the token is expired goes out without
//! the header instead of waiting for the refresh. A 401 response invalidates
//! the session; the request is not retried.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::SessionController;
use crate::error::SessionError;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionController>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, session: Arc<SessionController>) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, session))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, base_url: &str, session: Arc<SessionController>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = self.session.access_token() {
            match header::HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => warn!("Access token is not a valid header value, sending without it"),
            }
        }
        headers
    }

    /// Start a request to `path` under the API base URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Authenticate and send a request, then check its status.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.headers(self.auth_headers()).send().await?;
        self.check_response(response).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        Ok(response.json().await?)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    /// Pass successes through. A 401 ends the session before the error is
    /// handed back to the caller like any other failure.
    async fn check_response(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        let error = ApiError::from_status(status, &body);
        if error.is_unauthorized() {
            warn!(url = %url, "Request unauthorized, invalidating session");
            self.session.invalidate(SessionError::Unauthorized);
        } else {
            debug!(url = %url, status = %status, "Request failed");
        }
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SessionEvent, SignOutReason, TokenGrant};
    use crate::testutil::{session_with, ScriptedIdentity};
    use chrono::Duration as ChronoDuration;
    use mockito::Matcher;
    use serde_json::{json, Value};

    async fn signed_in() -> (Arc<SessionController>, Arc<crate::clock::ManualClock>) {
        let identity = Arc::new(
            ScriptedIdentity::new()
                .login_ok(TokenGrant::new("A1", "R1").expires_in(1800))
                .refresh_delay(Duration::from_millis(10))
                .refresh_ok(TokenGrant::new("A2", "R2").expires_in(1800)),
        );
        let (session, clock) = session_with(identity);
        session.login("admin", "secret").await.expect("login");
        (session, clock)
    }

    fn client(server: &mockito::ServerGuard, session: Arc<SessionController>) -> ApiClient {
        ApiClient::new(&server.url(), Duration::from_secs(5), session).expect("client")
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/classes")
            .match_header("authorization", "Bearer A1")
            .with_status(200)
            .with_body(r#"[{"id": 1, "name": "Grade 5"}]"#)
            .create_async()
            .await;

        let (session, _clock) = signed_in().await;
        let classes: Vec<Value> = client(&server, session).get("/classes").await.expect("get");

        assert_eq!(classes.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_anonymous_request_has_no_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/public/terms")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let (session, _clock) = session_with(Arc::new(ScriptedIdentity::new()));
        let _: Value = client(&server, session).get("public/terms").await.expect("get");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_token_sends_without_header_and_refreshes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fees")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(json!({"amount": 120})))
            .with_status(201)
            .with_body(r#"{"id": 7}"#)
            .create_async()
            .await;

        let (session, clock) = signed_in().await;
        clock.advance(ChronoDuration::seconds(1801));

        let created: Value = client(&server, session.clone())
            .post("fees", &json!({"amount": 120}))
            .await
            .expect("post");
        assert_eq!(created["id"], 7);
        mock.assert_async().await;

        assert_eq!(session.valid_access_token().await.as_deref(), Some("A2"));
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/students/42")
            .with_status(401)
            .with_body("token revoked")
            .expect(1)
            .create_async()
            .await;

        let (session, _clock) = signed_in().await;
        let mut events = session.events();

        let err = client(&server, session.clone())
            .delete("students/42")
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert!(!session.is_authenticated());
        assert_eq!(session.state().last_error, Some(SessionError::Unauthorized));
        assert_eq!(
            events.try_recv().ok(),
            Some(SessionEvent::SignedOut {
                reason: SignOutReason::Unauthorized,
                redirect: true
            })
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_other_failures_keep_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/reports")
            .with_status(403)
            .with_body("admins only")
            .create_async()
            .await;

        let (session, _clock) = signed_in().await;
        let err = client(&server, session.clone())
            .get::<Value>("reports")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::AccessDenied(_)));
        assert!(session.is_authenticated());
    }
}
