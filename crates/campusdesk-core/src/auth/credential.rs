//! The credential pair and the identity service's token responses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::DEFAULT_TOKEN_TTL_SECS;

/// Upper bound on a server-provided TTL (one year).
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Access/refresh token pair plus its computed expiry.
///
/// `expires_at` is always `issued_at` plus the grant's TTL. Instances are
/// replaced whole, never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "CredentialRecord")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn from_grant(grant: TokenGrant, issued_at: DateTime<Utc>, default_ttl_secs: u64) -> Self {
        let ttl = grant.expires_in.unwrap_or(default_ttl_secs).min(MAX_TTL_SECS) as i64;
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            issued_at,
            expires_at: issued_at + Duration::seconds(ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }
}

/// Persisted form. Older entries may lack `issuedAt`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    access_token: String,
    refresh_token: String,
    issued_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        let issued_at = record.issued_at.unwrap_or_else(|| {
            record.expires_at - Duration::seconds(DEFAULT_TOKEN_TTL_SECS as i64)
        });
        Self {
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            issued_at,
            expires_at: record.expires_at,
        }
    }
}

/// A normalized token response: both tokens present, TTL optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<u64>,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in: None,
        }
    }

    pub fn expires_in(mut self, secs: u64) -> Self {
        self.expires_in = Some(secs);
        self
    }
}

/// A token response as the identity service sends it.
///
/// The service has been seen answering with camelCase fields
/// (`accessToken`, `refreshToken`, `expiresIn`) and with snake_case
/// transport fields (`access_token`, ...). Either is accepted; camelCase
/// wins when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCredential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

impl RawCredential {
    pub fn from_value(value: &Value) -> Self {
        Self {
            access_token: string_field(value, "accessToken", "access_token"),
            refresh_token: string_field(value, "refreshToken", "refresh_token"),
            expires_in: seconds_field(value, "expiresIn", "expires_in"),
        }
    }

    /// Normalize into a grant. `None` unless both tokens are present.
    pub fn into_grant(self) -> Option<TokenGrant> {
        Some(TokenGrant {
            access_token: self.access_token?,
            refresh_token: self.refresh_token?,
            expires_in: self.expires_in,
        })
    }

    /// Normalize a refresh response, keeping `current` when the service
    /// does not rotate the refresh token.
    pub fn into_grant_or_keep(self, current: &str) -> Option<TokenGrant> {
        Some(TokenGrant {
            access_token: self.access_token?,
            refresh_token: self.refresh_token.unwrap_or_else(|| current.to_string()),
            expires_in: self.expires_in,
        })
    }
}

impl<'de> Deserialize<'de> for RawCredential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

fn string_field(value: &Value, camel: &str, snake: &str) -> Option<String> {
    [camel, snake]
        .iter()
        .filter_map(|key| value.get(key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn seconds_field(value: &Value, camel: &str, snake: &str) -> Option<u64> {
    [camel, snake].iter().find_map(|key| match value.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_credential_camel_case() {
        let raw: RawCredential = serde_json::from_value(json!({
            "accessToken": "A1",
            "refreshToken": "R1",
            "expiresIn": 1800
        }))
        .expect("should parse");
        assert_eq!(
            raw.into_grant(),
            Some(TokenGrant::new("A1", "R1").expires_in(1800))
        );
    }

    #[test]
    fn test_raw_credential_snake_case() {
        let raw = RawCredential::from_value(&json!({
            "access_token": "A1",
            "refresh_token": "R1",
            "expires_in": "900"
        }));
        assert_eq!(raw.into_grant(), Some(TokenGrant::new("A1", "R1").expires_in(900)));
    }

    #[test]
    fn test_raw_credential_prefers_camel_case() {
        let raw = RawCredential::from_value(&json!({
            "accessToken": "camel",
            "access_token": "snake",
            "refresh_token": "R1"
        }));
        let grant = raw.into_grant().expect("pair present");
        assert_eq!(grant.access_token, "camel");
        assert_eq!(grant.refresh_token, "R1");
        assert_eq!(grant.expires_in, None);
    }

    #[test]
    fn test_raw_credential_without_pair() {
        let raw = RawCredential::from_value(&json!({ "success": true }));
        assert_eq!(raw.into_grant(), None);

        let raw = RawCredential::from_value(&json!({ "accessToken": "A1" }));
        assert_eq!(raw.clone().into_grant(), None);
        assert_eq!(
            raw.into_grant_or_keep("R0"),
            Some(TokenGrant::new("A1", "R0"))
        );
    }

    #[test]
    fn test_credential_expiry_uses_default_ttl() {
        let now = Utc::now();
        let credential = Credential::from_grant(TokenGrant::new("A", "R"), now, 1800);
        assert_eq!(credential.expires_at, now + Duration::seconds(1800));
        assert!(!credential.is_expired_at(now + Duration::seconds(1799)));
        assert!(credential.is_expired_at(now + Duration::seconds(1800)));
    }

    #[test]
    fn test_credential_record_without_issued_at() {
        let credential: Credential = serde_json::from_value(json!({
            "accessToken": "A",
            "refreshToken": "R",
            "expiresAt": "2030-01-01T00:30:00Z"
        }))
        .expect("should parse");
        assert_eq!(credential.issued_at.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_credential_serializes_camel_case() {
        let now = Utc::now();
        let credential = Credential::from_grant(TokenGrant::new("A", "R"), now, 60);
        let value = serde_json::to_value(&credential).expect("should serialize");
        assert_eq!(value["accessToken"], "A");
        assert_eq!(value["refreshToken"], "R");
        assert!(value.get("expiresAt").is_some());
        assert!(value.get("issuedAt").is_some());
    }
}
