use thiserror::Error;

/// Failures of the session lifecycle, as shown to the UI.
///
/// Values of this type are stored on the reactive mirror as `last_error`,
/// so they are cheap to clone and compare.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Login rejected by the identity service. The user can retry.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Refresh token rejected or expired. Forces a full logout.
    #[error("Session expired: {0}")]
    RefreshFailure(String),

    /// The identity service could not be reached.
    #[error("Unable to reach the server: {0}")]
    NetworkFailure(String),

    /// A domain request came back 401.
    #[error("Unauthorized - session is no longer valid")]
    Unauthorized,
}

impl SessionError {
    /// Short machine-readable kind, for logging and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::InvalidCredentials(_) => "invalid_credentials",
            SessionError::RefreshFailure(_) => "refresh_failure",
            SessionError::NetworkFailure(_) => "network_failure",
            SessionError::Unauthorized => "unauthorized",
        }
    }
}
