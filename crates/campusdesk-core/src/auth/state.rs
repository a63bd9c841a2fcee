//! Reactive mirror of the session, consumed by the UI layer.
//!
//! The mirror is a read-only projection of the token store. The session
//! controller publishes a new [`SessionState`] after every store mutation, in
//! the same task that performed it. One-shot notifications (signed out, idle
//! warning) travel separately as [`SessionEvent`]s.

use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::error::SessionError;

/// Capacity of the event channel. Slow receivers lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub is_authenticated: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub last_error: Option<SessionError>,
}

impl SessionState {
    pub fn anonymous(last_error: Option<SessionError>) -> Self {
        Self {
            last_error,
            ..Self::default()
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    Logout,
    Inactivity,
    Unauthorized,
    RefreshFailed,
}

impl SignOutReason {
    /// Toast text for the anonymous view, if the reason deserves one.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            SignOutReason::Logout => None,
            SignOutReason::Inactivity => Some("You were signed out after a period of inactivity."),
            SignOutReason::Unauthorized | SignOutReason::RefreshFailed => {
                Some("Your session has ended. Please sign in again.")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { username: String },
    /// Present the anonymous/login view. `redirect` asks for a hard
    /// navigation so stale screens stop issuing authenticated requests.
    SignedOut { reason: SignOutReason, redirect: bool },
    /// Dismissible notice: the session ends in `remaining` unless the user
    /// does something.
    IdleWarning { remaining: Duration },
    IdleWarningDismissed,
}

/// Publisher side of the mirror. Owned by the session controller.
pub(crate) struct SessionMirror {
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionMirror {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { state, events }
    }

    pub(crate) fn publish(&self, next: SessionState) {
        self.state.send_replace(next);
    }

    /// Nobody listening is fine; events are advisory.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
