//! Inactivity watchdog.
//!
//! While a session is authenticated the watchdog counts down from the last
//! user interaction. After `warning_after` it asks the UI to show a
//! dismissible notice; after `logout_after` it signs the session out. Any
//! activity restarts both countdowns. The watchdog disarms itself the moment
//! the session becomes anonymous and re-arms when a new one starts.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use super::session::SessionController;
use super::state::{SessionEvent, SessionState, SignOutReason};
use crate::config::Config;

/// Interactions that count as the user being present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
}

#[derive(Debug, Clone, Copy)]
pub struct InactivityWatchdog {
    warning_after: Duration,
    logout_after: Duration,
}

impl InactivityWatchdog {
    /// `warning_after` must be shorter than `logout_after`; otherwise no
    /// warning is shown before the logout.
    pub fn new(warning_after: Duration, logout_after: Duration) -> Self {
        Self {
            warning_after: warning_after.min(logout_after),
            logout_after,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.idle_warning(), config.idle_logout())
    }

    /// Time between the warning and the forced logout.
    pub fn grace_period(&self) -> Duration {
        self.logout_after - self.warning_after
    }

    /// Start watching `session`. Dropping the handle stops the watchdog.
    pub fn spawn(self, session: Arc<SessionController>) -> WatchdogHandle {
        let (activity_tx, activity_rx) = watch::channel(Instant::now());
        let task = tokio::spawn(self.run(session, activity_rx));
        WatchdogHandle {
            activity: activity_tx,
            task,
        }
    }

    async fn run(self, session: Arc<SessionController>, mut activity: watch::Receiver<Instant>) {
        let mut state = session.subscribe();
        loop {
            loop {
                let armed = state.borrow_and_update().is_authenticated;
                if armed {
                    break;
                }
                if state.changed().await.is_err() {
                    return;
                }
            }

            // Activity seen while disarmed does not count.
            activity.borrow_and_update();
            debug!(
                warning_secs = self.warning_after.as_secs(),
                logout_secs = self.logout_after.as_secs(),
                "Inactivity watchdog armed"
            );

            if self
                .watch_session(&session, &mut activity, &mut state)
                .await
                .is_break()
            {
                return;
            }
            debug!("Inactivity watchdog disarmed");
        }
    }

    /// Runs until the session ends. `Break` means the watchdog itself is
    /// shutting down.
    async fn watch_session(
        &self,
        session: &SessionController,
        activity: &mut watch::Receiver<Instant>,
        state: &mut watch::Receiver<SessionState>,
    ) -> ControlFlow<()> {
        let mut last_activity = Instant::now();
        let mut warned = false;

        loop {
            let warn_at = last_activity + self.warning_after;
            let logout_at = last_activity + self.logout_after;

            tokio::select! {
                changed = activity.changed() => {
                    if changed.is_err() {
                        return ControlFlow::Break(());
                    }
                    last_activity = (*activity.borrow_and_update()).max(last_activity);
                    if warned {
                        warned = false;
                        session.notify(SessionEvent::IdleWarningDismissed);
                    }
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        return ControlFlow::Break(());
                    }
                    let authenticated = state.borrow_and_update().is_authenticated;
                    if !authenticated {
                        return ControlFlow::Continue(());
                    }
                }
                _ = sleep_until(warn_at), if !warned => {
                    warned = true;
                    let remaining = self.grace_period();
                    info!(remaining_secs = remaining.as_secs(), "Session idle, warning user");
                    session.notify(SessionEvent::IdleWarning { remaining });
                }
                _ = sleep_until(logout_at) => {
                    info!(idle_secs = self.logout_after.as_secs(), "Session idle, signing out");
                    session.logout_for(SignOutReason::Inactivity).await;
                    return ControlFlow::Continue(());
                }
            }
        }
    }
}

/// Feeds activity to a running watchdog.
pub struct WatchdogHandle {
    activity: watch::Sender<Instant>,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn record_activity(&self, kind: ActivityKind) {
        trace!(?kind, "User activity");
        self.activity.send_replace(Instant::now());
    }

    /// Cancel all timers and stop listening.
    pub fn shutdown(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
