use std::io::{self, Write};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use campusdesk_core::auth::{ActivityKind, InactivityWatchdog, SessionEvent};

use crate::Console;

pub async fn login(console: &mut Console, username: Option<String>) -> Result<()> {
    let username = match username
        .or_else(|| std::env::var("CAMPUSDESK_USERNAME").ok())
        .filter(|u| !u.trim().is_empty())
    {
        Some(username) => username,
        None => prompt_username(console.config.last_username.as_deref())?,
    };

    let password = match std::env::var("CAMPUSDESK_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };

    if username.is_empty() || password.is_empty() {
        return Err(anyhow::anyhow!("Username and password required"));
    }

    eprintln!("Authenticating...");
    console
        .session
        .login(&username, &password)
        .await
        .context("Login failed")?;

    console.config.last_username = Some(username);
    if let Err(e) = console.config.save() {
        warn!(error = %e, "Failed to save config");
    }

    eprintln!("Login successful!");
    Ok(())
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

pub async fn logout(console: &Console) -> Result<()> {
    console.session.logout().await;
    eprintln!("Signed out.");
    Ok(())
}

pub fn status(console: &Console) -> Result<()> {
    let state = console.session.state();
    if !state.is_authenticated {
        println!("Not signed in.");
        return Ok(());
    }

    let who = console
        .session
        .username()
        .unwrap_or_else(|| "unknown user".to_string());
    let minutes = console
        .session
        .store()
        .time_until_expiry()
        .map(|d| d.num_minutes().max(0))
        .unwrap_or(0);
    println!("Signed in as {} (access token expires in {}m)", who, minutes);
    Ok(())
}

pub async fn get(console: &Console, path: &str) -> Result<()> {
    // Settle a pending refresh first so the request carries a fresh token.
    if console.session.valid_access_token().await.is_none() {
        eprintln!("Not signed in; sending the request anonymously.");
    }

    let value: Value = console
        .api
        .get(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub async fn watch(console: &Console) -> Result<()> {
    // An expired access token still counts; it is refreshed on next use.
    if !console.session.state().is_authenticated {
        return Err(anyhow::anyhow!("Not signed in"));
    }

    let watchdog = InactivityWatchdog::from_config(&console.config).spawn(console.session.clone());
    let mut events = console.session.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("Session open. Press Enter to stay active, Ctrl-D to leave.");
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(_) => watchdog.record_activity(ActivityKind::KeyPress),
                None => break,
            },
            event = events.recv() => match event {
                Ok(SessionEvent::IdleWarning { remaining }) => {
                    eprintln!("Your session will end in {}s unless you press Enter.", remaining.as_secs());
                }
                Ok(SessionEvent::IdleWarningDismissed) => eprintln!("Welcome back."),
                Ok(SessionEvent::SignedOut { reason, .. }) => {
                    eprintln!("{}", reason.notice().unwrap_or("Signed out."));
                    break;
                }
                Ok(SessionEvent::SignedIn { .. }) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "Missed session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    watchdog.shutdown();
    Ok(())
}
