//! Campusdesk - terminal front end for the school-management console session.
//!
//! This binary drives the session core the way the console's screens do:
//! it signs in, reports session status, issues authenticated requests and
//! lets the inactivity watchdog end an idle session.

mod commands;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use campusdesk_core::api::{ApiClient, HttpIdentityClient};
use campusdesk_core::auth::{
    CredentialStorage, FileStorage, KeyringStorage, SessionController, SessionSettings, TokenStore,
};
use campusdesk_core::config::CredentialBackend;
use campusdesk_core::{Config, SystemClock};

const USAGE: &str = "\
Usage: campusdesk <command>

Commands:
  login [username]   Sign in (password from CAMPUSDESK_PASSWORD or prompt)
  logout             Sign out, clearing the stored session
  status             Show the current session
  get <path>         Authenticated GET against the console API
  watch              Keep the session open; each line on stdin counts as activity";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
/// Set CAMPUSDESK_LOG_DIR to also write a daily log file.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os("CAMPUSDESK_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), "campusdesk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Everything a command needs, wired together once.
pub struct Console {
    pub config: Config,
    pub session: Arc<SessionController>,
    pub api: ApiClient,
}

impl Console {
    fn open() -> Result<Self> {
        let config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        }
        .with_env_overrides();

        let storage: Box<dyn CredentialStorage> = match config.credential_backend {
            CredentialBackend::File => {
                let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
                Box::new(FileStorage::new(cache_dir))
            }
            CredentialBackend::Keyring => Box::new(KeyringStorage::new()?),
        };

        let store = Arc::new(
            TokenStore::new(storage, Arc::new(SystemClock))
                .with_default_ttl(config.default_token_ttl_secs),
        );
        let identity = Arc::new(HttpIdentityClient::new(
            &config.api_base_url,
            config.request_timeout(),
        )?);
        let session = SessionController::new(identity, store, SessionSettings::from(&config));

        if session.restore_from_storage() {
            session.set_username(config.last_username.clone());
        }

        let api = ApiClient::new(&config.api_base_url, config.request_timeout(), session.clone())?;

        Ok(Self {
            config,
            session,
            api,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();
    info!("Campusdesk starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let mut console = Console::open()?;
    match command.as_str() {
        "login" => commands::login(&mut console, args.get(1).cloned()).await,
        "logout" => commands::logout(&console).await,
        "status" => commands::status(&console),
        "get" => match args.get(1) {
            Some(path) => commands::get(&console, path).await,
            None => Err(anyhow::anyhow!("get requires a path\n\n{}", USAGE)),
        },
        "watch" => commands::watch(&console).await,
        _ => Err(anyhow::anyhow!("Unknown command: {}\n\n{}", command, USAGE)),
    }
}
