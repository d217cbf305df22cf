//! TravelKit CLI - sign in, inspect and end TravelKit SDK sessions from a
//! terminal.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use travelkit_core::auth::FileCredentialStore;
use travelkit_core::cache::CacheManager;
use travelkit_core::config::Config;
use travelkit_core::{ApiClient, EventsHub, Session, SessionManager, SessionState};

// ============================================================================
// Constants
// ============================================================================

/// Daily-rolled log file name prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "travelkit.log";

/// Subdirectory of the cache dir holding user-scoped cached data
const USER_DATA_DIR: &str = "user-data";

const ENV_USERNAME: &str = "TRAVELKIT_USERNAME";
const ENV_PASSWORD: &str = "TRAVELKIT_PASSWORD";

/// When set, the session file is encrypted with this passphrase
const ENV_SESSION_PASSPHRASE: &str = "TRAVELKIT_SESSION_PASSPHRASE";

const USAGE: &str = "\
Usage: travelkit <command> [args]

Commands:
  status                         Show the current session
  device                         Fetch an anonymous device session
  login [username]               Sign in with username and password
  facebook <access-token>        Sign in with a Facebook access token
  google <id-token>              Sign in with a Google ID token
  jwt <token>                    Sign in with a JWT
  magic-link <token>             Sign in with a magic link token
  magic-link-fetch               Mint a magic link token for the current session
  register <full-name> <email>   Register a user account
  reset-password <email>         Request a password reset email
  logout                         Sign out
  clear                          Remove all local user data";

type Manager = SessionManager<ApiClient>;

enum Command {
    Status,
    Device,
    Login { username: Option<String> },
    Facebook(String),
    Google(String),
    Jwt(String),
    MagicLink(String),
    MagicLinkFetch,
    Register { full_name: String, email: String },
    ResetPassword { email: String },
    Logout,
    Clear,
}

impl Command {
    fn parse(args: &[String]) -> Result<Option<Self>> {
        let Some(name) = args.first() else {
            return Ok(None);
        };
        let arg = |index: usize, what: &str| -> Result<String> {
            args.get(index)
                .cloned()
                .with_context(|| format!("Missing {} for `{}`\n\n{}", what, name, USAGE))
        };

        let command = match name.as_str() {
            "status" => Command::Status,
            "device" => Command::Device,
            "login" => Command::Login {
                username: args.get(1).cloned(),
            },
            "facebook" => Command::Facebook(arg(1, "access token")?),
            "google" => Command::Google(arg(1, "ID token")?),
            "jwt" => Command::Jwt(arg(1, "token")?),
            "magic-link" => Command::MagicLink(arg(1, "token")?),
            "magic-link-fetch" => Command::MagicLinkFetch,
            "register" => Command::Register {
                full_name: arg(1, "full name")?,
                email: arg(2, "email")?,
            },
            "reset-password" => Command::ResetPassword {
                email: arg(1, "email")?,
            },
            "logout" => Command::Logout,
            "clear" => Command::Clear,
            "-h" | "--help" | "help" => return Ok(None),
            other => bail!("Unknown command `{}`\n\n{}", other, USAGE),
        };
        Ok(Some(command))
    }
}

/// Initialize the tracing subscriber for logging.
/// Logs go to stderr and to a daily file in `log_dir`.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args)? else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config_result = Config::load();
    let mut config = config_result.as_ref().cloned().unwrap_or_default();

    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    std::fs::create_dir_all(&cache_dir).context("Failed to create cache directory")?;
    let _log_guard = init_tracing(&cache_dir);

    if let Err(e) = config_result {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    if config.ensure_device_id() {
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to save generated device id");
        }
    }

    let manager = build_manager(&config, cache_dir)?;
    run(command, &manager, &mut config).await
}

fn build_manager(config: &Config, cache_dir: PathBuf) -> Result<Manager> {
    let store = match std::env::var(ENV_SESSION_PASSPHRASE) {
        Ok(passphrase) if !passphrase.is_empty() => {
            FileCredentialStore::new(cache_dir.clone()).with_passphrase(passphrase)
        }
        _ => FileCredentialStore::new(cache_dir.clone()),
    };

    let events = Arc::new(EventsHub::new());
    events.register_revocation_handler(Some(Arc::new(|| {
        eprintln!("Your session is no longer valid. Run `travelkit login` to sign in again.");
    })));

    let user_cache = CacheManager::new(cache_dir.join(USER_DATA_DIR))?;
    let api = ApiClient::new(config)?;
    Ok(SessionManager::new(api, Box::new(store), events).with_user_cache(user_cache))
}

async fn run(command: Command, manager: &Manager, config: &mut Config) -> Result<()> {
    match command {
        Command::Status => {
            match (manager.state(), manager.current_session()) {
                (SessionState::Authenticated, Some(session)) => println!("{}", describe(&session)),
                _ => println!("Not signed in"),
            }
        }
        Command::Device => {
            let session = manager
                .perform_device_session_fetch()
                .await
                .context("Device session fetch failed")?;
            println!("{}", describe(&session));
        }
        Command::Login { username } => {
            let username = match username
                .or_else(|| std::env::var(ENV_USERNAME).ok())
                .or_else(|| config.last_username.clone())
            {
                Some(username) => username,
                None => prompt_line("Username: ")?,
            };
            let password = match std::env::var(ENV_PASSWORD) {
                Ok(password) if !password.is_empty() => password,
                _ => rpassword::prompt_password("Password: ")?,
            };

            let session = manager
                .perform_user_credentials_auth(&username, &password)
                .await
                .context("Login failed")?;

            config.last_username = Some(username);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            info!("Login successful");
            println!("{}", describe(&session));
        }
        Command::Facebook(token) => {
            let session = manager
                .perform_facebook_auth(&token)
                .await
                .context("Facebook sign-in failed")?;
            println!("{}", describe(&session));
        }
        Command::Google(token) => {
            let session = manager
                .perform_google_auth(&token)
                .await
                .context("Google sign-in failed")?;
            println!("{}", describe(&session));
        }
        Command::Jwt(token) => {
            let session = manager.perform_jwt_auth(&token).await.context("JWT sign-in failed")?;
            println!("{}", describe(&session));
        }
        Command::MagicLink(token) => {
            let session = manager
                .perform_magic_link_auth(&token)
                .await
                .context("Magic link sign-in failed")?;
            println!("{}", describe(&session));
        }
        Command::MagicLinkFetch => {
            let Some(session) = manager.current_session() else {
                bail!("Not signed in. Run `travelkit login` first.");
            };
            let token = manager
                .perform_magic_link_fetch(session.access_token())
                .await
                .context("Magic link fetch failed")?;
            println!("{}", token);
        }
        Command::Register { full_name, email } => {
            let access_token = access_token(manager).await?;
            let password = rpassword::prompt_password("Choose a password: ")?;
            manager
                .perform_user_register(&access_token, &full_name, &email, &password)
                .await
                .context("Registration failed")?;
            println!("Registered {}. You can now sign in with `travelkit login`.", email);
        }
        Command::ResetPassword { email } => {
            let access_token = access_token(manager).await?;
            manager
                .perform_password_reset(&access_token, &email)
                .await
                .context("Password reset request failed")?;
            println!("Password reset email sent to {}", email);
        }
        Command::Logout => {
            manager.perform_sign_out().await;
            println!("Signed out");
        }
        Command::Clear => {
            manager.clear_user_data();
            println!("Local user data cleared");
        }
    }
    Ok(())
}

/// Access token of the held session, fetching a device session if there is none
async fn access_token(manager: &Manager) -> Result<String> {
    if let Some(session) = manager.current_session() {
        return Ok(session.access_token().to_string());
    }
    let session = manager
        .perform_device_session_fetch()
        .await
        .context("Device session fetch failed")?;
    Ok(session.access_token().to_string())
}

fn describe(session: &Session) -> String {
    let now = Utc::now();
    let who = if session.is_user_authenticated() { "user" } else { "device" };
    let expiry = match session.time_until_expiry(now) {
        None => "never expires".to_string(),
        Some(left) if left.num_seconds() <= 0 => "expired".to_string(),
        Some(left) => format!("expires in {}m", left.num_minutes()),
    };
    let refresh = if session.needs_refresh(now) { " (renew soon)" } else { "" };
    format!("Signed in as {} (session {}), {}{}", who, session.id(), expiry, refresh)
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Command>> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Command::parse(&args)
    }

    #[test]
    fn test_parse_no_args_shows_usage() {
        assert!(parse(&[]).expect("parse").is_none());
        assert!(parse(&["--help"]).expect("parse").is_none());
    }

    #[test]
    fn test_parse_login_username_is_optional() {
        assert!(matches!(
            parse(&["login"]).expect("parse"),
            Some(Command::Login { username: None })
        ));
        match parse(&["login", "jane"]).expect("parse") {
            Some(Command::Login { username }) => assert_eq!(username.as_deref(), Some("jane")),
            _ => panic!("expected login"),
        }
    }

    #[test]
    fn test_parse_register_needs_name_and_email() {
        assert!(parse(&["register", "Jane Doe"]).is_err());
        match parse(&["register", "Jane Doe", "jane@example.com"]).expect("parse") {
            Some(Command::Register { full_name, email }) => {
                assert_eq!(full_name, "Jane Doe");
                assert_eq!(email, "jane@example.com");
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn test_parse_token_commands() {
        assert!(matches!(parse(&["jwt", "a.b.c"]).expect("parse"), Some(Command::Jwt(t)) if t == "a.b.c"));
        assert!(matches!(parse(&["magic-link", "m"]).expect("parse"), Some(Command::MagicLink(_))));
        assert!(parse(&["facebook"]).is_err());
        assert!(parse(&["bogus"]).is_err());
    }
}
