//! lostpaws - command-line client for the lost-and-found pet registry.
//!
//! Drives the session lifecycle from a terminal: log in, inspect the
//! session, ask the navigation guard about a destination, make authenticated
//! API reads, and watch the session until it expires.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lostpaws_core::auth::guard::{resume_target, split_uri, RETURN_URL_PARAM};
use lostpaws_core::auth::{token, AuthState, GuardDecision};
use lostpaws_core::config::Config;
use lostpaws_core::AuthContext;

/// Environment variable consulted before prompting for a password
const ENV_PASSWORD: &str = "LOSTPAWS_PASSWORD";

/// Log file name prefix inside the configured log directory
const LOG_FILE_PREFIX: &str = "lostpaws.log";

const USAGE: &str = "\
Usage: lostpaws <command>

Commands:
  login [email] [--return <target>] Log in and store the session
  logout                            End the session
  status                            Show the current session
  check <path>                      Ask the guard whether <path> may be opened
  get <path>                        Authenticated GET, prints JSON
  watch                             Monitor the session until it expires

A login --return target is either a local path such as /perfil or the
redirect URI printed by check (/acceso-denegado?returnUrl=...).";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Login {
        email: Option<String>,
        return_to: Option<String>,
    },
    Logout,
    Status,
    Check(String),
    Get(String),
    Watch,
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            return Ok(Command::Help);
        };
        let rest = &args[1..];

        match name.as_str() {
            "login" => {
                let mut email = None;
                let mut return_to = None;
                let mut iter = rest.iter();
                while let Some(arg) = iter.next() {
                    if arg == "--return" {
                        let path = iter.next().context("--return needs a path")?;
                        return_to = Some(path.clone());
                    } else if email.is_none() {
                        email = Some(arg.clone());
                    } else {
                        bail!("Unexpected argument: {}", arg);
                    }
                }
                Ok(Command::Login { email, return_to })
            }
            "logout" => Ok(Command::Logout),
            "status" => Ok(Command::Status),
            "check" => Ok(Command::Check(Self::one_arg(name, rest)?)),
            "get" => Ok(Command::Get(Self::one_arg(name, rest)?)),
            "watch" => Ok(Command::Watch),
            "help" | "--help" | "-h" => Ok(Command::Help),
            other => bail!("Unknown command: {}\n\n{}", other, USAGE),
        }
    }

    fn one_arg(name: &str, rest: &[String]) -> Result<String> {
        match rest {
            [arg] => Ok(arg.clone()),
            _ => bail!("{} takes exactly one argument", name),
        }
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug). When a
/// log directory is configured, logs are also written to a daily file there;
/// the returned guard must live until exit to flush it.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
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

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut ctx = AuthContext::launch(&config)?;
    let result = run(command, &mut ctx, &mut config).await;
    ctx.shutdown();
    result
}

async fn run(command: Command, ctx: &mut AuthContext, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { email, return_to } => login(ctx, config, email, return_to).await,
        Command::Logout => {
            ctx.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Status => {
            status(ctx);
            Ok(())
        }
        Command::Check(uri) => {
            match ctx.guard().check_uri(&uri) {
                GuardDecision::Allow => println!("allow {}", uri),
                GuardDecision::Redirect(redirect) => println!("redirect {}", redirect.to_uri()),
            }
            Ok(())
        }
        Command::Get(path) => {
            let value: serde_json::Value = ctx.api().get(&path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Watch => watch(ctx).await,
        Command::Help => Ok(()),
    }
}

async fn login(
    ctx: &mut AuthContext,
    config: &mut Config,
    email: Option<String>,
    return_to: Option<String>,
) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    if email.is_empty() {
        bail!("Email required");
    }

    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    println!("Authenticating...");
    let session = ctx.login(&email, &password).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    let now = ctx.state().now();
    println!(
        "Logged in as {} ({}), token valid for {} minutes.",
        session.display_name(),
        session.role,
        session.minutes_until_expiry(now)
    );

    if let Some(target) = return_to {
        println!("Continue to {}", continue_target(&target));
    }
    Ok(())
}

/// Where to go after login, given a bare path or a guard redirect URI.
///
/// Falls back to the landing page for anything that is not a local path.
fn continue_target(target: &str) -> String {
    let (_, query) = split_uri(target);
    if let Some((_, value)) = query.iter().find(|(key, _)| key == RETURN_URL_PARAM) {
        return resume_target(&[(RETURN_URL_PARAM, value.as_str())]);
    }
    resume_target(&[(RETURN_URL_PARAM, target)])
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
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

fn status(ctx: &AuthContext) {
    let state = ctx.state();
    match state.state() {
        AuthState::Anonymous => println!("Not logged in."),
        AuthState::Expired => {
            // Purges the stale record as a side effect.
            state.is_authenticated();
            println!("Session expired. Please log in again.");
        }
        AuthState::Authenticated(session) => {
            println!("Logged in as {} <{}>", session.display_name(), session.email);
            println!("  user id: {}", session.user_id);
            println!("  role:    {}", session.role);
            if let Some(info) = token::token_info(&session.token, state.now()) {
                println!("  expires: in {} minutes", info.minutes_remaining());
                if info.expires_soon {
                    println!("  warning: the session expires soon");
                }
            }
        }
    }
}

async fn watch(ctx: &mut AuthContext) -> Result<()> {
    if !ctx.state().is_authenticated() {
        bail!("Not logged in");
    }
    // Restart for an immediate check with this subscriber in place.
    let Some(mut warnings) = ctx.start_monitor() else {
        bail!("Watching needs durable session storage (storage = none is configured)");
    };
    let mut changes = Box::pin(ctx.state().change_stream());
    info!("Watching session");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped.");
                break;
            }
            warning = warnings.recv() => match warning {
                Ok(warning) => println!(
                    "Session for user {} expires in {} seconds.",
                    warning.user_id,
                    warning.remaining.num_seconds()
                ),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            change = changes.next() => match change {
                Some(Some(session)) => println!("Session active for {}.", session.display_name()),
                Some(None) | None => {
                    println!("Session ended.");
                    break;
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_login_variants() {
        assert_eq!(
            Command::parse(&args(&["login"])).unwrap(),
            Command::Login { email: None, return_to: None }
        );
        assert_eq!(
            Command::parse(&args(&["login", "ana@example.com", "--return", "/perfil"])).unwrap(),
            Command::Login {
                email: Some("ana@example.com".to_string()),
                return_to: Some("/perfil".to_string()),
            }
        );
        assert!(Command::parse(&args(&["login", "--return"])).is_err());
        assert!(Command::parse(&args(&["login", "a", "b"])).is_err());
    }

    #[test]
    fn test_continue_target() {
        assert_eq!(continue_target("/perfil"), "/perfil");
        assert_eq!(continue_target("/mascotas/3?tab=fotos"), "/mascotas/3?tab=fotos");
        assert_eq!(
            continue_target("/acceso-denegado?returnUrl=%2Fperfil%3Fx%3D1"),
            "/perfil?x=1"
        );
        assert_eq!(continue_target("https://evil.example/"), "/home");
        assert_eq!(continue_target("//evil.example"), "/home");
        assert_eq!(continue_target("/acceso-denegado?returnUrl=https%3A%2F%2Fevil"), "/home");
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&[]).unwrap(), Command::Help);
        assert_eq!(Command::parse(&args(&["status"])).unwrap(), Command::Status);
        assert_eq!(
            Command::parse(&args(&["check", "/perfil?x=1"])).unwrap(),
            Command::Check("/perfil?x=1".to_string())
        );
        assert_eq!(
            Command::parse(&args(&["get", "/mascotas"])).unwrap(),
            Command::Get("/mascotas".to_string())
        );
        assert!(Command::parse(&args(&["get"])).is_err());
        assert!(Command::parse(&args(&["fly"])).is_err());
    }
}
