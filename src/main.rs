use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use hms_session::demo::DEMO_ACCOUNTS;
use hms_session::{BackendConfig, SessionError, SessionState, SessionStatus, SessionSynchronizer, SignUpData, UserRole};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{code}: {0}", code = .0.error_code())]
    Session(#[from] SessionError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timed out waiting for the session to settle")]
    Timeout,
}

#[derive(Parser, Debug)]
#[command(name = "hms-session", about = "Hospital staff session client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap from the stored session and print the resulting state.
    Status,
    Login {
        #[arg(long, env = "HMS_EMAIL")]
        email: String,
        #[arg(long, env = "HMS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    /// Sign out even if the backend is unreachable, and wipe local state.
    ForceLogout,
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "HMS_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        role: UserRole,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Re-fetch the profile for a signed-in user who has none.
    RetryProfile,
    /// List the demo accounts (demo mode only).
    Accounts,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    mode: &'static str,
    status: SessionStatus,
    #[serde(flatten)]
    state: &'a SessionState,
}

#[derive(Serialize)]
struct AccountRow {
    email: &'static str,
    role: UserRole,
    full_name: &'static str,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    let config = BackendConfig::from_env();
    let sync = SessionSynchronizer::from_config(&config)?;
    sync.start().await;

    match command {
        Command::Status => {}
        Command::Login { email, password } => {
            let outcome = sync.sign_in(&email, &password).await?;
            wait_for_settled(&sync, &outcome.user.id, config.timing.profile_budget()).await?;
        }
        Command::Logout => sync.sign_out().await?,
        Command::ForceLogout => sync.force_sign_out().await,
        Command::Signup { email, password, full_name, role, department, phone } => {
            let data = SignUpData { full_name, role, department, phone };
            let outcome = sync.sign_up(&email, &password, &data).await?;
            if outcome.session.is_some() {
                wait_for_settled(&sync, &outcome.user.id, config.timing.profile_budget()).await?;
            } else {
                eprintln!("check {email} for a confirmation link");
            }
        }
        Command::RetryProfile => sync.retry_profile_load().await?,
        Command::Accounts => {
            if !sync.is_demo() {
                return Err(SessionError::NotAvailable("demo accounts exist only in demo mode".into()).into());
            }
            let rows: Vec<AccountRow> = DEMO_ACCOUNTS
                .iter()
                .map(|a| AccountRow { email: a.email, role: a.role, full_name: a.full_name })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }
    }

    print_state(&sync)
}

/// Wait until the auth-change listener has published a settled state for
/// `user_id`. A session restored at startup for someone else does not count.
async fn wait_for_settled(sync: &SessionSynchronizer, user_id: &str, budget: Duration) -> Result<(), CliError> {
    let mut observer = sync.store().subscribe();
    tokio::time::timeout(budget, observer.wait_for(|s| is_settled_for(s, user_id)))
        .await
        .map_err(|_| CliError::Timeout)?
        .map_err(|_| CliError::Timeout)?;
    Ok(())
}

fn is_settled_for(state: &SessionState, user_id: &str) -> bool {
    !state.loading && state.user.as_ref().is_some_and(|u| u.id == user_id)
}

fn print_state(sync: &SessionSynchronizer) -> Result<(), CliError> {
    let state = sync.state();
    let report = StatusReport {
        mode: if sync.is_demo() { "demo" } else { "live" },
        status: state.status(),
        state: &state,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
