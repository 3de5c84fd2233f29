//! OIDC Auth Demo
//!
//! Command-line client that drives the credential lifecycle end to end:
//! 1. Accepts a token response from the browser sign-in flow
//! 2. Persists the credential between runs
//! 3. Refreshes the access token before it expires
//! 4. Shows ID-token and user-info claims
//! 5. Calls a protected backend API with a bearer token

mod cli;
mod config;
mod messages;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use credential_lifecycle::{CredentialStore, Session, UserInfo, spawn_refresh_task};
use oidc_auth::{FilePersistence, HttpAuthenticator, PresentationContext, TokenHandoff, TokenResponse};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;

const NOT_AUTHENTICATED: &str = "Not authenticated.";
const USER_INFO_UNAVAILABLE: &str =
    "Unable to Show User Info: Could not fetch info for the current user.";

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr so command output on stdout stays clean
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        issuer = %config.oidc.issuer,
        credentials = %config.credentials.path.display(),
        refresh_margin_secs = config.credentials.refresh_margin_secs,
        "configuration loaded"
    );

    let session = build_session(&config).await?;
    for line in run(&session, &config, cli.command).await? {
        println!("{line}");
    }
    Ok(())
}

/// Wire the HTTP authenticator and file-backed store into a session.
async fn build_session(config: &Config) -> Result<Session> {
    let http = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .context("failed to build HTTP client")?;

    let authenticator = HttpAuthenticator::new(
        http.clone(),
        config.oidc.client_id.clone(),
        config.endpoints(),
    )
    .with_scope(config.scope());

    let persistence = Arc::new(FilePersistence::new(config.credentials.path.clone()));
    let store = CredentialStore::load(persistence).await.with_context(|| {
        format!(
            "failed to load credentials from {}",
            config.credentials.path.display()
        )
    })?;

    Ok(Session::new(
        Arc::new(authenticator),
        Arc::new(store),
        http,
        config.refresh_margin(),
    ))
}

/// Execute one command and return the lines to print.
async fn run(session: &Session, config: &Config, command: Command) -> Result<Vec<String>> {
    match command {
        Command::Status => Ok(status(session)),
        Command::SignIn { token_file } => sign_in(session, &token_file).await,
        Command::SignOut => {
            session
                .sign_out(&PresentationContext::none())
                .await
                .context("sign-out failed")?;
            Ok(vec!["Signed out.".to_string()])
        }
        Command::Refresh => {
            if !session.is_authenticated() {
                return Ok(vec![NOT_AUTHENTICATED.to_string()]);
            }
            let token_set = session
                .refresh_if_needed()
                .await
                .context("token refresh failed")?;
            Ok(vec![format!(
                "Access token valid until {}",
                token_set.expires_at().to_rfc3339()
            )])
        }
        Command::TokenInfo => Ok(session
            .token_info()
            .map(|view| view.display_lines())
            .unwrap_or_else(|| vec![NOT_AUTHENTICATED.to_string()])),
        Command::UserInfo => {
            if !session.is_authenticated() {
                return Ok(vec![NOT_AUTHENTICATED.to_string()]);
            }
            Ok(match session.user_info().await {
                UserInfo::Available(view) => view.display_lines(),
                UserInfo::Unavailable(_) => vec![USER_INFO_UNAVAILABLE.to_string()],
            })
        }
        Command::Message => {
            if !session.is_authenticated() {
                return Ok(vec![NOT_AUTHENTICATED.to_string()]);
            }
            let message =
                messages::fetch_random_message(session.http_client(), &config.backend.messages_url)
                    .await
                    .context("failed to fetch message")?;
            Ok(vec![message])
        }
        Command::Watch { interval_secs } => {
            let handle = spawn_refresh_task(
                session.coordinator().clone(),
                Duration::from_secs(interval_secs),
                config.refresh_margin(),
            );
            info!(interval_secs, "background refresh running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            handle.abort();
            Ok(vec!["Stopped.".to_string()])
        }
    }
}

fn status(session: &Session) -> Vec<String> {
    let Some(credential) = session.credential() else {
        return vec![NOT_AUTHENTICATED.to_string()];
    };
    let token_set = credential.token_set();
    let refresh = if token_set.refresh_token().is_some() {
        "present"
    } else {
        "absent"
    };
    vec![
        format!("State: {}", credential.state()),
        format!("Expires at: {}", token_set.expires_at().to_rfc3339()),
        format!("Refresh token: {refresh}"),
    ]
}

async fn sign_in(session: &Session, token_file: &Path) -> Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(token_file)
        .await
        .with_context(|| format!("failed to read {}", token_file.display()))?;
    let response: TokenResponse = serde_json::from_str(&contents)
        .with_context(|| format!("invalid token response in {}", token_file.display()))?;

    let context = PresentationContext::new(TokenHandoff::new(response, Utc::now()));
    let mut lines = Vec::new();
    match session.sign_in(&context).await {
        Ok(_) => {}
        Err(credential_lifecycle::Error::PersistenceFailure(msg)) => {
            warn!(error = %msg, "signed in but credentials were not saved");
            lines.push(format!("Warning: credentials were not saved: {msg}"));
        }
        Err(e) => return Err(e).context("sign-in failed"),
    }

    let username = session
        .credential()
        .and_then(|c| {
            c.token_set()
                .claim(oidc_auth::claims::PREFERRED_USERNAME)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "User".to_string());
    lines.insert(0, format!("Hello, {username}!"));
    Ok(lines)
}
