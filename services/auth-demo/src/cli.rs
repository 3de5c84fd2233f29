//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OIDC credential lifecycle demo
#[derive(Parser, Debug)]
#[command(name = "oidc-auth-demo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show whether a credential is present and when it expires
    Status,

    /// Sign in with a token response captured by the browser flow
    SignIn {
        /// JSON token endpoint response (access_token, expires_in, ...)
        #[arg(long)]
        token_file: PathBuf,
    },

    /// Revoke the credential at the provider and delete it locally
    SignOut,

    /// Refresh the access token if it is about to expire
    Refresh,

    /// Show claims from the ID token
    TokenInfo,

    /// Fetch and show claims from the user-info endpoint
    UserInfo,

    /// Fetch a random message from the backend API
    Message,

    /// Keep the credential fresh in the background until Ctrl-C
    Watch {
        /// Seconds between refresh checks
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: u64,
    },
}
