//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client id may come from `OIDC_CLIENT_ID` so the TOML file can be
//! shared between environments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use oidc_auth::OidcEndpoints;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oidc: OidcConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Identity provider settings
#[derive(Debug, Deserialize)]
pub struct OidcConfig {
    pub issuer: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
}

/// Credential file and refresh policy
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_credentials_path")]
    pub path: PathBuf,
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

/// Demo backend API
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_messages_url")]
    pub messages_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: default_credentials_path(),
            refresh_margin_secs: default_refresh_margin(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            messages_url: default_messages_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_scopes() -> Vec<String> {
    oidc_auth::DEFAULT_SCOPES
        .split(' ')
        .map(str::to_string)
        .collect()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_refresh_margin() -> u64 {
    60
}

fn default_messages_url() -> String {
    "http://localhost:8000/api/messages".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents, std::env::var("OIDC_CLIENT_ID").ok())
    }

    /// Parse and validate TOML, applying an optional client id override.
    pub fn parse(contents: &str, client_id_override: Option<String>) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        if let Some(client_id) = client_id_override.filter(|id| !id.trim().is_empty()) {
            config.oidc.client_id = client_id;
        }

        if config.oidc.client_id.trim().is_empty() {
            return Err(common::Error::Config(
                "oidc.client_id must be set (or OIDC_CLIENT_ID)".into(),
            ));
        }

        require_http_url("oidc.issuer", &config.oidc.issuer)?;
        for (name, url) in [
            ("oidc.token_endpoint", &config.oidc.token_endpoint),
            ("oidc.userinfo_endpoint", &config.oidc.userinfo_endpoint),
            ("oidc.revocation_endpoint", &config.oidc.revocation_endpoint),
        ] {
            if let Some(url) = url {
                require_http_url(name, url)?;
            }
        }
        require_http_url("backend.messages_url", &config.backend.messages_url)?;

        if config.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.oidc.scopes.is_empty() {
            config.oidc.scopes = default_scopes();
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-demo.toml")
    }

    /// Provider endpoints with any configured overrides applied.
    pub fn endpoints(&self) -> OidcEndpoints {
        let mut endpoints = OidcEndpoints::for_issuer(&self.oidc.issuer);
        if let Some(url) = &self.oidc.token_endpoint {
            endpoints = endpoints.with_token(url.clone());
        }
        if let Some(url) = &self.oidc.userinfo_endpoint {
            endpoints = endpoints.with_userinfo(url.clone());
        }
        if let Some(url) = &self.oidc.revocation_endpoint {
            endpoints = endpoints.with_revocation(url.clone());
        }
        endpoints
    }

    pub fn scope(&self) -> String {
        self.oidc.scopes.join(" ")
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.credentials.refresh_margin_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }
}

fn require_http_url(name: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {url}"
        )))
    }
}
