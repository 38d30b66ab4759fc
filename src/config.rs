//! Configuration for role-connection
//!
//! CLI arguments and environment variable handling using clap. Every flag can
//! also be set from the environment (or a `.env` file loaded at startup).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::http::DEFAULT_API_BASE;
use crate::service::ServiceConfig;
use crate::types::{ApplicationId, BotToken, CommunityId};

/// role-connection - sync guild roles to linked-role metadata
#[derive(Parser, Debug, Clone)]
#[command(name = "role-connection")]
#[command(about = "Keeps Discord linked-role metadata in sync with guild roles")]
pub struct Args {
    /// Bot token, used for guild lookups and schema registration
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    /// Guild whose roles drive the metadata
    #[arg(long, env = "GUILD_ID")]
    pub guild_id: Option<String>,

    /// Application (client) ID owning the role connection
    #[arg(long, env = "DISCORD_CLIENT_ID")]
    pub client_id: Option<String>,

    /// REST API base URL
    #[arg(long, env = "DISCORD_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Path to the role catalog (TOML)
    #[arg(long, env = "ROLE_CATALOG", default_value = "roles.toml")]
    pub catalog: PathBuf,

    /// Timeout for each HTTP call in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// Reconciliations in flight at once during a batch
    #[arg(long, env = "MAX_CONCURRENT", default_value = "8")]
    pub max_concurrent: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the metadata schema derived from the catalog
    Schema,

    /// Register the metadata schema with the platform
    Register,

    /// Reconcile one user's role connection
    Reconcile {
        /// User to reconcile
        #[arg(long)]
        user_id: String,

        /// The user's OAuth access token
        #[arg(long, env = "USER_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        /// Print the update instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Reconcile every user listed in a JSON file of {user_id, access_token}
    ReconcileBatch {
        /// Path to the token file
        #[arg(long)]
        tokens: PathBuf,

        /// Print the updates instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
}

impl Command {
    /// Whether the command talks to the platform at all.
    pub fn needs_platform(&self) -> bool {
        !matches!(self, Command::Schema)
    }
}

/// Errors found while validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{flag} (or {env}) is required for this command")]
    Missing {
        flag: &'static str,
        env: &'static str,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Immutable settings shared by every component, built once from [`Args`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub community_id: CommunityId,
    pub application_id: ApplicationId,
    pub bot_token: BotToken,
    pub api_base: String,
    pub request_timeout: Duration,
    pub max_concurrent: usize,
}

impl SyncConfig {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            call_timeout: self.request_timeout,
            max_concurrent: self.max_concurrent,
        }
    }
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "REQUEST_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONCURRENT must be greater than zero".to_string(),
            ));
        }

        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "DISCORD_API_BASE must be an http(s) URL, got {}",
                self.api_base
            )));
        }

        if self.command.needs_platform() {
            self.sync_config()?;
        }

        Ok(())
    }

    /// Build the shared settings. Fails when a credential is missing.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let bot_token = required(&self.bot_token, "--bot-token", "DISCORD_BOT_TOKEN")?;
        let guild_id = required(&self.guild_id, "--guild-id", "GUILD_ID")?;
        let client_id = required(&self.client_id, "--client-id", "DISCORD_CLIENT_ID")?;

        Ok(SyncConfig {
            community_id: CommunityId::new(guild_id),
            application_id: ApplicationId::new(client_id),
            bot_token: BotToken::new(bot_token),
            api_base: self.api_base.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_concurrent: self.max_concurrent,
        })
    }
}

fn required<'a>(
    value: &'a Option<String>,
    flag: &'static str,
    env: &'static str,
) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { flag, env })
}
