use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CliError;

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Client settings resolved from flags and the environment.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_url: Option<String>,
    pub access_token: Option<String>,
    pub sync_interval: Duration,
    pub db_path: PathBuf,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sync_interval", &self.sync_interval)
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env(cli_db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(cli_db_path, |name| values.get(name).cloned())
    }

    pub fn from_lookup(
        cli_db_path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CliError> {
        let api_url = optional_trimmed(&lookup, "SEISAMI_API_URL")
            .map(|url| url.trim_end_matches('/').to_string());
        if let Some(url) = api_url.as_deref() {
            if !seisami_core::util::is_http_url(url) {
                return Err(CliError::Config(
                    "SEISAMI_API_URL must start with http:// or https://".to_string(),
                ));
            }
        }

        let access_token = optional_trimmed(&lookup, "SEISAMI_ACCESS_TOKEN");

        let sync_interval_secs = optional_trimmed(&lookup, "SEISAMI_SYNC_INTERVAL_SECS")
            .map(|value| {
                value.parse::<u64>().map_err(|_| {
                    CliError::Config(
                        "SEISAMI_SYNC_INTERVAL_SECS must be a whole number of seconds".to_string(),
                    )
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
        let sync_interval = parse_interval(sync_interval_secs)?;

        let db_path = cli_db_path
            .or_else(|| optional_trimmed(&lookup, "SEISAMI_DB_PATH").map(PathBuf::from))
            .unwrap_or_else(default_db_path);

        Ok(Self {
            api_url,
            access_token,
            sync_interval,
            db_path,
        })
    }

    /// API URL and token, or an error explaining how to set them.
    pub fn remote(&self) -> Result<(&str, &str), CliError> {
        match (self.api_url.as_deref(), self.access_token.as_deref()) {
            (Some(url), Some(token)) => Ok((url, token)),
            _ => Err(CliError::SyncNotConfigured),
        }
    }
}

pub fn parse_interval(secs: u64) -> Result<Duration, CliError> {
    if !(5..=86_400).contains(&secs) {
        return Err(CliError::Config(
            "sync interval must be between 5 and 86400 seconds".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("seisami")
        .join("seisami.db")
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
