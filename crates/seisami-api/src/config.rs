use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Data directory value that keeps every user store in memory.
pub const IN_MEMORY_DATA_DIR: &str = ":memory:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` keeps user stores in memory.
    pub data_dir: Option<PathBuf>,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_write_rate_limit_per_window: u32,
    pub sync_read_rate_limit_per_window: u32,
    pub hub_queue_capacity: usize,
    pub room_queue_capacity: usize,
    pub ws_heartbeat: Duration,
    pub ws_read_timeout: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("data_dir", &self.data_dir)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_write_rate_limit_per_window",
                &self.sync_write_rate_limit_per_window,
            )
            .field(
                "sync_read_rate_limit_per_window",
                &self.sync_read_rate_limit_per_window,
            )
            .field("hub_queue_capacity", &self.hub_queue_capacity)
            .field("room_queue_capacity", &self.room_queue_capacity)
            .field("ws_heartbeat", &self.ws_heartbeat)
            .field("ws_read_timeout", &self.ws_read_timeout)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SEISAMI_API_BIND_ADDR", "127.0.0.1:8080");

        let data_dir = value_or_default(&lookup, "SEISAMI_DATA_DIR", "./seisami-data");
        let data_dir = (data_dir != IN_MEMORY_DATA_DIR).then(|| PathBuf::from(data_dir));

        let jwt_secret = required_trimmed(&lookup, "SEISAMI_JWT_SECRET")?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "SEISAMI_JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }
        let jwt_issuer = optional_trimmed(&lookup, "SEISAMI_JWT_ISSUER");

        let auth_clock_skew_secs: u64 = ranged(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0, 300)?;
        let rate_limit_window_secs: u64 =
            ranged(&lookup, "RATE_LIMIT_WINDOW_SECS", "60", 10, 3_600)?;
        let sync_write_rate_limit_per_window =
            ranged(&lookup, "SYNC_WRITE_RATE_LIMIT_PER_WINDOW", "600", 1, 100_000)?;
        let sync_read_rate_limit_per_window =
            ranged(&lookup, "SYNC_READ_RATE_LIMIT_PER_WINDOW", "600", 1, 100_000)?;
        let hub_queue_capacity = ranged(&lookup, "HUB_QUEUE_CAPACITY", "256", 1, 65_536)?;
        let room_queue_capacity = ranged(&lookup, "ROOM_QUEUE_CAPACITY", "256", 1, 65_536)?;
        let ws_heartbeat_secs: u64 = ranged(&lookup, "WS_HEARTBEAT_SECS", "54", 1, 600)?;
        let ws_read_timeout_secs: u64 = ranged(&lookup, "WS_READ_TIMEOUT_SECS", "60", 2, 900)?;
        if ws_read_timeout_secs <= ws_heartbeat_secs {
            return Err(ConfigError::Invalid(
                "WS_READ_TIMEOUT_SECS must be greater than WS_HEARTBEAT_SECS".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            data_dir,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_write_rate_limit_per_window,
            sync_read_rate_limit_per_window,
            hub_queue_capacity,
            room_queue_capacity,
            ws_heartbeat: Duration::from_secs(ws_heartbeat_secs),
            ws_read_timeout: Duration::from_secs(ws_read_timeout_secs),
        })
    }
}

fn ranged<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display + Copy,
{
    let value = value_or_default(lookup, name, default)
        .parse::<T>()
        .map_err(|_| {
            ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
        })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!("{name} must be in [{min}, {max}]")));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
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

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        data_dir: None,
        jwt_secret: "test-secret-with-enough-length".to_string(),
        jwt_issuer: None,
        auth_clock_skew: Duration::from_secs(60),
        rate_limit_window: Duration::from_secs(60),
        sync_write_rate_limit_per_window: 1_000,
        sync_read_rate_limit_per_window: 1_000,
        hub_queue_capacity: 8,
        room_queue_capacity: 8,
        ws_heartbeat: Duration::from_secs(54),
        ws_read_timeout: Duration::from_secs(60),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("SEISAMI_JWT_SECRET"));
    }

    #[test]
    fn config_applies_defaults() {
        let map = HashMap::from([("SEISAMI_JWT_SECRET", "0123456789abcdef")]);
        let config = config_from(&map).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.data_dir, Some(PathBuf::from("./seisami-data")));
        assert_eq!(config.hub_queue_capacity, 256);
        assert_eq!(config.ws_heartbeat, Duration::from_secs(54));
        assert_eq!(config.ws_read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn config_accepts_in_memory_data_dir() {
        let map = HashMap::from([
            ("SEISAMI_JWT_SECRET", "0123456789abcdef"),
            ("SEISAMI_DATA_DIR", ":memory:"),
        ]);
        assert_eq!(config_from(&map).unwrap().data_dir, None);
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let map = HashMap::from([
            ("SEISAMI_JWT_SECRET", "0123456789abcdef"),
            ("RATE_LIMIT_WINDOW_SECS", "5"),
        ]);
        assert!(config_from(&map)
            .unwrap_err()
            .to_string()
            .contains("RATE_LIMIT_WINDOW_SECS"));

        let map = HashMap::from([
            ("SEISAMI_JWT_SECRET", "0123456789abcdef"),
            ("WS_HEARTBEAT_SECS", "60"),
            ("WS_READ_TIMEOUT_SECS", "60"),
        ]);
        assert!(config_from(&map)
            .unwrap_err()
            .to_string()
            .contains("WS_READ_TIMEOUT_SECS"));

        let map = HashMap::from([("SEISAMI_JWT_SECRET", "short")]);
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let map = HashMap::from([("SEISAMI_JWT_SECRET", "sensitive-signing-secret")]);
        let config = config_from(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-signing-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
