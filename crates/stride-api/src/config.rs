use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

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
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub history_rate_limit_per_window: u32,
    pub sync_max_batch_size: usize,
    pub duplicate_tolerance: Duration,
    pub idempotency_ttl: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "history_rate_limit_per_window",
                &self.history_rate_limit_per_window,
            )
            .field("sync_max_batch_size", &self.sync_max_batch_size)
            .field("duplicate_tolerance", &self.duplicate_tolerance)
            .field("idempotency_ttl", &self.idempotency_ttl)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "STRIDE_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "STRIDE_DATABASE_PATH", "stride.db");

        let jwt_secret = required_trimmed(&lookup, "STRIDE_JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "STRIDE_JWT_SECRET must be at least 32 bytes".to_string(),
            ));
        }
        let jwt_issuer = optional_trimmed(&lookup, "STRIDE_JWT_ISSUER");

        let auth_clock_skew_secs = value_or_default(&lookup, "AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string(),
                )
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let sync_rate_limit_per_window =
            value_or_default(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", "30")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "SYNC_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]".to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&sync_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "SYNC_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let history_rate_limit_per_window =
            value_or_default(&lookup, "HISTORY_RATE_LIMIT_PER_WINDOW", "120")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "HISTORY_RATE_LIMIT_PER_WINDOW must be an integer in [1, 5000]".to_string(),
                    )
                })?;
        if !(1..=5_000).contains(&history_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "HISTORY_RATE_LIMIT_PER_WINDOW must be in [1, 5000]".to_string(),
            ));
        }

        let sync_max_batch_size = value_or_default(&lookup, "SYNC_MAX_BATCH_SIZE", "500")
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "SYNC_MAX_BATCH_SIZE must be an integer in [1, 5000]".to_string(),
                )
            })?;
        if !(1..=5_000).contains(&sync_max_batch_size) {
            return Err(ConfigError::Invalid(
                "SYNC_MAX_BATCH_SIZE must be in [1, 5000]".to_string(),
            ));
        }

        let duplicate_tolerance_secs =
            value_or_default(&lookup, "SYNC_DUPLICATE_TOLERANCE_SECS", "60")
                .parse::<u64>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "SYNC_DUPLICATE_TOLERANCE_SECS must be an integer in [0, 600]".to_string(),
                    )
                })?;
        if duplicate_tolerance_secs > 600 {
            return Err(ConfigError::Invalid(
                "SYNC_DUPLICATE_TOLERANCE_SECS must be in [0, 600]".to_string(),
            ));
        }

        let idempotency_ttl_hours = value_or_default(&lookup, "IDEMPOTENCY_TTL_HOURS", "24")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "IDEMPOTENCY_TTL_HOURS must be an integer in [1, 168]".to_string(),
                )
            })?;
        if !(1..=168).contains(&idempotency_ttl_hours) {
            return Err(ConfigError::Invalid(
                "IDEMPOTENCY_TTL_HOURS must be in [1, 168]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window,
            history_rate_limit_per_window,
            sync_max_batch_size,
            duplicate_tolerance: Duration::from_secs(duplicate_tolerance_secs),
            idempotency_ttl: Duration::from_secs(idempotency_ttl_hours * 3_600),
        })
    }
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
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from<'a>(map: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + 'a {
        |key| map.get(key).map(|value| (*value).to_string())
    }

    #[test]
    fn config_requires_jwt_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(err.to_string().contains("STRIDE_JWT_SECRET"));
    }

    #[test]
    fn config_rejects_short_jwt_secret() {
        let mut map = HashMap::new();
        map.insert("STRIDE_JWT_SECRET", "too-short");
        let err = AppConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(err.to_string().contains("at least 32"));
    }

    #[test]
    fn config_applies_defaults() {
        let mut map = HashMap::new();
        map.insert(
            "STRIDE_JWT_SECRET",
            "0123456789abcdef0123456789abcdef-long-enough",
        );
        let config = AppConfig::from_lookup(lookup_from(&map)).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.sync_max_batch_size, 500);
        assert_eq!(config.duplicate_tolerance, Duration::from_secs(60));
        assert_eq!(config.idempotency_ttl, Duration::from_secs(24 * 3_600));
    }

    #[test]
    fn config_rejects_out_of_range_batch_size() {
        let mut map = HashMap::new();
        map.insert(
            "STRIDE_JWT_SECRET",
            "0123456789abcdef0123456789abcdef-long-enough",
        );
        map.insert("SYNC_MAX_BATCH_SIZE", "0");
        let err = AppConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(err.to_string().contains("SYNC_MAX_BATCH_SIZE"));
    }

    #[test]
    fn config_redacts_jwt_secret_in_debug() {
        let mut map = HashMap::new();
        map.insert(
            "STRIDE_JWT_SECRET",
            "sensitive-secret-material-0123456789abcdef",
        );
        let config = AppConfig::from_lookup(lookup_from(&map)).unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-secret-material"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
