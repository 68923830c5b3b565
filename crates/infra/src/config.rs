//! Process configuration read from environment variables.

use std::net::SocketAddr;

use chrono::FixedOffset;
use thiserror::Error;

use tapor_observability::LogFormat;
use tapor_products::StockPolicy;

use crate::engine::{DEFAULT_NUMBERING_MAX_ATTEMPTS, EngineSettings};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}='{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageBackend,
    pub engine: EngineSettings,
    /// Local time offset used for "today" and "this month" on the dashboard.
    pub dashboard_offset: FixedOffset,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = {
            let raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
            raw.parse::<SocketAddr>()
                .map_err(|e| ConfigError::invalid("BIND_ADDR", &raw, e.to_string()))?
        };

        let use_persistent = match get("USE_PERSISTENT_STORES") {
            None => false,
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| ConfigError::invalid("USE_PERSISTENT_STORES", &raw, "expected a boolean"))?,
        };

        let storage = if use_persistent {
            let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
                None => DEFAULT_DATABASE_MAX_CONNECTIONS,
                Some(raw) => match raw.parse::<u32>() {
                    Ok(n) if n >= 1 => n,
                    _ => {
                        return Err(ConfigError::invalid(
                            "DATABASE_MAX_CONNECTIONS",
                            &raw,
                            "expected a positive integer",
                        ));
                    }
                },
            };
            StorageBackend::Postgres {
                database_url,
                max_connections,
            }
        } else {
            StorageBackend::InMemory
        };

        let stock_policy = match get("OVERSELL_POLICY") {
            None => StockPolicy::default(),
            Some(raw) => raw
                .parse::<StockPolicy>()
                .map_err(|e| ConfigError::invalid("OVERSELL_POLICY", &raw, e.to_string()))?,
        };

        let numbering_max_attempts = match get("INVOICE_NUMBER_MAX_ATTEMPTS") {
            None => DEFAULT_NUMBERING_MAX_ATTEMPTS,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::invalid(
                        "INVOICE_NUMBER_MAX_ATTEMPTS",
                        &raw,
                        "expected an integer of at least 1",
                    ));
                }
            },
        };

        let dashboard_offset = {
            let raw = get("DASHBOARD_UTC_OFFSET_MINUTES").unwrap_or_else(|| "0".to_string());
            raw.parse::<i32>()
                .ok()
                .and_then(|minutes| minutes.checked_mul(60))
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "DASHBOARD_UTC_OFFSET_MINUTES",
                        &raw,
                        "expected minutes strictly between -1440 and 1440",
                    )
                })?
        };

        let log_format = match get("LOG_FORMAT") {
            None => LogFormat::default(),
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::invalid("LOG_FORMAT", &raw, e.to_string()))?,
        };

        Ok(Self {
            bind_addr,
            storage,
            engine: EngineSettings {
                stock_policy,
                numbering_max_attempts,
            },
            dashboard_offset,
            log_format,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_use_in_memory_storage() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(cfg.storage, StorageBackend::InMemory);
        assert_eq!(cfg.engine, EngineSettings::default());
        assert_eq!(cfg.dashboard_offset.local_minus_utc(), 0);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn persistent_storage_requires_a_database_url() {
        assert_eq!(
            config(&[("USE_PERSISTENT_STORES", "true")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );

        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/tapor"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ])
        .unwrap();
        assert_eq!(
            cfg.storage,
            StorageBackend::Postgres {
                database_url: "postgres://localhost/tapor".to_string(),
                max_connections: 12,
            }
        );
    }

    #[test]
    fn engine_and_dashboard_settings_are_read() {
        let cfg = config(&[
            ("OVERSELL_POLICY", "reject"),
            ("INVOICE_NUMBER_MAX_ATTEMPTS", "3"),
            ("DASHBOARD_UTC_OFFSET_MINUTES", "210"),
            ("LOG_FORMAT", "text"),
        ])
        .unwrap();
        assert_eq!(cfg.engine.stock_policy, StockPolicy::Reject);
        assert_eq!(cfg.engine.numbering_max_attempts, 3);
        assert_eq!(cfg.dashboard_offset.local_minus_utc(), 210 * 60);
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        for (key, value) in [
            ("INVOICE_NUMBER_MAX_ATTEMPTS", "0"),
            ("OVERSELL_POLICY", "sometimes"),
            ("DASHBOARD_UTC_OFFSET_MINUTES", "1440"),
            ("USE_PERSISTENT_STORES", "maybe"),
            ("BIND_ADDR", "localhost"),
            ("LOG_FORMAT", "xml"),
        ] {
            match config(&[(key, value)]) {
                Err(ConfigError::Invalid { key: k, .. }) => assert_eq!(k, key),
                other => panic!("expected {key} to be rejected, got {other:?}"),
            }
        }
    }
}
