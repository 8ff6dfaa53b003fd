//! Process configuration, read once at startup.

use std::net::SocketAddr;
use std::time::Duration;

use applyflow_infra::RunnerConfig;
use applyflow_observability::LogFormat;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is invalid: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,
}

/// Where batches and jobs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub persistence: Persistence,
    pub log_format: LogFormat,
    pub runner: RunnerConfig,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEV_JWT_SECRET.to_string());

        let use_persistent = parse_or(&lookup, "USE_PERSISTENT_STORES", false)?;
        let persistence = if use_persistent {
            let database_url = lookup("DATABASE_URL")
                .filter(|url| !url.is_empty())
                .ok_or(ConfigError::MissingDatabaseUrl)?;
            Persistence::Postgres { database_url }
        } else {
            Persistence::InMemory
        };

        let log_format = parse_or(&lookup, "LOG_FORMAT", LogFormat::default())?;

        let mut runner = RunnerConfig::default();
        if let Some(attempts) = parse_opt::<u32, _>(&lookup, "BATCH_MAX_CLAIM_ATTEMPTS")? {
            runner = runner.with_max_claim_attempts(attempts);
        }
        if let Some(secs) = parse_opt::<u64, _>(&lookup, "BATCH_STALE_CLAIM_SECS")? {
            runner = runner.with_stale_claim_after(Some(Duration::from_secs(secs)));
        }

        Ok(Self {
            bind_addr,
            jwt_secret,
            persistence,
            log_format,
            runner,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_opt<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(None),
    }
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, name)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ApiConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_in_memory_dev_setup() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert!(config.uses_dev_secret());
        assert_eq!(config.persistence, Persistence::InMemory);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.runner, RunnerConfig::default());
    }

    #[test]
    fn runner_tunables_come_from_the_environment() {
        let config = config(&[
            ("BATCH_MAX_CLAIM_ATTEMPTS", "8"),
            ("BATCH_STALE_CLAIM_SECS", "900"),
            ("LOG_FORMAT", "pretty"),
        ])
        .unwrap();
        assert_eq!(config.runner.max_claim_attempts, 8);
        assert_eq!(config.runner.stale_claim_after, Some(Duration::from_secs(900)));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        assert_eq!(
            config(&[("USE_PERSISTENT_STORES", "true")]),
            Err(ConfigError::MissingDatabaseUrl)
        );
        let config = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/applyflow"),
        ])
        .unwrap();
        assert_eq!(
            config.persistence,
            Persistence::Postgres {
                database_url: "postgres://localhost/applyflow".to_string()
            }
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(
            config(&[("BATCH_MAX_CLAIM_ATTEMPTS", "many")]),
            Err(ConfigError::Invalid {
                name: "BATCH_MAX_CLAIM_ATTEMPTS",
                value: "many".to_string()
            })
        );
        assert!(config(&[("BIND_ADDR", "nowhere")]).is_err());
    }
}
