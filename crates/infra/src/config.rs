//! Pipeline configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::queue::{QueueConfig, RedrivePolicy};
use crate::workers::{GeneratorConfig, WatcherConfig};

/// Signing key used when `JWT_SECRET` is unset. Development only.
pub const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var}: must be at least {min}")]
    TooSmall { var: &'static str, min: u64 },
}

/// Every tunable of the running pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub bind_addr: SocketAddr,
    pub visibility_timeout: Duration,
    /// `0` disables the redrive policy.
    pub max_receive_count: u32,
    pub generator_workers: usize,
    pub generator_poll_interval: Duration,
    pub watcher_poll_interval: Duration,
    pub watcher_batch_size: usize,
    pub liveness_window: Duration,
    pub health_timeout: Duration,
    pub require_auth: bool,
    /// `None` when `JWT_SECRET` is unset.
    pub jwt_secret: Option<String>,
    pub session_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 5,
            generator_workers: 2,
            generator_poll_interval: Duration::from_millis(100),
            watcher_poll_interval: Duration::from_millis(250),
            watcher_batch_size: 100,
            liveness_window: Duration::from_secs(5),
            health_timeout: Duration::from_millis(1000),
            require_auth: false,
            jwt_secret: None,
            session_ttl: Duration::from_secs(3600),
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through an arbitrary variable lookup; unset variables keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let get = |var: &'static str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cfg = Self {
            bind_addr: parse_or(get("AIC_BIND_ADDR"), "AIC_BIND_ADDR", d.bind_addr)?,
            visibility_timeout: Duration::from_secs(parse_or(
                get("AIC_VISIBILITY_TIMEOUT_SECS"),
                "AIC_VISIBILITY_TIMEOUT_SECS",
                d.visibility_timeout.as_secs(),
            )?),
            max_receive_count: parse_or(
                get("AIC_MAX_RECEIVE_COUNT"),
                "AIC_MAX_RECEIVE_COUNT",
                d.max_receive_count,
            )?,
            generator_workers: at_least(
                "AIC_GENERATOR_WORKERS",
                parse_or(get("AIC_GENERATOR_WORKERS"), "AIC_GENERATOR_WORKERS", d.generator_workers)?,
                1,
            )?,
            generator_poll_interval: Duration::from_millis(parse_or(
                get("AIC_GENERATOR_POLL_MS"),
                "AIC_GENERATOR_POLL_MS",
                d.generator_poll_interval.as_millis() as u64,
            )?),
            watcher_poll_interval: Duration::from_millis(parse_or(
                get("AIC_WATCHER_POLL_MS"),
                "AIC_WATCHER_POLL_MS",
                d.watcher_poll_interval.as_millis() as u64,
            )?),
            watcher_batch_size: at_least(
                "AIC_WATCHER_BATCH_SIZE",
                parse_or(get("AIC_WATCHER_BATCH_SIZE"), "AIC_WATCHER_BATCH_SIZE", d.watcher_batch_size)?,
                1,
            )?,
            liveness_window: Duration::from_secs(parse_or(
                get("AIC_LIVENESS_WINDOW_SECS"),
                "AIC_LIVENESS_WINDOW_SECS",
                d.liveness_window.as_secs(),
            )?),
            health_timeout: Duration::from_millis(parse_or(
                get("AIC_HEALTH_TIMEOUT_MS"),
                "AIC_HEALTH_TIMEOUT_MS",
                d.health_timeout.as_millis() as u64,
            )?),
            require_auth: parse_bool(get("AIC_REQUIRE_AUTH"), "AIC_REQUIRE_AUTH", d.require_auth)?,
            jwt_secret: get("JWT_SECRET"),
            session_ttl: Duration::from_secs(parse_or(
                get("AIC_SESSION_TTL_SECS"),
                "AIC_SESSION_TTL_SECS",
                d.session_ttl.as_secs(),
            )?),
        };
        Ok(cfg)
    }

    pub fn queue_config(&self) -> QueueConfig {
        let cfg = QueueConfig::default().with_visibility_timeout(self.visibility_timeout);
        match self.max_receive_count {
            0 => cfg.without_redrive(),
            n => cfg.with_redrive(RedrivePolicy::new(n)),
        }
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig::default()
            .with_poll_interval(self.generator_poll_interval)
            .with_max_attempts(Some(self.max_receive_count))
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig::default()
            .with_poll_interval(self.watcher_poll_interval)
            .with_batch_size(self.watcher_batch_size)
    }

    /// Configured secret, or the development default.
    pub fn jwt_secret_or_default(&self) -> &str {
        self.jwt_secret.as_deref().unwrap_or(DEV_JWT_SECRET)
    }
}

fn parse_or<T>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool(raw: Option<String>, var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::Invalid {
            var,
            value: raw.unwrap_or_default(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn at_least(var: &'static str, value: usize, min: usize) -> Result<usize, ConfigError> {
    if value < min {
        return Err(ConfigError::TooSmall {
            var,
            min: min as u64,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.queue_config().visibility_timeout, Duration::from_secs(30));
        assert_eq!(cfg.queue_config().redrive, Some(RedrivePolicy::new(5)));
        assert_eq!(cfg.jwt_secret_or_default(), DEV_JWT_SECRET);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("AIC_BIND_ADDR", "127.0.0.1:9000"),
            ("AIC_VISIBILITY_TIMEOUT_SECS", "10"),
            ("AIC_MAX_RECEIVE_COUNT", "0"),
            ("AIC_GENERATOR_WORKERS", "4"),
            ("AIC_REQUIRE_AUTH", "TRUE"),
            ("JWT_SECRET", "s3cret"),
        ])
        .unwrap();

        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.visibility_timeout, Duration::from_secs(10));
        assert_eq!(cfg.queue_config().redrive, None);
        assert_eq!(cfg.generator_config().max_attempts, None);
        assert_eq!(cfg.generator_workers, 4);
        assert!(cfg.require_auth);
        assert_eq!(cfg.jwt_secret_or_default(), "s3cret");
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = load(&[("AIC_VISIBILITY_TIMEOUT_SECS", "thirty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "AIC_VISIBILITY_TIMEOUT_SECS", .. }));

        let err = load(&[("AIC_REQUIRE_AUTH", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "AIC_REQUIRE_AUTH", .. }));

        let err = load(&[("AIC_GENERATOR_WORKERS", "0")]).unwrap_err();
        assert_eq!(err, ConfigError::TooSmall { var: "AIC_GENERATOR_WORKERS", min: 1 });
    }
}
