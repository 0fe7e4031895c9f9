use crate::reconnect::Backoff;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    io,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Tunables for one session driver. All durations are in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub poll_interval_ms: u64,
    pub poll_jitter_ms: u64,
    /// `None` keeps pending updates until their initiator resolves them.
    pub pending_timeout_ms: Option<u64>,
    pub sweep_interval_ms: u64,
    pub action_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter: bool,
    /// `None` retries until the driver is stopped.
    pub max_reconnect_attempts: Option<u32>,
    /// Consecutive failed polls before the session is treated as disconnected.
    pub failure_threshold: Option<u32>,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            poll_jitter_ms: 0,
            pending_timeout_ms: Some(30_000),
            sweep_interval_ms: 1_000,
            action_timeout_ms: 10_000,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 16_000,
            backoff_jitter: false,
            max_reconnect_attempts: None,
            failure_threshold: Some(3),
            probe_interval_ms: 5_000,
            probe_timeout_ms: 2_000,
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be positive"));
        }
        if self.action_timeout_ms == 0 {
            return Err(ConfigError::Invalid("action_timeout_ms must be positive"));
        }
        if self.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid("backoff_base_ms must be positive"));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "backoff_cap_ms must not be below backoff_base_ms",
            ));
        }
        if self.pending_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("pending_timeout_ms must be positive"));
        }
        if self.max_reconnect_attempts == Some(0) {
            return Err(ConfigError::Invalid("max_reconnect_attempts must be positive"));
        }
        if self.failure_threshold == Some(0) {
            return Err(ConfigError::Invalid("failure_threshold must be positive"));
        }
        if self.probe_interval_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe timings must be positive"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }

    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
        .with_jitter(self.backoff_jitter)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn from_json__partial_document__fills_defaults() {
        // given
        let raw = r#"{ "poll_interval_ms": 500, "pending_timeout_ms": null }"#;

        // when
        let config = SessionConfig::from_json(raw).unwrap();

        // then
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.pending_timeout(), None);
        assert_eq!(config.backoff_cap_ms, 16_000);
        assert_eq!(config.failure_threshold, Some(3));
    }

    #[test]
    fn from_json__zero_poll_interval__is_rejected() {
        // given
        let raw = r#"{ "poll_interval_ms": 0 }"#;

        // when
        let result = SessionConfig::from_json(raw);

        // then
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_json__unknown_field__is_rejected() {
        // given
        let raw = r#"{ "poll_every": 10 }"#;

        // when
        let result = SessionConfig::from_json(raw);

        // then
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn validate__cap_below_base__is_rejected() {
        // given
        let config = SessionConfig {
            backoff_base_ms: 5_000,
            backoff_cap_ms: 1_000,
            ..SessionConfig::default()
        };

        // when
        let result = config.validate();

        // then
        assert!(result.is_err());
    }

    #[test]
    fn load__missing_file__reports_path() {
        // given
        let path = Path::new("/definitely/not/here/session.json");

        // when
        let err = SessionConfig::load(path).unwrap_err();

        // then
        assert!(err.to_string().contains("/definitely/not/here/session.json"));
    }

    #[test]
    fn backoff__default_config__matches_standard_schedule() {
        // when
        let backoff = SessionConfig::default().backoff();

        // then
        assert_eq!(backoff, Backoff::default());
    }
}
