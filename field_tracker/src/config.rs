use std::{num::NonZeroU32, path::Path, time::Duration};

use serde::{Deserialize, Deserializer};

use crate::{
    backoff::BackoffConfig,
    error::{Result, TrackerError},
    sampler::SamplerOptions,
};

/// Tracker settings, read from a JSON file. Missing keys keep their defaults.
///
/// ```json
/// {
///   "server_url": "https://trips.example.com",
///   "user_id": 7,
///   "token": "...",
///   "checkpoint_every": 2,
///   "sampler": { "min_interval_secs": 5, "min_distance_m": 10.0 },
///   "backoff": { "initial_ms": 500, "max_ms": 30000 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Base URL of the trip server, e.g. `http://localhost:8080`.
    pub server_url: String,
    pub user_id: i64,
    pub token: String,

    pub sampler: SamplerOptions,
    /// Every Nth delivered sample is persisted as a checkpoint.
    pub checkpoint_every: NonZeroU32,
    pub outbox_capacity: usize,
    pub backoff: BackoffConfig,

    pub gpsd_host: String,
    pub gpsd_port: u16,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            user_id: 0,
            token: String::new(),
            sampler: SamplerOptions::default(),
            checkpoint_every: NonZeroU32::new(2).unwrap_or(NonZeroU32::MIN),
            outbox_capacity: 256,
            backoff: BackoffConfig::default(),
            gpsd_host: "localhost".to_string(),
            gpsd_port: 2947,
        }
    }
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(contents)
            .map_err(|e| TrackerError::Config(format!("Failed to parse config file: {}", e)))?;
        config.server_url = config.server_url.trim_end_matches('/').to_string();

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(TrackerError::Config(format!("server_url must be http(s): {}", self.server_url)));
        }
        if self.outbox_capacity == 0 {
            return Err(TrackerError::Config("outbox_capacity must be positive".to_string()));
        }
        if self.backoff.initial.is_zero() || self.backoff.initial > self.backoff.max {
            return Err(TrackerError::Config("backoff.initial_ms must be positive and at most backoff.max_ms".to_string()));
        }
        Ok(())
    }

    /// The tracking socket endpoint, `ws(s)://.../tracking`.
    pub fn tracking_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let base = match base.strip_prefix("https://") {
            Some(rest) => format!("wss://{}", rest),
            None => format!("ws://{}", base.strip_prefix("http://").unwrap_or(base)),
        };
        format!("{}/tracking", base)
    }
}

pub(crate) fn secs<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

pub(crate) fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_json_over_defaults() {
        let config = TrackerConfig::from_json(
            r#"{
                "server_url": "https://trips.example.com/",
                "user_id": 7,
                "token": "abc=def",
                "checkpoint_every": 3,
                "sampler": { "min_distance_m": 25.5 },
                "backoff": { "max_ms": 10000 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.server_url, "https://trips.example.com");
        assert_eq!(config.user_id, 7);
        assert_eq!(config.token, "abc=def");
        assert_eq!(config.checkpoint_every.get(), 3);
        assert_eq!(config.sampler.min_distance_m, 25.5);
        assert_eq!(config.sampler.min_interval, Duration::from_secs(5));
        assert_eq!(config.backoff.initial, Duration::from_millis(500));
        assert_eq!(config.backoff.max, Duration::from_secs(10));
        assert_eq!(config.gpsd_port, 2947);
        assert_eq!(config.tracking_url(), "wss://trips.example.com/tracking");
    }

    #[test]
    fn rejects_bad_values() {
        for contents in [
            r#"{ "checkpoint_every": 0 }"#,
            r#"{ "user_id": "seven" }"#,
            "server_url = http://localhost",
            r#"{ "server_url": "ftp://x" }"#,
            r#"{ "backoff": { "initial_ms": 0 } }"#,
        ] {
            assert!(matches!(TrackerConfig::from_json(contents), Err(TrackerError::Config(_))), "{}", contents);
        }
    }

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(TrackerConfig::from_json("{}").unwrap(), TrackerConfig::default());
    }

    #[test]
    fn default_thresholds() {
        let config = TrackerConfig::default();
        assert_eq!(config.checkpoint_every.get(), 2);
        assert_eq!(config.sampler.min_interval, Duration::from_secs(5));
        assert_eq!(config.sampler.min_distance_m, 10.0);
        assert_eq!(config.tracking_url(), "ws://localhost:8080/tracking");
    }
}
