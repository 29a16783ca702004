//! Environment-driven configuration for the host process.
//!
//! Every setting has a default, so an empty environment yields a working engine
//! rooted at `./data`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::RetryPolicy;

/// Runtime knobs handed to [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Backoff for transient store errors on a single target.
    pub retry: RetryPolicy,
    /// Upper bound on waiting for an item's read lock in the projection.
    pub read_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            read_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub wal_file: String,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    /// Minimum age before an empty ephemeral item may be swept.
    pub ephemeral_grace: Duration,
    pub options: EngineOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "allotment.wal".into(),
            metrics_port: None,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(30),
            ephemeral_grace: Duration::from_secs(60),
            options: EngineOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `ALLOTMENT_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| parse::<u64>(&v));

        let retry = RetryPolicy {
            max_retries: parsed("ALLOTMENT_RETRY_MAX")
                .map_or(defaults.options.retry.max_retries, |n| n as usize),
            initial_delay: parsed("ALLOTMENT_RETRY_INITIAL_MS")
                .map_or(defaults.options.retry.initial_delay, Duration::from_millis),
            ..defaults.options.retry
        };

        Self {
            data_dir: lookup("ALLOTMENT_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            wal_file: lookup("ALLOTMENT_WAL_FILE").unwrap_or(defaults.wal_file),
            metrics_port: lookup("ALLOTMENT_METRICS_PORT").and_then(|v| parse(&v)),
            compact_threshold: parsed("ALLOTMENT_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            sweep_interval: parsed("ALLOTMENT_SWEEP_INTERVAL_SECS")
                .map_or(defaults.sweep_interval, Duration::from_secs),
            ephemeral_grace: parsed("ALLOTMENT_EPHEMERAL_GRACE_SECS")
                .map_or(defaults.ephemeral_grace, Duration::from_secs),
            options: EngineOptions {
                retry,
                read_timeout: parsed("ALLOTMENT_READ_TIMEOUT_MS")
                    .map_or(defaults.options.read_timeout, Duration::from_millis),
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }
}

fn parse<T: FromStr>(raw: &str) -> Option<T> {
    let value = raw.trim().parse().ok();
    if value.is_none() {
        tracing::warn!("ignoring unparseable config value {raw:?}");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/allotment.wal"));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.options.retry.max_retries, 3);
        assert_eq!(cfg.options.read_timeout, Duration::from_secs(2));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("ALLOTMENT_DATA_DIR", "/var/lib/allotment"),
            ("ALLOTMENT_METRICS_PORT", "9100"),
            ("ALLOTMENT_RETRY_MAX", "5"),
            ("ALLOTMENT_RETRY_INITIAL_MS", "25"),
            ("ALLOTMENT_EPHEMERAL_GRACE_SECS", "5"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/allotment"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.options.retry.max_retries, 5);
        assert_eq!(cfg.options.retry.initial_delay, Duration::from_millis(25));
        assert_eq!(cfg.ephemeral_grace, Duration::from_secs(5));
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("ALLOTMENT_COMPACT_THRESHOLD", "lots"),
            ("ALLOTMENT_METRICS_PORT", "99999"),
        ]));
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
    }
}
