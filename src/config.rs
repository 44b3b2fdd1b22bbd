//! Runtime configuration, read from `RENTWELL_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding `reservations.wal`.
    pub data_dir: PathBuf,
    /// Longest a reservation attempt waits for its asset's lock.
    pub lock_timeout: Duration,
    /// Compact the WAL once this many appends have accumulated.
    pub compact_threshold: u64,
    /// Period of the completion sweeper and the compaction check.
    pub sweep_interval: Duration,
    /// Prometheus listener port; `None` disables the exporter.
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| parse_trimmed::<u64>(&s));
        Self {
            data_dir: lookup("RENTWELL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: parsed("RENTWELL_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            compact_threshold: parsed("RENTWELL_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            sweep_interval: parsed("RENTWELL_SWEEP_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            metrics_port: lookup("RENTWELL_METRICS_PORT").and_then(|s| parse_trimmed(&s)),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse_trimmed<T: FromStr>(s: &str) -> Option<T> {
    s.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(from_pairs(&[]), Config::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = from_pairs(&[
            ("RENTWELL_DATA_DIR", "/var/lib/rentwell"),
            ("RENTWELL_LOCK_TIMEOUT_MS", "250"),
            ("RENTWELL_COMPACT_THRESHOLD", " 10 "),
            ("RENTWELL_SWEEP_INTERVAL_MS", "1000"),
            ("RENTWELL_METRICS_PORT", "9100"),
        ]);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/rentwell"));
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.compact_threshold, 10);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(1));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/rentwell/reservations.wal"));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = from_pairs(&[
            ("RENTWELL_LOCK_TIMEOUT_MS", "soon"),
            ("RENTWELL_SWEEP_INTERVAL_MS", "0"),
            ("RENTWELL_METRICS_PORT", "99999"),
        ]);
        let defaults = Config::default();
        assert_eq!(cfg.lock_timeout, defaults.lock_timeout);
        assert_eq!(cfg.sweep_interval, defaults.sweep_interval);
        assert_eq!(cfg.metrics_port, None);
    }
}
