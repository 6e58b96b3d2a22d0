use std::fmt;
use std::path::PathBuf;

use crate::engine::{BlockingPolicy, BlockingSet};

/// Runtime settings, read once from `FLEETBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub policy: BlockingPolicy,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "{var}={value:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            policy: BlockingPolicy::default(),
        }
    }
}

fn parse<T: std::str::FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let metrics_port = match get("FLEETBOOK_METRICS_PORT") {
            Some(raw) => Some(parse("FLEETBOOK_METRICS_PORT", Some(raw), 0u16)?),
            None => None,
        };
        let policy = BlockingPolicy {
            creation: parse::<BlockingSet>(
                "FLEETBOOK_CREATION_BLOCKING",
                get("FLEETBOOK_CREATION_BLOCKING"),
                d.policy.creation,
            )?,
            review: parse::<BlockingSet>(
                "FLEETBOOK_REVIEW_BLOCKING",
                get("FLEETBOOK_REVIEW_BLOCKING"),
                d.policy.review,
            )?,
        };
        let max_connections = parse(
            "FLEETBOOK_MAX_CONNECTIONS",
            get("FLEETBOOK_MAX_CONNECTIONS"),
            d.max_connections,
        )?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "FLEETBOOK_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            port: parse("FLEETBOOK_PORT", get("FLEETBOOK_PORT"), d.port)?,
            bind: get("FLEETBOOK_BIND").unwrap_or(d.bind),
            data_dir: get("FLEETBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            max_connections,
            compact_threshold: parse(
                "FLEETBOOK_COMPACT_THRESHOLD",
                get("FLEETBOOK_COMPACT_THRESHOLD"),
                d.compact_threshold,
            )?,
            metrics_port,
            policy,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleetbook.wal")
    }
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
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert!(cfg.metrics_port.is_none());
        assert_eq!(cfg.policy, BlockingPolicy::default());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/fleetbook.wal"));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup(&[
            ("FLEETBOOK_PORT", "6000"),
            ("FLEETBOOK_DATA_DIR", "/tmp/fb"),
            ("FLEETBOOK_METRICS_PORT", "9100"),
            ("FLEETBOOK_CREATION_BLOCKING", "pending,approved,in_progress"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/fb"));
        assert!(cfg.policy.creation.contains(crate::model::BookingStatus::Pending));
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("FLEETBOOK_REVIEW_BLOCKING", "approved,nope")]))
            .unwrap_err();
        assert!(err.to_string().contains("FLEETBOOK_REVIEW_BLOCKING"));
        assert!(Config::from_lookup(lookup(&[("FLEETBOOK_PORT", "http")])).is_err());
        assert!(Config::from_lookup(lookup(&[("FLEETBOOK_MAX_CONNECTIONS", "0")])).is_err());
    }
}
