use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Server configuration loaded from environment variables.
///
/// | Env var                               | Default     |
/// |---------------------------------------|-------------|
/// | `STAYLEDGER_BIND`                     | `0.0.0.0`   |
/// | `STAYLEDGER_PORT`                     | `8080`      |
/// | `STAYLEDGER_DATA_DIR`                 | `./data`    |
/// | `STAYLEDGER_METRICS_PORT`             | unset (off) |
/// | `STAYLEDGER_COMPACT_THRESHOLD`        | `1000`      |
/// | `STAYLEDGER_STORAGE_TIMEOUT_MS`       | `2000`      |
/// | `STAYLEDGER_MAX_ATTEMPTS`             | `3`         |
/// | `STAYLEDGER_REQUEST_TIMEOUT_SECS`     | `30`        |
/// | `STAYLEDGER_RECONCILE_INTERVAL_SECS`  | `300`       |
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub storage_timeout: Duration,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            storage_timeout: Duration::from_millis(2000),
            max_attempts: 3,
            request_timeout: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Absent or empty values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let d = Config::default();

        let max_attempts: u32 = parse(&get, "STAYLEDGER_MAX_ATTEMPTS", "a positive integer")?
            .unwrap_or(d.max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "STAYLEDGER_MAX_ATTEMPTS",
                value: "0".into(),
                expected: "a positive integer",
            });
        }

        Ok(Self {
            bind: parse(&get, "STAYLEDGER_BIND", "an IP address")?.unwrap_or(d.bind),
            port: parse(&get, "STAYLEDGER_PORT", "a port number")?.unwrap_or(d.port),
            data_dir: get("STAYLEDGER_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            metrics_port: parse(&get, "STAYLEDGER_METRICS_PORT", "a port number")?,
            compact_threshold: parse(&get, "STAYLEDGER_COMPACT_THRESHOLD", "an integer")?
                .unwrap_or(d.compact_threshold),
            storage_timeout: parse(&get, "STAYLEDGER_STORAGE_TIMEOUT_MS", "milliseconds")?
                .map(Duration::from_millis)
                .unwrap_or(d.storage_timeout),
            max_attempts,
            request_timeout: parse(&get, "STAYLEDGER_REQUEST_TIMEOUT_SECS", "seconds")?
                .map(Duration::from_secs)
                .unwrap_or(d.request_timeout),
            reconcile_interval: parse(&get, "STAYLEDGER_RECONCILE_INTERVAL_SECS", "seconds")?
                .map(Duration::from_secs)
                .unwrap_or(d.reconcile_interval),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("stayledger.wal")
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            storage_timeout: self.storage_timeout,
            max_attempts: self.max_attempts,
        }
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(var)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                var,
                value,
                expected,
            })
        })
        .transpose()
}
