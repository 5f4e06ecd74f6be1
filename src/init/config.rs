use crate::drain::TransportKind;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse config file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("unable to resolve system hostname: {0}")]
    Hostname(#[source] std::io::Error),
}

/// Top-level daemon configuration, loaded from a YAML file. Sections are
/// optional; validation requires that the file describes at least one
/// worker to run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub syslog: Option<SyslogConfig>,

    #[serde(default)]
    pub expvar: Option<ExpvarConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyslogConfig {
    pub destination: Destination,

    /// Explicit files to follow, each under a fixed tag.
    #[serde(default)]
    pub sources: Vec<SyslogSource>,

    /// Watched roots. Each immediate subdirectory names a tag and its
    /// files are discovered on the refresh interval.
    #[serde(default)]
    pub source_dirs: Vec<PathBuf>,

    /// Filename suffix filter applied inside watched roots, e.g. ".log".
    #[serde(default)]
    pub suffix: Option<String>,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl SyslogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Destination {
    pub transport: TransportKind,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyslogSource {
    pub path: PathBuf,
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpvarConfig {
    #[serde(default = "default_emit_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub datadog: DatadogConfig,

    #[serde(default)]
    pub sources: Vec<ExpvarSource>,
}

impl ExpvarConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatadogConfig {
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpvarSource {
    pub name: String,
    pub url: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_refresh_interval_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_emit_interval_secs() -> u64 {
    10
}

impl Config {
    pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Config::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Config, ConfigError> {
        let config: Config =
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Hostname stamped on every syslog packet and metric series: the
    /// config value when present, the system hostname otherwise.
    pub fn hostname(&self) -> Result<String, ConfigError> {
        match self.hostname.as_deref() {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => system_hostname(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let tails_files = self.syslog.is_some();
        let emits_metrics = self
            .expvar
            .as_ref()
            .is_some_and(|expvar| !expvar.sources.is_empty());
        if !tails_files && !emits_metrics {
            return Err(ConfigError::Invalid(
                "nothing to run; add a syslog or expvar section".to_string(),
            ));
        }

        if let Some(syslog) = &self.syslog {
            if syslog.destination.address.is_empty() {
                return Err(ConfigError::Invalid(
                    "syslog destination address is empty".to_string(),
                ));
            }
            if syslog.sources.is_empty() && syslog.source_dirs.is_empty() {
                return Err(ConfigError::Invalid(
                    "syslog section names no sources or source_dirs".to_string(),
                ));
            }
        }

        if let Some(expvar) = &self.expvar {
            if !expvar.sources.is_empty() && expvar.datadog.api_key.is_empty() {
                return Err(ConfigError::Invalid(
                    "expvar sources are configured without a datadog api_key".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn system_hostname() -> Result<String, ConfigError> {
    let name = hostname::get().map_err(ConfigError::Hostname)?;
    name.into_string()
        .map_err(|_| ConfigError::Invalid("system hostname is not valid UTF-8".to_string()))
}
