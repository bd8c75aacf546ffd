//! Agent configuration: which values to monitor and how often.
//!
//! Loaded from a JSON file ($XDG_CONFIG_HOME/serverinfo/config.json unless a
//! path is given), then adjusted by environment variables:
//! - `SERVERINFO_PORT`: listen port (default 3000)
//! - `SERVERINFO_STORE`: SQLite file used to persist history and baselines

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;

use crate::types::MetricKind;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{kind} value '{id}' is missing param '{param}'")]
    MissingParam {
        kind: &'static str,
        id: String,
        param: &'static str,
    },
    #[error("duplicate monitored value id '{0}'")]
    DuplicateId(String),
    #[error("monitored value '{0}' has a zero interval")]
    ZeroInterval(String),
}

/// One configured version check: a display name and a shell command whose
/// trimmed stdout is the version string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SoftwareCheck {
    pub name: String,
    pub cmd: String,
}

/// Kind-specific parameters of a monitored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricParams {
    Cpu,
    Ram,
    Disk { path: PathBuf },
    Network { interface: String },
    Container,
    Software { instructions: Vec<SoftwareCheck> },
    Uptime,
}

impl MetricParams {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricParams::Cpu => MetricKind::Cpu,
            MetricParams::Ram => MetricKind::Ram,
            MetricParams::Disk { .. } => MetricKind::Disk,
            MetricParams::Network { .. } => MetricKind::Network,
            MetricParams::Container => MetricKind::Container,
            MetricParams::Software { .. } => MetricKind::Software,
            MetricParams::Uptime => MetricKind::Uptime,
        }
    }
}

/// Immutable description of one monitored target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDefinition {
    pub id: String,
    pub interval: Duration,
    pub params: MetricParams,
}

impl MetricDefinition {
    pub fn new(id: impl Into<String>, params: MetricParams) -> Self {
        let interval = default_interval(params.kind());
        Self {
            id: id.into(),
            interval,
            params,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.params.kind()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

pub fn default_interval(kind: MetricKind) -> Duration {
    let ms = match kind {
        MetricKind::Cpu => 5_000,
        MetricKind::Ram => 10_000,
        MetricKind::Disk => 45_000,
        MetricKind::Network => 15_000,
        MetricKind::Container => 30_000,
        MetricKind::Software => 60_000,
        MetricKind::Uptime => 60_000,
    };
    Duration::from_millis(ms)
}

#[derive(Debug, Default, Deserialize)]
struct RawParams {
    interface: Option<String>,
    path: Option<PathBuf>,
    #[serde(default)]
    instructions: Vec<SoftwareCheck>,
}

#[derive(Debug, Deserialize)]
struct RawMonitoredValue {
    #[serde(rename = "type")]
    kind: MetricKind,
    id: Option<String>,
    /// Milliseconds.
    interval: Option<u64>,
    #[serde(default)]
    params: RawParams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    port: Option<u16>,
    store: Option<PathBuf>,
    command_timeout_ms: Option<u64>,
    monitored_values: Option<Vec<RawMonitoredValue>>,
}

impl RawMonitoredValue {
    fn into_definition(self) -> Result<MetricDefinition, ConfigError> {
        let kind = self.kind;
        let RawParams {
            interface,
            path,
            instructions,
        } = self.params;
        let missing = |id: &str, param| ConfigError::MissingParam {
            kind: kind.as_str(),
            id: id.to_string(),
            param,
        };

        let (default_id, params) = match kind {
            MetricKind::Cpu => ("cpu".to_string(), MetricParams::Cpu),
            MetricKind::Ram => ("ram".to_string(), MetricParams::Ram),
            MetricKind::Disk => {
                let path =
                    path.ok_or_else(|| missing(self.id.as_deref().unwrap_or("disk"), "path"))?;
                (path.display().to_string(), MetricParams::Disk { path })
            }
            MetricKind::Network => {
                let interface = interface
                    .ok_or_else(|| missing(self.id.as_deref().unwrap_or("network"), "interface"))?;
                (interface.clone(), MetricParams::Network { interface })
            }
            MetricKind::Container => ("container".to_string(), MetricParams::Container),
            MetricKind::Software => {
                ("software".to_string(), MetricParams::Software { instructions })
            }
            MetricKind::Uptime => ("uptime".to_string(), MetricParams::Uptime),
        };

        let id = self.id.unwrap_or(default_id);
        let interval = match self.interval {
            Some(0) => return Err(ConfigError::ZeroInterval(id)),
            Some(ms) => Duration::from_millis(ms),
            None => default_interval(kind),
        };
        Ok(MetricDefinition {
            id,
            interval,
            params,
        })
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// SQLite file for persisted history; `None` keeps everything in memory.
    pub store: Option<PathBuf>,
    pub command_timeout: Duration,
    pub monitored: Vec<MetricDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            store: None,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            monitored: default_monitored(),
        }
    }
}

fn default_monitored() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new("cpu", MetricParams::Cpu),
        MetricDefinition::new("ram", MetricParams::Ram),
        MetricDefinition::new(
            "/",
            MetricParams::Disk {
                path: PathBuf::from("/"),
            },
        ),
        MetricDefinition::new("uptime", MetricParams::Uptime),
    ]
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("serverinfo")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("serverinfo")
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

impl Config {
    /// Parse a JSON document. Fields left out fall back to defaults.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(s)?;
        let mut cfg = Config::default();
        if let Some(port) = raw.port {
            cfg.port = port;
        }
        cfg.store = raw.store;
        if let Some(ms) = raw.command_timeout_ms {
            cfg.command_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(values) = raw.monitored_values {
            cfg.monitored = values
                .into_iter()
                .map(RawMonitoredValue::into_definition)
                .collect::<Result<_, _>>()?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `path`, or from the default location when `None`. A missing
    /// default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let p = default_config_path();
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    Config::default()
                }
            }
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&s)
    }

    fn apply_env(&mut self) {
        if let Ok(port) = env::var("SERVERINFO_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(store) = env::var("SERVERINFO_STORE") {
            if !store.is_empty() {
                self.store = Some(PathBuf::from(store));
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for def in &self.monitored {
            if !seen.insert(def.id.as_str()) {
                return Err(ConfigError::DuplicateId(def.id.clone()));
            }
        }
        Ok(())
    }

    /// Interfaces whose traffic baselines are rotated hourly and daily.
    pub fn monitored_interfaces(&self) -> Vec<String> {
        self.monitored
            .iter()
            .filter_map(|d| match &d.params {
                MetricParams::Network { interface } => Some(interface.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 3000);
        assert!(cfg.store.is_none());
        let kinds: Vec<_> = cfg.monitored.iter().map(|d| d.kind()).collect();
        assert_eq!(
            kinds,
            vec![MetricKind::Cpu, MetricKind::Ram, MetricKind::Disk, MetricKind::Uptime]
        );
    }

    #[test]
    fn parses_monitored_values_with_defaults() {
        let cfg = Config::from_json(
            r#"{
                "port": 8080,
                "store": "/tmp/si.db",
                "monitoredValues": [
                    {"type": "cpu"},
                    {"type": "network", "interval": 1000, "params": {"interface": "eth0"}},
                    {"type": "disk", "id": "root", "params": {"path": "/"}},
                    {"type": "software", "params": {
                        "instructions": [{"name": "sh", "cmd": "echo 1"}]
                    }}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.store.as_deref(), Some(Path::new("/tmp/si.db")));
        assert_eq!(cfg.monitored.len(), 4);
        assert_eq!(cfg.monitored[0].id, "cpu");
        assert_eq!(cfg.monitored[0].interval, Duration::from_secs(5));
        assert_eq!(cfg.monitored[1].id, "eth0");
        assert_eq!(cfg.monitored[1].interval, Duration::from_secs(1));
        assert_eq!(cfg.monitored[2].id, "root");
        match &cfg.monitored[3].params {
            MetricParams::Software { instructions } => assert_eq!(instructions[0].cmd, "echo 1"),
            other => panic!("unexpected params {other:?}"),
        }
        assert_eq!(cfg.monitored_interfaces(), vec!["eth0".to_string()]);
    }

    #[test]
    fn rejects_missing_params_and_duplicates() {
        let err = Config::from_json(r#"{"monitoredValues":[{"type":"network"}]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParam { param: "interface", .. }));

        let err = Config::from_json(r#"{"monitoredValues":[{"type":"cpu"},{"type":"cpu"}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateId(id) if id == "cpu"));

        let err = Config::from_json(r#"{"monitoredValues":[{"type":"ram","interval":0}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInterval(_)));
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Config::from_json(r#"{"monitoredValues":[{"type":"gpu"}]}"#).is_err());
    }
}
