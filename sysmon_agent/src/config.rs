//! Agent configuration: JSON file under the XDG config dir, then env, then command line.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use serde::Deserialize;
use sysmon_rrd::{parse_archives, Aggregation, RrdError};
use thiserror::Error;

use crate::probe::ProbeOptions;
use crate::serial::{CacheSettings, SystemSerial};
use crate::storage::StorageSettings;

pub const DEFAULT_PORT: u16 = 9007;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid storage settings: {0}")]
    Storage(#[from] RrdError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
    pub cache_window_ms: u64,
    pub read_timeout_ms: u64,
    pub retry_delay_secs: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/sensors/ftdi_12345".into(),
            baud: 9600,
            cache_window_ms: 1_000,
            read_timeout_ms: 5_000,
            retry_delay_secs: 10,
        }
    }
}

impl SerialConfig {
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            window: Duration::from_millis(self.cache_window_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    /// The OS device transport; each line read is bounded by `read_timeout_ms`.
    pub fn system_transport(&self) -> SystemSerial {
        SystemSerial::new(Duration::from_millis(self.read_timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub retention: Vec<String>,
    pub xff: f32,
    pub aggregation: Aggregation,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention: vec!["1s:1h".into(), "1m:6h".into(), "1h:31d".into(), "6h:2y".into()],
            xff: sysmon_rrd::DEFAULT_XFF,
            aggregation: Aggregation::Average,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKindConfig {
    CpuCores,
    CpuTotal,
    Sensor {
        key: String,
        #[serde(default)]
        device: Option<String>,
        #[serde(default)]
        baud: Option<u32>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: ProbeKindConfig,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub extent: Option<[f64; 2]>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub colors: Option<Vec<String>>,
    #[serde(default)]
    pub retention: Option<Vec<String>>,
    #[serde(default)]
    pub xff: Option<f32>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
}

fn default_min_interval_ms() -> u64 {
    500
}

impl ProbeConfig {
    pub fn new(name: impl Into<String>, kind: ProbeKindConfig) -> Self {
        Self {
            name: name.into(),
            kind,
            min_interval_ms: default_min_interval_ms(),
            label: None,
            extent: None,
            height: None,
            colors: None,
            retention: None,
            xff: None,
            aggregation: None,
        }
    }

    pub fn options(&self) -> ProbeOptions {
        let defaults = ProbeOptions::default();
        ProbeOptions {
            label: self.label.clone(),
            min_interval: Duration::from_millis(self.min_interval_ms),
            extent: self.extent.unwrap_or(defaults.extent),
            height: self.height,
            colors: self.colors.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub listen_port: u16,
    pub tick_ms: u64,
    pub data_dir: Option<PathBuf>,
    pub serial: SerialConfig,
    pub storage: StorageConfig,
    pub probes: Vec<ProbeConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_PORT,
            tick_ms: 1_000,
            data_dir: None,
            serial: SerialConfig::default(),
            storage: StorageConfig::default(),
            probes: vec![
                ProbeConfig::new("cpu", ProbeKindConfig::CpuCores),
                ProbeConfig::new("cpu_total", ProbeKindConfig::CpuTotal),
            ],
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("sysmon_agent")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sysmon_agent")
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

fn default_data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sysmon_agent")
}

impl AgentConfig {
    /// Read `path`, or the default location when `None`. Only a missing default file
    /// falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };
        let text = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if !explicit && e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        Self::from_json(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `SYSMON_AGENT_TICK_MS`, `SYSMON_AGENT_DATA_DIR`.
    pub fn apply_env(&mut self) {
        if let Some(ms) = std::env::var("SYSMON_AGENT_TICK_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.tick_ms = ms;
        }
        if let Some(dir) = std::env::var_os("SYSMON_AGENT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.listen_port = port;
        }
        if let Some(device) = &args.device {
            self.serial.device = device.clone();
        }
        if let Some(baud) = args.baud {
            self.serial.baud = baud;
        }
        if let Some(dir) = &args.data_dir {
            self.data_dir = Some(dir.clone());
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Storage defaults overridden by the probe's own settings, validated.
    pub fn storage_for(&self, probe: &ProbeConfig) -> Result<StorageSettings, ConfigError> {
        let retention = probe.retention.as_ref().unwrap_or(&self.storage.retention);
        let xff = probe.xff.unwrap_or(self.storage.xff);
        if !(0.0..=1.0).contains(&xff) {
            return Err(RrdError::InvalidXff(xff).into());
        }
        Ok(StorageSettings {
            archives: parse_archives(retention)?,
            xff,
            aggregation: probe.aggregation.unwrap_or(self.storage.aggregation),
        })
    }

    /// Everything that must hold before the sampler starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be positive".into()));
        }
        let mut seen = HashSet::new();
        for probe in &self.probes {
            let name = probe.name.as_str();
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(ConfigError::Invalid(format!("probe name '{name}' is not usable as a file name")));
            }
            if !seen.insert(name) {
                return Err(ConfigError::Invalid(format!("duplicate probe name '{name}'")));
            }
            if let ProbeKindConfig::Sensor { key, .. } = &probe.kind {
                if key.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("sensor probe '{name}' has an empty key")));
                }
            }
            self.storage_for(probe)?;
        }
        Ok(())
    }
}

/// Command-line overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub device: Option<String>,
    pub baud: Option<u32>,
    pub data_dir: Option<PathBuf>,
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--config PATH|-c PATH] [--port N|-p N] [--device PATH] [--baud N] [--data-dir PATH]"
    )
}

/// Parse `std::env::args()`-style input. `Err` carries the text to print (help or a
/// complaint about a bad flag).
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<CliArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "sysmon_agent".into());
    let mut out = CliArgs::default();

    fn value(prog: &str, flag: &str, v: Option<String>) -> Result<String, String> {
        v.filter(|s| !s.is_empty())
            .ok_or_else(|| format!("{flag} needs a value\n{}", usage(prog)))
    }
    fn number<T: std::str::FromStr>(prog: &str, flag: &str, v: String) -> Result<T, String> {
        v.parse()
            .map_err(|_| format!("invalid value '{v}' for {flag}\n{}", usage(prog)))
    }

    while let Some(arg) = it.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        match flag.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--config" | "-c" => {
                out.config = Some(PathBuf::from(value(&prog, &flag, inline.or_else(|| it.next()))?));
            }
            "--port" | "-p" => {
                let v = value(&prog, &flag, inline.or_else(|| it.next()))?;
                out.port = Some(number(&prog, &flag, v)?);
            }
            "--device" => out.device = Some(value(&prog, &flag, inline.or_else(|| it.next()))?),
            "--baud" => {
                let v = value(&prog, &flag, inline.or_else(|| it.next()))?;
                out.baud = Some(number(&prog, &flag, v)?);
            }
            "--data-dir" => {
                out.data_dir = Some(PathBuf::from(value(&prog, &flag, inline.or_else(|| it.next()))?));
            }
            _ => return Err(format!("Unexpected argument '{arg}'. {}", usage(&prog))),
        }
    }
    Ok(out)
}
