use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub counters: CountersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorsConfig {
    #[serde(default)]
    pub backend: SensorBackend,
    #[serde(default = "default_hwmon_root")]
    pub hwmon_root: String,
    #[serde(default = "default_nvidia_smi")]
    pub nvidia_smi: bool,
    #[serde(default = "default_gpu_name_marker")]
    pub gpu_name_marker: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CountersConfig {
    #[serde(default = "default_diskstats_path")]
    pub diskstats_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackend {
    #[default]
    Auto,
    Hwmon,
    Wmi,
}

impl SensorBackend {
    pub fn resolve(self) -> SensorBackend {
        match self {
            SensorBackend::Auto if cfg!(target_os = "windows") => SensorBackend::Wmi,
            SensorBackend::Auto => SensorBackend::Hwmon,
            other => other,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            sensors: SensorsConfig::default(),
            counters: CountersConfig::default(),
        }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackend::default(),
            hwmon_root: default_hwmon_root(),
            nvidia_smi: default_nvidia_smi(),
            gpu_name_marker: default_gpu_name_marker(),
        }
    }
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            diskstats_path: default_diskstats_path(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port socket address".to_string(),
            ));
        }
        if self.sensors.gpu_name_marker.is_empty() {
            return Err(ConfigError::Validation(
                "sensors.gpu_name_marker must not be empty".to_string(),
            ));
        }
        if self.sensors.backend.resolve() == SensorBackend::Hwmon
            && self.sensors.hwmon_root.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "sensors.hwmon_root must not be empty".to_string(),
            ));
        }
        if self.counters.diskstats_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "counters.diskstats_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_hwmon_root() -> String {
    "/sys/class/hwmon".to_string()
}

const fn default_nvidia_smi() -> bool {
    true
}

fn default_gpu_name_marker() -> String {
    "GPU".to_string()
}

fn default_diskstats_path() -> String {
    "/proc/diskstats".to_string()
}
