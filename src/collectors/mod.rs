pub mod hwmon;
pub mod nvidia;
pub mod system;
pub mod wmi;

use crate::config::{SensorBackend, SensorsConfig};
use crate::state::{DiskCounters, NetCounters};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sensor source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("command {command} failed: {reason}")]
    Command { command: String, reason: String },
    #[error("failed to parse {what}: {input}")]
    Parse { what: &'static str, input: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCategory {
    Cpu,
    GpuNvidia,
    GpuAmd,
    Other,
}

impl DeviceCategory {
    pub fn is_gpu(self) -> bool {
        matches!(self, DeviceCategory::GpuNvidia | DeviceCategory::GpuAmd)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub category: DeviceCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Temperature,
    Load,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub name: String,
    pub kind: SensorKind,
    /// `None` when the driver reports the sensor but has no current value.
    pub value: Option<f64>,
}

impl Sensor {
    pub fn new(name: impl Into<String>, kind: SensorKind, value: Option<f64>) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
        }
    }
}

/// A hardware monitoring device tree, opened once and polled per pass.
pub trait SensorSource: Send {
    fn backend(&self) -> &'static str;

    fn devices(&self) -> &[Device];

    /// Refreshes one device and returns its current sensor list.
    fn read_sensors(&mut self, device: &Device) -> Result<Vec<Sensor>, SourceError>;
}

/// Cumulative OS counters plus instantaneous CPU and memory percentages.
pub trait CounterSource: Send {
    fn disk_io(&mut self) -> Result<DiskCounters, SourceError>;

    fn net_io(&mut self) -> Result<NetCounters, SourceError>;

    /// Blocks for `window` while sampling.
    fn cpu_percent(&mut self, window: Duration) -> f64;

    fn memory_percent(&mut self) -> f64;
}

/// Sensor sources chained into one device tree, devices kept in source order.
pub struct CompositeSource {
    sources: Vec<Box<dyn SensorSource>>,
    devices: Vec<Device>,
    owners: Vec<usize>,
}

impl CompositeSource {
    pub fn new(sources: Vec<Box<dyn SensorSource>>) -> Self {
        let mut devices = Vec::new();
        let mut owners = Vec::new();
        for (idx, source) in sources.iter().enumerate() {
            for device in source.devices() {
                devices.push(device.clone());
                owners.push(idx);
            }
        }
        Self {
            sources,
            devices,
            owners,
        }
    }
}

impl SensorSource for CompositeSource {
    fn backend(&self) -> &'static str {
        match self.sources.first() {
            Some(source) => source.backend(),
            None => "none",
        }
    }

    fn devices(&self) -> &[Device] {
        &self.devices
    }

    fn read_sensors(&mut self, device: &Device) -> Result<Vec<Sensor>, SourceError> {
        let Some(pos) = self.devices.iter().position(|d| d == device) else {
            return Err(SourceError::Unavailable(format!(
                "unknown device {}",
                device.id
            )));
        };
        self.sources[self.owners[pos]].read_sensors(device)
    }
}

/// Opens the configured sensor backend. Failure here is fatal for the process.
pub fn open_sensor_source(cfg: &SensorsConfig) -> Result<Box<dyn SensorSource>, SourceError> {
    let primary: Box<dyn SensorSource> = match cfg.backend.resolve() {
        SensorBackend::Wmi => Box::new(wmi::WmiSource::open()?),
        _ => Box::new(hwmon::HwmonSource::open(&cfg.hwmon_root, &cfg.gpu_name_marker)?),
    };

    let mut sources = vec![primary];
    if cfg.nvidia_smi {
        match nvidia::NvidiaSmiSource::open(&cfg.gpu_name_marker) {
            Ok(source) if !source.devices().is_empty() => sources.push(Box::new(source)),
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "nvidia-smi not available"),
        }
    }

    Ok(Box::new(CompositeSource::new(sources)))
}

pub(crate) fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| {
            c.is_ascii_digit()
                || *c == '.'
                || *c == ','
                || *c == 'e'
                || *c == 'E'
                || *c == '-'
                || *c == '+'
        })
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;

    /// In-memory device tree. Devices listed in `failing` return an error on read.
    #[derive(Default)]
    pub struct FakeSensorSource {
        pub devices: Vec<Device>,
        pub sensors: HashMap<String, Vec<Sensor>>,
        pub failing: Vec<String>,
        pub reads: Vec<String>,
    }

    impl FakeSensorSource {
        pub fn with_device(
            mut self,
            id: &str,
            category: DeviceCategory,
            sensors: Vec<Sensor>,
        ) -> Self {
            self.devices.push(Device {
                id: id.to_string(),
                name: id.to_string(),
                category,
            });
            self.sensors.insert(id.to_string(), sensors);
            self
        }
    }

    impl SensorSource for FakeSensorSource {
        fn backend(&self) -> &'static str {
            "fake"
        }

        fn devices(&self) -> &[Device] {
            &self.devices
        }

        fn read_sensors(&mut self, device: &Device) -> Result<Vec<Sensor>, SourceError> {
            self.reads.push(device.id.clone());
            if self.failing.contains(&device.id) {
                return Err(SourceError::Unavailable(device.id.clone()));
            }
            Ok(self.sensors.get(&device.id).cloned().unwrap_or_default())
        }
    }

    /// Counter source replaying queued readings; an empty queue reads as an error.
    #[derive(Default)]
    pub struct FakeCounterSource {
        pub disk: Vec<DiskCounters>,
        pub net: Vec<NetCounters>,
        pub cpu: f64,
        pub memory: f64,
    }

    impl CounterSource for FakeCounterSource {
        fn disk_io(&mut self) -> Result<DiskCounters, SourceError> {
            if self.disk.is_empty() {
                return Err(SourceError::Unavailable("disk".to_string()));
            }
            Ok(self.disk.remove(0))
        }

        fn net_io(&mut self) -> Result<NetCounters, SourceError> {
            if self.net.is_empty() {
                return Err(SourceError::Unavailable("net".to_string()));
            }
            Ok(self.net.remove(0))
        }

        fn cpu_percent(&mut self, _window: Duration) -> f64 {
            self.cpu
        }

        fn memory_percent(&mut self) -> f64 {
            self.memory
        }
    }
}
