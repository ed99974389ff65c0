use crate::collectors::{
    CounterSource, Device, DeviceCategory, SensorKind, SensorSource, SourceError,
};
use crate::metrics::Metrics;
use crate::state::DeltaState;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);
/// Network rates assume passes are this far apart, matching the CPU window.
pub const NETWORK_INTERVAL_SECS: f64 = 1.0;

const NOT_AVAILABLE: &str = "N/A";

/// One sampling pass, before presentation formatting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VitalsRecord {
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    /// MB moved since the previous pass.
    pub disk_read_mb: Option<f64>,
    pub disk_write_mb: Option<f64>,
    pub cpu_temp_c: Option<f64>,
    pub gpu_temp_c: Option<f64>,
    pub gpu_load_percent: Option<f64>,
    pub net_sent_mbps: Option<f64>,
    pub net_recv_mbps: Option<f64>,
}

/// JSON body served on `/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VitalsResponse {
    pub cpu_usage: String,
    pub memory_usage: String,
    pub disk_usage_read: String,
    pub disk_usage_write: String,
    pub cpu_temp: String,
    pub gpu_temp: String,
    pub gpu_usage: String,
    pub network_sent: String,
    pub network_recv: String,
}

impl From<&VitalsRecord> for VitalsResponse {
    fn from(value: &VitalsRecord) -> Self {
        Self {
            cpu_usage: format_percent(value.cpu_usage_percent),
            memory_usage: format_percent(value.memory_usage_percent),
            // Disk figures are per pass but keep the MB/s label clients expect.
            disk_usage_read: or_na(value.disk_read_mb, format_rate),
            disk_usage_write: or_na(value.disk_write_mb, format_rate),
            cpu_temp: or_na(value.cpu_temp_c, format_temp),
            gpu_temp: or_na(value.gpu_temp_c, format_temp),
            gpu_usage: or_na(value.gpu_load_percent, format_percent),
            network_sent: or_na(value.net_sent_mbps, format_rate),
            network_recv: or_na(value.net_recv_mbps, format_rate),
        }
    }
}

fn format_percent(v: f64) -> String {
    format!("{v:.2}%")
}

fn format_rate(v: f64) -> String {
    format!("{v:.2} MB/s")
}

fn format_temp(v: f64) -> String {
    format!("{v:.2}°C")
}

fn or_na(value: Option<f64>, fmt: fn(f64) -> String) -> String {
    match value {
        Some(v) if v.is_finite() => fmt(v),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Value of the first temperature sensor on the first CPU device.
/// Only that one device is ever read.
pub fn cpu_temperature(source: &mut dyn SensorSource) -> Option<f64> {
    let device = source
        .devices()
        .iter()
        .find(|d| d.category == DeviceCategory::Cpu)
        .cloned()?;

    let sensors = match source.read_sensors(&device) {
        Ok(sensors) => sensors,
        Err(err) => {
            debug!(device = %device.name, error = %err, "cpu sensors unreadable");
            return None;
        }
    };

    sensors
        .into_iter()
        .find(|s| s.kind == SensorKind::Temperature)
        .and_then(|s| s.value)
}

/// Temperature and load across all GPU devices; later matches replace earlier ones.
pub fn gpu_readings(source: &mut dyn SensorSource, marker: &str) -> (Option<f64>, Option<f64>) {
    let gpus: Vec<Device> = source
        .devices()
        .iter()
        .filter(|d| d.category.is_gpu())
        .cloned()
        .collect();

    let mut temp = None;
    let mut load = None;
    for device in &gpus {
        let sensors = match source.read_sensors(device) {
            Ok(sensors) => sensors,
            Err(err) => {
                debug!(device = %device.name, error = %err, "gpu sensors unreadable");
                continue;
            }
        };
        for sensor in sensors {
            if !sensor.name.contains(marker) {
                continue;
            }
            match sensor.kind {
                SensorKind::Temperature => temp = sensor.value,
                SensorKind::Load => load = sensor.value,
                SensorKind::Other => {}
            }
        }
    }

    (temp, load)
}

/// Owns the sensor handle, the counter source, and the delta baseline.
/// Callers serialize access; one `sample` call is one pass.
pub struct VitalsAggregator {
    sensors: Box<dyn SensorSource>,
    counters: Box<dyn CounterSource>,
    delta: DeltaState,
    gpu_name_marker: String,
    metrics: Arc<Metrics>,
}

impl VitalsAggregator {
    /// Takes the counter baseline. Must run before the first request is served.
    pub fn new(
        sensors: Box<dyn SensorSource>,
        mut counters: Box<dyn CounterSource>,
        gpu_name_marker: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let disk = read_or_warn("disk", counters.disk_io(), &metrics);
        let net = read_or_warn("net", counters.net_io(), &metrics);
        Self {
            sensors,
            counters,
            delta: DeltaState::new(disk, net),
            gpu_name_marker: gpu_name_marker.into(),
            metrics,
        }
    }

    #[cfg(test)]
    pub fn delta_state(&self) -> &DeltaState {
        &self.delta
    }

    /// Blocks for at least `CPU_SAMPLE_WINDOW`.
    pub fn sample(&mut self) -> VitalsRecord {
        let started = Instant::now();

        let cpu_temp_c = cpu_temperature(&mut *self.sensors);
        let (gpu_temp_c, gpu_load_percent) =
            gpu_readings(&mut *self.sensors, &self.gpu_name_marker);

        let disk = read_or_warn("disk", self.counters.disk_io(), &self.metrics);
        let net = read_or_warn("net", self.counters.net_io(), &self.metrics);
        let disk_delta = disk.and_then(|current| self.delta.disk_delta(&current));
        let net_rate = net.and_then(|current| self.delta.net_rate(&current, NETWORK_INTERVAL_SECS));
        self.delta.advance(disk, net);

        let cpu_usage_percent = self.counters.cpu_percent(CPU_SAMPLE_WINDOW);
        let memory_usage_percent = self.counters.memory_percent();

        let record = VitalsRecord {
            cpu_usage_percent,
            memory_usage_percent,
            disk_read_mb: disk_delta.map(|d| d.read_mb),
            disk_write_mb: disk_delta.map(|d| d.write_mb),
            cpu_temp_c,
            gpu_temp_c,
            gpu_load_percent,
            net_sent_mbps: net_rate.map(|r| r.sent_mbps),
            net_recv_mbps: net_rate.map(|r| r.recv_mbps),
        };

        for (field, missing) in [
            ("cpu_temp", record.cpu_temp_c.is_none()),
            ("gpu_temp", record.gpu_temp_c.is_none()),
            ("gpu_usage", record.gpu_load_percent.is_none()),
        ] {
            if missing {
                self.metrics.inc_sensor_missing(field);
            }
        }
        self.metrics.observe_pass(started.elapsed());
        debug!(
            backend = self.sensors.backend(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sampling pass complete"
        );

        record
    }
}

fn read_or_warn<T>(
    source: &'static str,
    result: Result<T, SourceError>,
    metrics: &Metrics,
) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(source, error = %err, "counter read failed");
            metrics.inc_source_error(source);
            None
        }
    }
}
