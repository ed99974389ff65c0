use super::{parse_f64_loose, Device, DeviceCategory, Sensor, SensorKind, SensorSource, SourceError};
use std::process::{Command, Output};

/// NVIDIA GPUs as reported by `nvidia-smi`, one device per GPU index.
pub struct NvidiaSmiSource {
    devices: Vec<Device>,
    sensor_name: String,
}

impl NvidiaSmiSource {
    pub fn open(gpu_marker: &str) -> Result<Self, SourceError> {
        let text = run_nvidia_smi(&["--query-gpu=index,name", "--format=csv,noheader,nounits"])?;
        Ok(Self {
            devices: parse_gpu_list(&text),
            sensor_name: format!("{gpu_marker} Core"),
        })
    }
}

impl SensorSource for NvidiaSmiSource {
    fn backend(&self) -> &'static str {
        "nvidia-smi"
    }

    fn devices(&self) -> &[Device] {
        &self.devices
    }

    fn read_sensors(&mut self, device: &Device) -> Result<Vec<Sensor>, SourceError> {
        let index = format!("--id={}", device.id);
        let text = run_nvidia_smi(&[
            index.as_str(),
            "--query-gpu=temperature.gpu,utilization.gpu",
            "--format=csv,noheader,nounits",
        ])?;
        parse_gpu_readings(&text, &self.sensor_name)
    }
}

fn parse_gpu_list(text: &str) -> Vec<Device> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, ',').map(str::trim);
            let id = parts.next().filter(|v| !v.is_empty())?;
            let name = parts.next().unwrap_or(id);
            Some(Device {
                id: id.to_string(),
                name: name.to_string(),
                category: DeviceCategory::GpuNvidia,
            })
        })
        .collect()
}

fn parse_gpu_readings(text: &str, sensor_name: &str) -> Result<Vec<Sensor>, SourceError> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| SourceError::Parse {
            what: "nvidia-smi output",
            input: text.to_string(),
        })?;
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return Err(SourceError::Parse {
            what: "nvidia-smi output",
            input: line.to_string(),
        });
    }

    Ok(vec![
        Sensor::new(sensor_name, SensorKind::Temperature, parse_f64_loose(parts[0])),
        Sensor::new(sensor_name, SensorKind::Load, parse_f64_loose(parts[1])),
    ])
}

fn run_nvidia_smi(args: &[&str]) -> Result<String, SourceError> {
    let output = spawn_nvidia_smi(args).ok_or_else(|| SourceError::Command {
        command: "nvidia-smi".to_string(),
        reason: "not found".to_string(),
    })?;
    if !output.status.success() {
        return Err(SourceError::Command {
            command: "nvidia-smi".to_string(),
            reason: format!("exited with {}", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn spawn_nvidia_smi(args: &[&str]) -> Option<Output> {
    if let Ok(output) = Command::new("nvidia-smi").args(args).output() {
        return Some(output);
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(output) = Command::new(r"C:\Windows\System32\nvidia-smi.exe")
            .args(args)
            .output()
        {
            return Some(output);
        }
    }

    None
}
