use super::{parse_f64_loose, Device, DeviceCategory, Sensor, SensorKind, SensorSource, SourceError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Linux hwmon tree: every `hwmonN` directory is one device.
pub struct HwmonSource {
    devices: Vec<Device>,
    gpu_marker: String,
}

impl HwmonSource {
    /// GPU sensor names are prefixed with `gpu_marker` so they match the configured marker.
    pub fn open(root: impl AsRef<Path>, gpu_marker: impl Into<String>) -> Result<Self, SourceError> {
        let root = root.as_ref();
        let entries = fs::read_dir(root).map_err(|source| SourceError::Io {
            path: root.display().to_string(),
            source,
        })?;

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("hwmon"))
            })
            .collect();
        dirs.sort_by_key(|p| hwmon_index(p));

        let devices = dirs
            .into_iter()
            .map(|path| {
                let name = fs::read_to_string(path.join("name"))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                Device {
                    id: path.display().to_string(),
                    category: categorize(&name),
                    name,
                }
            })
            .collect::<Vec<_>>();
        debug!(root = %root.display(), devices = devices.len(), "hwmon tree opened");

        Ok(Self {
            devices,
            gpu_marker: gpu_marker.into(),
        })
    }
}

impl SensorSource for HwmonSource {
    fn backend(&self) -> &'static str {
        "hwmon"
    }

    fn devices(&self) -> &[Device] {
        &self.devices
    }

    fn read_sensors(&mut self, device: &Device) -> Result<Vec<Sensor>, SourceError> {
        let dir = Path::new(&device.id);
        let entries = fs::read_dir(dir).map_err(|source| SourceError::Io {
            path: device.id.clone(),
            source,
        })?;

        let mut temp_indices: Vec<u32> = entries
            .flatten()
            .filter_map(|e| {
                let file = e.file_name();
                let file = file.to_str()?;
                file.strip_prefix("temp")?
                    .strip_suffix("_input")?
                    .parse::<u32>()
                    .ok()
            })
            .collect();
        temp_indices.sort_unstable();

        let gpu = device.category.is_gpu();
        let mut sensors = Vec::with_capacity(temp_indices.len() + 1);
        for idx in temp_indices {
            let value = fs::read_to_string(dir.join(format!("temp{idx}_input")))
                .ok()
                .and_then(|raw| parse_f64_loose(&raw))
                .map(|milli| milli / 1000.0);
            let label = fs::read_to_string(dir.join(format!("temp{idx}_label")))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| format!("Temperature #{idx}"));
            sensors.push(Sensor::new(
                sensor_name(&label, gpu.then_some(self.gpu_marker.as_str())),
                SensorKind::Temperature,
                value,
            ));
        }

        if gpu {
            let busy = dir.join("device").join("gpu_busy_percent");
            if busy.exists() {
                let value = fs::read_to_string(&busy)
                    .ok()
                    .and_then(|raw| parse_f64_loose(&raw));
                sensors.push(Sensor::new(
                    format!("{} Core", self.gpu_marker),
                    SensorKind::Load,
                    value,
                ));
            }
        }

        Ok(sensors)
    }
}

fn categorize(driver: &str) -> DeviceCategory {
    match driver {
        "coretemp" | "k10temp" | "k8temp" | "zenpower" | "cpu_thermal" => DeviceCategory::Cpu,
        "amdgpu" | "radeon" => DeviceCategory::GpuAmd,
        "nouveau" | "nvidia" => DeviceCategory::GpuNvidia,
        _ => DeviceCategory::Other,
    }
}

fn sensor_name(label: &str, gpu_marker: Option<&str>) -> String {
    match gpu_marker {
        Some(marker) if !label.contains(marker) => format!("{marker} {label}"),
        _ => label.to_string(),
    }
}

fn hwmon_index(path: &Path) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("hwmon"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, contents: &str) {
        if let Some(parent) = dir.join(file).parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(dir.join(file), contents).unwrap();
    }

    fn fake_tree() -> TempDir {
        let root = TempDir::new().unwrap();
        let acpi = root.path().join("hwmon0");
        write(&acpi, "name", "acpitz\n");
        write(&acpi, "temp1_input", "27800\n");

        let cpu = root.path().join("hwmon2");
        write(&cpu, "name", "coretemp\n");
        write(&cpu, "temp1_input", "48000\n");
        write(&cpu, "temp1_label", "Package id 0\n");
        write(&cpu, "temp2_input", "45000\n");
        write(&cpu, "temp2_label", "Core 0\n");

        let gpu = root.path().join("hwmon10");
        write(&gpu, "name", "amdgpu\n");
        write(&gpu, "temp1_input", "51000\n");
        write(&gpu, "temp1_label", "edge\n");
        write(&gpu, "device/gpu_busy_percent", "17\n");
        root
    }

    #[test]
    fn open_orders_devices_and_categorizes_drivers() {
        let root = fake_tree();
        let source = HwmonSource::open(root.path(), "GPU").unwrap();
        let categories: Vec<_> = source.devices().iter().map(|d| d.category).collect();
        assert_eq!(
            categories,
            vec![
                DeviceCategory::Other,
                DeviceCategory::Cpu,
                DeviceCategory::GpuAmd
            ]
        );
    }

    #[test]
    fn cpu_sensors_are_read_in_index_order() {
        let root = fake_tree();
        let mut source = HwmonSource::open(root.path(), "GPU").unwrap();
        let cpu = source.devices()[1].clone();
        let sensors = source.read_sensors(&cpu).unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].name, "Package id 0");
        assert_eq!(sensors[0].value, Some(48.0));
        assert_eq!(sensors[0].kind, SensorKind::Temperature);
    }

    #[test]
    fn gpu_sensors_carry_gpu_prefix_and_load() {
        let root = fake_tree();
        let mut source = HwmonSource::open(root.path(), "GPU").unwrap();
        let gpu = source.devices()[2].clone();
        let sensors = source.read_sensors(&gpu).unwrap();
        assert_eq!(
            sensors,
            vec![
                Sensor::new("GPU edge", SensorKind::Temperature, Some(51.0)),
                Sensor::new("GPU Core", SensorKind::Load, Some(17.0)),
            ]
        );
    }

    #[test]
    fn gpu_sensor_names_follow_configured_marker() {
        let root = fake_tree();
        let mut source = HwmonSource::open(root.path(), "Radeon").unwrap();
        let gpu = source.devices()[2].clone();
        let names: Vec<_> = source
            .read_sensors(&gpu)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Radeon edge", "Radeon Core"]);

        let cpu = source.devices()[1].clone();
        assert_eq!(source.read_sensors(&cpu).unwrap()[0].name, "Package id 0");
    }

    #[test]
    fn open_fails_without_root() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("absent");
        assert!(matches!(
            HwmonSource::open(&missing, "GPU"),
            Err(SourceError::Io { .. })
        ));
    }
}
