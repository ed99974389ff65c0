use super::{parse_f64_loose, Device, DeviceCategory, Sensor, SensorKind, SensorSource, SourceError};

const NAMESPACES: [&str; 2] = ["root/OpenHardwareMonitor", "root/LibreHardwareMonitor"];

/// OpenHardwareMonitor / LibreHardwareMonitor WMI provider, queried through PowerShell.
pub struct WmiSource {
    namespace: String,
    devices: Vec<Device>,
}

impl WmiSource {
    pub fn open() -> Result<Self, SourceError> {
        let script = format!(
            "foreach($ns in @({})){{ try {{ $h=Get-CimInstance -Namespace $ns -ClassName Hardware -ErrorAction Stop }} catch {{ continue }}; \"$ns\"; $h | ForEach-Object {{ \"$($_.HardwareType)|$($_.Identifier)|$($_.Name)\" }}; break }}",
            NAMESPACES
                .iter()
                .map(|ns| format!("'{ns}'"))
                .collect::<Vec<_>>()
                .join(",")
        );
        let text = run_powershell(&script)?;
        let (namespace, devices) = parse_hardware_listing(&text)?;
        tracing::debug!(namespace = %namespace, devices = devices.len(), "hardware monitor namespace opened");
        Ok(Self { namespace, devices })
    }
}

impl SensorSource for WmiSource {
    fn backend(&self) -> &'static str {
        "wmi"
    }

    fn devices(&self) -> &[Device] {
        &self.devices
    }

    fn read_sensors(&mut self, device: &Device) -> Result<Vec<Sensor>, SourceError> {
        let script = format!(
            "Get-CimInstance -Namespace '{}' -ClassName Sensor -Filter \"Parent='{}'\" -ErrorAction Stop | ForEach-Object {{ \"$($_.SensorType)|$($_.Name)|$($_.Value)\" }}",
            self.namespace,
            device.id.replace('\'', "''")
        );
        let text = run_powershell(&script)?;
        Ok(parse_sensor_listing(&text))
    }
}

fn parse_hardware_listing(text: &str) -> Result<(String, Vec<Device>), SourceError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let namespace = lines
        .next()
        .filter(|ns| NAMESPACES.contains(ns))
        .ok_or_else(|| {
            SourceError::Unavailable(
                "no OpenHardwareMonitor or LibreHardwareMonitor WMI namespace".to_string(),
            )
        })?
        .to_string();

    let devices = lines
        .filter_map(|line| {
            let parts: Vec<&str> = line.splitn(3, '|').map(str::trim).collect();
            if parts.len() < 3 || parts[1].is_empty() {
                return None;
            }
            Some(Device {
                id: parts[1].to_string(),
                name: parts[2].to_string(),
                category: categorize(parts[0]),
            })
        })
        .collect();

    Ok((namespace, devices))
}

fn parse_sensor_listing(text: &str) -> Vec<Sensor> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.splitn(3, '|').map(str::trim).collect();
            if parts.len() < 3 {
                return None;
            }
            let kind = match parts[0].to_ascii_lowercase().as_str() {
                "temperature" => SensorKind::Temperature,
                "load" => SensorKind::Load,
                _ => SensorKind::Other,
            };
            Some(Sensor::new(parts[1], kind, parse_f64_loose(parts[2])))
        })
        .collect()
}

fn categorize(hardware_type: &str) -> DeviceCategory {
    match hardware_type.to_ascii_lowercase().as_str() {
        "cpu" => DeviceCategory::Cpu,
        "gpunvidia" => DeviceCategory::GpuNvidia,
        "gpuati" | "gpuamd" => DeviceCategory::GpuAmd,
        _ => DeviceCategory::Other,
    }
}

#[cfg(target_os = "windows")]
pub(crate) fn run_powershell(script: &str) -> Result<String, SourceError> {
    use std::process::Command;

    let wrapped_script = format!(
        "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); $OutputEncoding=[System.Text.UTF8Encoding]::new($false); {script}"
    );
    let output = Command::new("powershell")
        .args(["-NoProfile", "-Command", &wrapped_script])
        .output()
        .or_else(|_| {
            Command::new(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe")
                .args(["-NoProfile", "-Command", &wrapped_script])
                .output()
        })
        .map_err(|err| SourceError::Command {
            command: "powershell".to_string(),
            reason: err.to_string(),
        })?;
    if !output.status.success() {
        return Err(SourceError::Command {
            command: "powershell".to_string(),
            reason: format!("exited with {}", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn run_powershell(_script: &str) -> Result<String, SourceError> {
    Err(SourceError::Unavailable(
        "PowerShell queries are only available on Windows".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_listing_maps_hardware_types() {
        let text = "root/OpenHardwareMonitor\r\nCPU|/intelcpu/0|Intel Core i7-8700K\r\nGpuNvidia|/nvidiagpu/0|NVIDIA GeForce GTX 1080\r\nGpuAti|/atigpu/0|Radeon RX 580\r\nRAM|/ram|Generic Memory\r\n";
        let (ns, devices) = parse_hardware_listing(text).unwrap();
        assert_eq!(ns, "root/OpenHardwareMonitor");
        let categories: Vec<_> = devices.iter().map(|d| d.category).collect();
        assert_eq!(
            categories,
            vec![
                DeviceCategory::Cpu,
                DeviceCategory::GpuNvidia,
                DeviceCategory::GpuAmd,
                DeviceCategory::Other
            ]
        );
        assert_eq!(devices[0].id, "/intelcpu/0");
    }

    #[test]
    fn missing_namespace_is_unavailable() {
        assert!(matches!(
            parse_hardware_listing(""),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn sensor_listing_keeps_empty_values_absent() {
        let sensors = parse_sensor_listing(
            "Temperature|GPU Core|61\nLoad|GPU Core|35,5\nClock|GPU Memory|2500\nTemperature|GPU Hot Spot|\n",
        );
        assert_eq!(sensors.len(), 4);
        assert_eq!(sensors[1], Sensor::new("GPU Core", SensorKind::Load, Some(35.5)));
        assert_eq!(sensors[2].kind, SensorKind::Other);
        assert_eq!(sensors[3].value, None);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn open_fails_off_windows() {
        assert!(WmiSource::open().is_err());
    }
}
