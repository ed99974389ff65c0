use super::{wmi, CounterSource, SourceError};
use crate::state::{DiskCounters, NetCounters};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{CpuExt, NetworkExt, NetworksExt, System, SystemExt};

const SECTOR_BYTES: u64 = 512;

// Raw PhysicalDisk counters are cumulative byte totals since boot.
const PHYSICAL_DISK_SCRIPT: &str = r#"$d = Get-CimInstance -ClassName Win32_PerfRawData_PerfDisk_PhysicalDisk -Filter "Name='_Total'" -ErrorAction Stop; "$($d.DiskReadBytesPersec)|$($d.DiskWriteBytesPersec)""#;

/// OS counters backed by `sysinfo`. Disk bytes come from `/proc/diskstats` on Linux and
/// the PhysicalDisk `_Total` performance counters on Windows.
pub struct HostCounters {
    system: System,
    diskstats_path: PathBuf,
}

impl HostCounters {
    pub fn new(diskstats_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_networks_list();
        system.refresh_cpu();
        Self {
            system,
            diskstats_path: diskstats_path.into(),
        }
    }
}

impl CounterSource for HostCounters {
    fn disk_io(&mut self) -> Result<DiskCounters, SourceError> {
        if cfg!(target_os = "linux") {
            read_diskstats(&self.diskstats_path)
        } else if cfg!(target_os = "windows") {
            parse_physical_disk_totals(&wmi::run_powershell(PHYSICAL_DISK_SCRIPT)?)
        } else {
            Err(SourceError::Unavailable(
                "no system-wide disk counters on this platform".to_string(),
            ))
        }
    }

    fn net_io(&mut self) -> Result<NetCounters, SourceError> {
        self.system.refresh_networks_list();
        let networks = self.system.networks();
        if networks.iter().next().is_none() {
            return Err(SourceError::Unavailable(
                "no network interfaces".to_string(),
            ));
        }

        Ok(networks
            .iter()
            .fold(NetCounters::default(), |acc, (_iface, data)| NetCounters {
                bytes_sent: acc.bytes_sent.saturating_add(data.total_transmitted()),
                bytes_recv: acc.bytes_recv.saturating_add(data.total_received()),
            }))
    }

    fn cpu_percent(&mut self, window: Duration) -> f64 {
        self.system.refresh_cpu();
        std::thread::sleep(window);
        self.system.refresh_cpu();
        self.system.global_cpu_info().cpu_usage() as f64
    }

    fn memory_percent(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(self.system.available_memory());
        (used as f64 / total as f64) * 100.0
    }
}

/// Parses the `read|write` line printed by `PHYSICAL_DISK_SCRIPT`.
fn parse_physical_disk_totals(text: &str) -> Result<DiskCounters, SourceError> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| {
            SourceError::Unavailable("no PhysicalDisk _Total counters".to_string())
        })?;
    let parse = |field: Option<&str>, what: &'static str| {
        field
            .map(str::trim)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| SourceError::Parse {
                what,
                input: line.to_string(),
            })
    };

    let mut fields = line.split('|');
    Ok(DiskCounters {
        read_bytes: parse(fields.next(), "PhysicalDisk read bytes")?,
        write_bytes: parse(fields.next(), "PhysicalDisk write bytes")?,
    })
}

fn read_diskstats(path: &Path) -> Result<DiskCounters, SourceError> {
    let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_diskstats(&text, is_whole_disk)
}

/// Sums sectors read/written across devices accepted by `include`.
fn parse_diskstats(
    text: &str,
    include: impl Fn(&str) -> bool,
) -> Result<DiskCounters, SourceError> {
    let mut totals = DiskCounters::default();
    let mut seen = false;

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2];
        if !include(name) {
            continue;
        }

        let sectors_read = fields[5].parse::<u64>().map_err(|_| SourceError::Parse {
            what: "diskstats sectors read",
            input: line.to_string(),
        })?;
        let sectors_written = fields[9].parse::<u64>().map_err(|_| SourceError::Parse {
            what: "diskstats sectors written",
            input: line.to_string(),
        })?;
        totals.read_bytes = totals
            .read_bytes
            .saturating_add(sectors_read.saturating_mul(SECTOR_BYTES));
        totals.write_bytes = totals
            .write_bytes
            .saturating_add(sectors_written.saturating_mul(SECTOR_BYTES));
        seen = true;
    }

    if !seen {
        return Err(SourceError::Unavailable(
            "no block devices in diskstats".to_string(),
        ));
    }
    Ok(totals)
}

// Partitions have no /sys/block entry; counting them would double the totals.
fn is_whole_disk(name: &str) -> bool {
    if name.starts_with("loop") || name.starts_with("ram") {
        return false;
    }
    Path::new("/sys/block").join(name).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS: &str = "\
   7       0 loop0 120 0 2000 10 0 0 0 0 0 20 10 0 0 0 0 0 0
   8       0 sda 1000 10 4000 300 500 20 8000 700 0 900 1000 0 0 0 0 0 0
   8       1 sda1 900 10 3900 280 480 20 7900 690 0 880 970 0 0 0 0 0 0
 259       0 nvme0n1 50 0 100 5 25 0 50 3 0 8 8 0 0 0 0 0 0
";

    #[test]
    fn diskstats_sums_whole_disks() {
        let totals = parse_diskstats(DISKSTATS, |name| name == "sda" || name == "nvme0n1").unwrap();
        assert_eq!(totals.read_bytes, (4000 + 100) * 512);
        assert_eq!(totals.write_bytes, (8000 + 50) * 512);
    }

    #[test]
    fn diskstats_without_devices_is_unavailable() {
        assert!(matches!(
            parse_diskstats(DISKSTATS, |_| false),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn diskstats_rejects_garbage_counters() {
        let text = "8 0 sda 1 2 x 4 5 6 7 8 9 10\n";
        assert!(matches!(
            parse_diskstats(text, |_| true),
            Err(SourceError::Parse { .. })
        ));
    }

    #[test]
    fn physical_disk_totals_parse_raw_counters() {
        let totals = parse_physical_disk_totals("\r\n73400320000|15728640000\r\n").unwrap();
        assert_eq!(totals.read_bytes, 73_400_320_000);
        assert_eq!(totals.write_bytes, 15_728_640_000);
    }

    #[test]
    fn physical_disk_totals_reject_partial_output() {
        assert!(matches!(
            parse_physical_disk_totals("\n"),
            Err(SourceError::Unavailable(_))
        ));
        assert!(matches!(
            parse_physical_disk_totals("1024|\n"),
            Err(SourceError::Parse { .. })
        ));
        assert!(matches!(
            parse_physical_disk_totals("|\n"),
            Err(SourceError::Parse { .. })
        ));
    }

    #[test]
    fn missing_diskstats_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_diskstats(&dir.path().join("diskstats")).unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[test]
    fn memory_percent_is_bounded() {
        let mut counters = HostCounters::new("/proc/diskstats");
        let pct = counters.memory_percent();
        assert!((0.0..=100.0).contains(&pct));
    }
}
