pub const BYTES_PER_MB: f64 = 1_048_576.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskDelta {
    pub read_mb: f64,
    pub write_mb: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetRate {
    pub sent_mbps: f64,
    pub recv_mbps: f64,
}

/// Last-seen cumulative counters. `None` means no usable baseline yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaState {
    pub disk: Option<DiskCounters>,
    pub net: Option<NetCounters>,
}

impl DeltaState {
    pub fn new(disk: Option<DiskCounters>, net: Option<NetCounters>) -> Self {
        Self { disk, net }
    }

    /// MB moved since the previous snapshot. Not divided by elapsed time.
    pub fn disk_delta(&self, current: &DiskCounters) -> Option<DiskDelta> {
        let prev = self.disk?;
        Some(DiskDelta {
            read_mb: bytes_to_mb(current.read_bytes.saturating_sub(prev.read_bytes)),
            write_mb: bytes_to_mb(current.write_bytes.saturating_sub(prev.write_bytes)),
        })
    }

    /// MB/s over a fixed `interval_secs`. A non-positive interval has no rate.
    pub fn net_rate(&self, current: &NetCounters, interval_secs: f64) -> Option<NetRate> {
        let prev = self.net?;
        Some(NetRate {
            sent_mbps: rate_per_sec(
                current.bytes_sent.saturating_sub(prev.bytes_sent),
                interval_secs,
            )?,
            recv_mbps: rate_per_sec(
                current.bytes_recv.saturating_sub(prev.bytes_recv),
                interval_secs,
            )?,
        })
    }

    /// Replaces the baseline with whatever was read this pass. Halves that
    /// failed to read keep their previous snapshot.
    pub fn advance(&mut self, disk: Option<DiskCounters>, net: Option<NetCounters>) {
        if disk.is_some() {
            self.disk = disk;
        }
        if net.is_some() {
            self.net = net;
        }
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

pub fn rate_per_sec(bytes: u64, interval_secs: f64) -> Option<f64> {
    if !interval_secs.is_finite() || interval_secs <= 0.0 {
        return None;
    }
    Some(bytes_to_mb(bytes) / interval_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_rate_divides_by_interval() {
        let state = DeltaState::new(
            None,
            Some(NetCounters {
                bytes_sent: 0,
                bytes_recv: 1_048_576,
            }),
        );
        let rate = state
            .net_rate(
                &NetCounters {
                    bytes_sent: 3 * 1_048_576,
                    bytes_recv: 2 * 1_048_576,
                },
                2.0,
            )
            .unwrap();
        assert_eq!(rate.sent_mbps, 1.5);
        assert_eq!(rate.recv_mbps, 0.5);
    }

    #[test]
    fn zero_interval_has_no_rate() {
        let state = DeltaState::new(None, Some(NetCounters::default()));
        assert!(state.net_rate(&NetCounters::default(), 0.0).is_none());
        assert!(state.net_rate(&NetCounters::default(), f64::NAN).is_none());
    }

    #[test]
    fn counter_reset_clamps_to_zero() {
        let state = DeltaState::new(
            Some(DiskCounters {
                read_bytes: 5_000,
                write_bytes: 5_000,
            }),
            None,
        );
        let delta = state
            .disk_delta(&DiskCounters {
                read_bytes: 10,
                write_bytes: 4_000,
            })
            .unwrap();
        assert_eq!(delta.read_mb, 0.0);
        assert_eq!(delta.write_mb, 0.0);
    }

    #[test]
    fn disk_delta_is_mb_per_pass() {
        let state = DeltaState::new(
            Some(DiskCounters {
                read_bytes: 1_000,
                write_bytes: 2_000,
            }),
            None,
        );
        let delta = state
            .disk_delta(&DiskCounters {
                read_bytes: 1_000 + 2 * 1_048_576,
                write_bytes: 2_500,
            })
            .unwrap();
        assert_eq!(delta.read_mb, 2.0);
        assert!((delta.write_mb - 500.0 / 1_048_576.0).abs() < 1e-12);
    }

    #[test]
    fn missing_baseline_has_no_delta() {
        let state = DeltaState::default();
        assert!(state.disk_delta(&DiskCounters::default()).is_none());
        assert!(state.net_rate(&NetCounters::default(), 1.0).is_none());
    }

    #[test]
    fn advance_keeps_previous_half_on_failed_read() {
        let disk = DiskCounters {
            read_bytes: 1,
            write_bytes: 2,
        };
        let mut state = DeltaState::new(Some(disk), None);
        let net = NetCounters {
            bytes_sent: 7,
            bytes_recv: 8,
        };
        state.advance(None, Some(net));
        assert_eq!(state, DeltaState::new(Some(disk), Some(net)));
    }
}
