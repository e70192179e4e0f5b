//! Per-domain sample records. Each is written by exactly one device and read
//! by everyone else through snapshots.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::filter::is_vpn;

pub const MAIN_MEMORY: &str = "Main";
pub const SWAP_MEMORY: &str = "Swap";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuSample {
    /// "CPU" for the local host, the GPU model, or a remote's name.
    pub name: String,
    /// One percentage per logical core. Never shrinks.
    pub per_core: Vec<f64>,
    pub average: f64,
}

impl CpuSample {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Store one core's value, growing the list (zero-filled) if needed.
    pub fn set_core(&mut self, idx: usize, value: f64) {
        if idx >= self.per_core.len() {
            self.per_core.resize(idx + 1, 0.0);
        }
        self.per_core[idx] = value;
    }

    /// Replace per-core values and recompute the average. A shorter reading
    /// only overwrites the leading cores.
    pub fn set_all(&mut self, values: &[f64]) {
        for (i, v) in values.iter().enumerate() {
            self.set_core(i, *v);
        }
        if !values.is_empty() {
            self.average = values.iter().sum::<f64>() / values.len() as f64;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    /// `used / total * 100`; untouched while `total` is zero.
    pub used_percent: f64,
}

impl MemoryInfo {
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
        self.recompute();
    }

    pub fn set_used(&mut self, used: u64) {
        self.used = used;
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.total > 0 {
            self.used_percent = self.used as f64 / self.total as f64 * 100.0;
        }
    }
}

/// Region name ("Main", "Swap", a GPU index...) -> usage.
pub type MemorySample = BTreeMap<String, MemoryInfo>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskPartition {
    pub device: String,
    pub mount_point: String,
    pub used_percent: f64,
    pub free: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_read_recently: u64,
    pub bytes_written_recently: u64,
}

impl DiskPartition {
    pub fn new(device: impl Into<String>, mount_point: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            mount_point: mount_point.into(),
            ..Self::default()
        }
    }
}

/// Device name -> partition.
pub type DiskSample = BTreeMap<String, DiskPartition>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub is_vpn: bool,
    pub bytes_recv: u64,
    pub bytes_sent: u64,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            is_vpn: is_vpn(&name),
            name,
            bytes_recv: 0,
            bytes_sent: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkSample {
    pub interfaces: BTreeMap<String, NetworkInterface>,
    /// Bytes received across every tracked interface since the previous update.
    pub recent_bytes_recv: u64,
    pub recent_bytes_sent: u64,
    /// Running totals of the recent values.
    pub total_bytes_recv: u64,
    pub total_bytes_sent: u64,
}

/// Sensor label -> degrees Celsius.
pub type TemperatureSample = BTreeMap<String, f64>;

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BatteryInfo {
    /// Watt-hours at full charge.
    pub full: f64,
    pub current: f64,
    pub design: f64,
    pub charging: bool,
    /// Watts; charging or discharging depending on `charging`.
    pub charge_rate: f64,
}

impl BatteryInfo {
    pub fn fraction(&self) -> f64 {
        if self.full > 0.0 {
            self.current / self.full
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatterySample {
    /// Ordered as the OS reports them; there is no stable identity.
    pub batteries: Vec<BatteryInfo>,
    /// Capacity-weighted charge in [0,1].
    pub percent_full: f64,
}

impl BatterySample {
    pub fn recompute(&mut self) {
        let full: f64 = self.batteries.iter().map(|b| b.full).sum();
        let current: f64 = self.batteries.iter().map(|b| b.current).sum();
        self.percent_full = if full > 0.0 { current / full } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_cores_never_shrink() {
        let mut c = CpuSample::new("CPU");
        c.set_all(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(c.average, 25.0);
        c.set_all(&[50.0, 50.0]);
        assert_eq!(c.per_core, vec![50.0, 50.0, 30.0, 40.0]);
        assert_eq!(c.average, 50.0);
        c.set_core(5, 1.0);
        assert_eq!(c.per_core.len(), 6);
        assert_eq!(c.per_core[4], 0.0);
    }

    #[test]
    fn memory_percent_skips_zero_total() {
        let mut m = MemoryInfo::default();
        m.set_used(500);
        assert_eq!(m.used_percent, 0.0);
        m.set_total(1000);
        assert_eq!(m.used_percent, 50.0);
        m.set_total(0);
        assert_eq!(m.used_percent, 50.0);
    }

    #[test]
    fn battery_percent_is_capacity_weighted() {
        let mut s = BatterySample {
            batteries: vec![
                BatteryInfo {
                    full: 30.0,
                    current: 30.0,
                    ..Default::default()
                },
                BatteryInfo {
                    full: 10.0,
                    current: 0.0,
                    ..Default::default()
                },
            ],
            percent_full: 0.0,
        };
        s.recompute();
        assert!((s.percent_full - 0.75).abs() < 1e-9);
        assert_eq!(s.batteries[0].fraction(), 1.0);
    }

    #[test]
    fn vpn_flag_from_name() {
        assert!(NetworkInterface::new("tun0").is_vpn);
        assert!(!NetworkInterface::new("eth0").is_vpn);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
    }
}
