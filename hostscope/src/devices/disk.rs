//! Local disk partitions: usage plus read/write deltas.

use std::collections::{HashMap, HashSet};

use sysinfo::Disks;
use tracing::{debug, warn};

use crate::error::DeviceError;
use crate::rate::RateTracker;
use crate::sink::{metric_name, MetricsSink};
use crate::snapshot::{Published, SampleReader};
use crate::types::{DiskPartition, DiskSample};

/// One enumerated partition as the OS reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionReading {
    pub device: String,
    pub mount_point: String,
    /// `(used percent, free bytes)`; `None` when the size query failed.
    pub usage: Option<(f64, u64)>,
    /// Cumulative `(read, written)` bytes; `None` when unavailable.
    pub io: Option<(u64, u64)>,
}

/// Loop devices and container overlays are not real disks.
pub fn is_synthetic(device: &str, mount_point: &str) -> bool {
    device.starts_with("/dev/loop")
        || device == "overlay"
        || mount_point.starts_with("/var/lib/docker/")
}

#[derive(Debug, Default, Clone, Copy)]
struct IoTrackers {
    read: RateTracker,
    write: RateTracker,
}

pub struct LocalDisk {
    disks: Disks,
    sample: Published<DiskSample>,
    trackers: HashMap<String, IoTrackers>,
}

impl LocalDisk {
    pub fn new() -> Result<Self, DeviceError> {
        Ok(Self {
            disks: Disks::new_with_refreshed_list(),
            sample: Published::new(DiskSample::new()),
            trackers: Default::default(),
        })
    }

    pub fn update(&mut self) -> Result<(), DeviceError> {
        self.disks.refresh(true);
        let readings = read_partitions(&self.disks);
        self.apply(readings);
        Ok(())
    }

    /// Reconcile the tracked set with the latest enumeration.
    pub fn apply(&mut self, readings: Vec<PartitionReading>) {
        let mut seen = HashSet::with_capacity(readings.len());
        for r in readings {
            if is_synthetic(&r.device, &r.mount_point) {
                continue;
            }
            seen.insert(r.device.clone());
            let part = self
                .sample
                .value
                .entry(r.device.clone())
                .or_insert_with(|| {
                    debug!("tracking new partition {} at {}", r.device, r.mount_point);
                    DiskPartition::new(&r.device, &r.mount_point)
                });

            let Some((used_percent, free)) = r.usage else {
                warn!("recoverable error fetching disk usage for partition {}", part.mount_point);
                continue;
            };
            part.used_percent = used_percent;
            part.free = free;

            let Some((read, written)) = r.io else {
                warn!("recoverable error fetching IO counters for partition {}", part.device);
                continue;
            };
            let t = self.trackers.entry(r.device).or_default();
            part.bytes_read_recently = t.read.observe(read);
            part.bytes_written_recently = t.write.observe(written);
            part.bytes_read = read;
            part.bytes_written = written;
        }

        self.sample.value.retain(|dev, _| seen.contains(dev));
        self.trackers.retain(|dev, _| seen.contains(dev));
        self.sample.publish();
    }

    pub fn sample(&self) -> &DiskSample {
        &self.sample.value
    }

    pub fn subscribe(&self) -> SampleReader<DiskSample> {
        self.sample.subscribe()
    }

    pub fn enable_metrics(&self, sink: &dyn MetricsSink) {
        for dev in self.sample.value.keys() {
            let encoded = dev.replace('/', ":");
            let fields: [(&str, fn(&DiskPartition) -> f64); 4] = [
                ("freepc", |p| p.used_percent),
                ("free", |p| p.free as f64),
                ("read", |p| p.bytes_read as f64),
                ("write", |p| p.bytes_written as f64),
            ];
            for (field, get) in fields {
                let rx = self.sample.subscribe();
                let key = dev.clone();
                sink.gauge(
                    metric_name(["disk", field, encoded.as_str()]),
                    Box::new(move || rx.borrow().get(&key).map_or(0.0, get)),
                );
            }
        }
    }
}

fn read_partitions(disks: &Disks) -> Vec<PartitionReading> {
    disks
        .list()
        .iter()
        .map(|d| {
            let total = d.total_space();
            let available = d.available_space();
            let usage = (total > 0).then(|| {
                let used = total.saturating_sub(available);
                (used as f64 / total as f64 * 100.0, available)
            });
            let io = d.usage();
            PartitionReading {
                device: d.name().to_string_lossy().into_owned(),
                mount_point: d.mount_point().to_string_lossy().into_owned(),
                usage,
                io: Some((io.total_read_bytes, io.total_written_bytes)),
            }
        })
        .collect()
}

/// Device names of every enumerated partition.
pub fn partition_names() -> Vec<String> {
    Disks::new_with_refreshed_list()
        .list()
        .iter()
        .map(|d| d.name().to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(dev: &str, read: u64, written: u64) -> PartitionReading {
        PartitionReading {
            device: dev.into(),
            mount_point: format!("/mnt/{}", dev.trim_start_matches("/dev/")),
            usage: Some((40.0, 1_000)),
            io: Some((read, written)),
        }
    }

    fn tracked(d: &LocalDisk) -> Vec<&str> {
        d.sample().keys().map(String::as_str).collect()
    }

    #[test]
    fn partitions_come_and_go_with_enumeration() {
        let mut d = LocalDisk::new().unwrap();
        d.apply(vec![reading("/dev/a", 100, 10), reading("/dev/b", 200, 20)]);
        assert_eq!(tracked(&d), ["/dev/a", "/dev/b"]);

        d.apply(vec![reading("/dev/b", 260, 25), reading("/dev/c", 900, 90)]);
        assert_eq!(tracked(&d), ["/dev/b", "/dev/c"]);
        let b = &d.sample()["/dev/b"];
        assert_eq!((b.bytes_read_recently, b.bytes_written_recently), (60, 5));
        let c = &d.sample()["/dev/c"];
        assert_eq!((c.bytes_read_recently, c.bytes_written_recently), (0, 0));
        assert_eq!(c.bytes_read, 900);

        // a's counters are forgotten; coming back starts from zero again
        d.apply(vec![reading("/dev/a", 5_000, 50)]);
        assert_eq!(d.sample()["/dev/a"].bytes_read_recently, 0);
    }

    #[test]
    fn synthetic_devices_are_skipped() {
        let mut d = LocalDisk::new().unwrap();
        let mut docker = reading("/dev/sdb1", 0, 0);
        docker.mount_point = "/var/lib/docker/overlay2/x".into();
        d.apply(vec![reading("/dev/loop3", 1, 1), docker, reading("/dev/sda1", 1, 1)]);
        assert_eq!(tracked(&d), ["/dev/sda1"]);
    }

    #[test]
    fn failed_partition_only_skips_itself() {
        let mut d = LocalDisk::new().unwrap();
        d.apply(vec![reading("/dev/a", 10, 10), reading("/dev/b", 10, 10)]);
        let mut broken = reading("/dev/a", 99, 99);
        broken.usage = None;
        d.apply(vec![broken, reading("/dev/b", 15, 10)]);
        assert_eq!(tracked(&d), ["/dev/a", "/dev/b"]);
        assert_eq!(d.sample()["/dev/a"].bytes_read, 10);
        assert_eq!(d.sample()["/dev/b"].bytes_read_recently, 5);
    }

    #[test]
    fn counter_reset_reports_zero() {
        let mut d = LocalDisk::new().unwrap();
        d.apply(vec![reading("/dev/a", 1_000, 1_000)]);
        d.apply(vec![reading("/dev/a", 10, 1_500)]);
        let a = &d.sample()["/dev/a"];
        assert_eq!((a.bytes_read_recently, a.bytes_written_recently), (0, 500));
    }
}
