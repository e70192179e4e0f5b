//! Every source of samples the registry can schedule.

pub mod battery;
pub mod cpu;
pub mod disk;
pub mod mem;
pub mod net;
pub mod nvidia;
pub mod remote;
pub mod temp;

use std::time::Duration;

use crate::error::DeviceError;
use crate::sink::MetricsSink;
use crate::snapshot::SampleReader;
use crate::types::{
    BatterySample, CpuSample, DiskSample, MemorySample, NetworkSample, TemperatureSample,
};

pub use battery::LocalBattery;
pub use cpu::LocalCpu;
pub use disk::LocalDisk;
pub use mem::LocalMemory;
pub use net::LocalNetwork;
pub use nvidia::NvidiaGpu;
pub use remote::{Remote, RemoteTarget};
pub use temp::LocalTemperature;

/// Names accepted in the device list.
pub const LOCAL_DEVICES: [&str; 6] = ["batt", "cpu", "disk", "mem", "net", "temp"];

pub enum Device {
    Cpu(LocalCpu),
    Memory(LocalMemory),
    Disk(LocalDisk),
    Network(LocalNetwork),
    Temperature(LocalTemperature),
    Battery(LocalBattery),
    Gpu(NvidiaGpu),
    Remote(Remote),
}

impl Device {
    /// Short name used in logs and in `stopped_devices`.
    pub fn name(&self) -> String {
        match self {
            Device::Cpu(_) => "cpu".into(),
            Device::Memory(_) => "mem".into(),
            Device::Disk(_) => "disk".into(),
            Device::Network(_) => "net".into(),
            Device::Temperature(_) => "temp".into(),
            Device::Battery(_) => "batt".into(),
            Device::Gpu(_) => "nvidia".into(),
            Device::Remote(r) => format!("remote-{}", r.name()),
        }
    }

    /// Refresh once. Local sensor reads block the task briefly; the GPU and
    /// remote variants await a subprocess or an HTTP round-trip.
    pub async fn update(&mut self) -> Result<(), DeviceError> {
        match self {
            Device::Cpu(d) => d.update(),
            Device::Memory(d) => d.update(),
            Device::Disk(d) => d.update(),
            Device::Network(d) => d.update(),
            Device::Temperature(d) => d.update(),
            Device::Battery(d) => d.update(),
            Device::Gpu(d) => d.update().await,
            Device::Remote(d) => d.update().await,
        }
    }

    pub fn enable_metrics(&self, sink: &dyn MetricsSink) {
        match self {
            Device::Cpu(d) => d.enable_metrics(sink),
            Device::Memory(d) => d.enable_metrics(sink),
            Device::Disk(d) => d.enable_metrics(sink),
            Device::Network(d) => d.enable_metrics(sink),
            Device::Temperature(d) => d.enable_metrics(sink),
            Device::Battery(d) => d.enable_metrics(sink),
            Device::Gpu(d) => d.enable_metrics(sink),
            // A peer's values are already exported by the peer itself, under
            // the same names local devices use.
            Device::Remote(_) => {}
        }
    }

    /// Refresh period: remotes may carry their own.
    pub fn interval(&self, default: Duration) -> Duration {
        match self {
            Device::Remote(r) => r.target().refresh.unwrap_or(default),
            _ => default,
        }
    }

    /// Add this device's snapshot receivers to `out`.
    pub fn collect_readers(&self, out: &mut SampleReaders) {
        match self {
            Device::Cpu(d) => out.cpu.push(d.subscribe()),
            Device::Memory(d) => out.memory.push(d.subscribe()),
            Device::Disk(d) => out.disk.push(d.subscribe()),
            Device::Network(d) => out.network.push(d.subscribe()),
            Device::Temperature(d) => out.temperature.push(d.subscribe()),
            Device::Battery(d) => out.battery.push(d.subscribe()),
            Device::Gpu(d) => {
                out.cpu.extend(d.subscribe_cpus());
                out.memory.extend(d.subscribe_memory());
                out.temperature.extend(d.subscribe_temps());
            }
            Device::Remote(d) => {
                out.cpu.push(d.subscribe_cpu());
                out.memory.push(d.subscribe_memory());
                out.disk.push(d.subscribe_disk());
                out.network.push(d.subscribe_network());
                out.temperature.push(d.subscribe_temps());
            }
        }
    }
}

/// Per-domain lists of independently owned samples, for whoever renders them.
#[derive(Clone, Default)]
pub struct SampleReaders {
    pub cpu: Vec<SampleReader<CpuSample>>,
    pub memory: Vec<SampleReader<MemorySample>>,
    pub disk: Vec<SampleReader<DiskSample>>,
    pub network: Vec<SampleReader<NetworkSample>>,
    pub temperature: Vec<SampleReader<TemperatureSample>>,
    pub battery: Vec<SampleReader<BatterySample>>,
}

/// Names a filter can refer to in `domain` ("net", "temp" or "disk").
pub fn available_names(domain: &str) -> Result<Vec<String>, DeviceError> {
    let mut names = match domain {
        "net" => net::interface_names(),
        "temp" => temp::sensor_names(),
        "disk" => disk::partition_names(),
        other => return Err(DeviceError::UnknownDevice(other.to_string())),
    };
    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterRule;
    use crate::sink::MetricSet;

    #[tokio::test]
    async fn dispatch_reaches_the_wrapped_device() {
        let mut dev = Device::Memory(LocalMemory::new().unwrap());
        assert_eq!(dev.name(), "mem");
        let mut readers = SampleReaders::default();
        dev.collect_readers(&mut readers);
        assert_eq!(readers.memory.len(), 1);
        if dev.update().await.is_ok() {
            assert!(readers.memory[0].borrow().contains_key("Main"));
        }
    }

    #[test]
    fn remote_overrides_interval_and_exports_nothing() {
        let mut target = RemoteTarget::new("lab", "http://lab/metrics");
        target.refresh = Some(Duration::from_secs(7));
        let dev = Device::Remote(Remote::new(target).unwrap());
        assert_eq!(dev.name(), "remote-lab");
        assert_eq!(dev.interval(Duration::from_secs(1)), Duration::from_secs(7));

        let set = MetricSet::new();
        dev.enable_metrics(&set);
        assert!(set.is_empty());

        let mut readers = SampleReaders::default();
        dev.collect_readers(&mut readers);
        assert_eq!(readers.cpu.len(), 1);
        assert_eq!(readers.network.len(), 1);
        assert!(readers.battery.is_empty());
    }

    #[test]
    fn local_devices_use_the_global_interval() {
        let dev = Device::Network(LocalNetwork::new(FilterRule::default()).unwrap());
        assert_eq!(dev.interval(Duration::from_millis(250)), Duration::from_millis(250));
    }

    #[test]
    fn unknown_listing_domain() {
        assert!(matches!(
            available_names("gpu"),
            Err(DeviceError::UnknownDevice(d)) if d == "gpu"
        ));
        assert!(available_names("net").is_ok());
    }
}
