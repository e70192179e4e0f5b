//! Brings devices up and runs one refresh loop per device.
//!
//! Startup builds every requested device, collecting failures instead of
//! stopping at the first one. `spawn` then hands each device to its own tokio
//! task; a task owns its device outright, so no sample is ever written by two
//! loops. A loop ends for good when its device's `update` fails, or when the
//! shutdown signal fires.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::devices::{
    Device, LocalBattery, LocalCpu, LocalDisk, LocalMemory, LocalNetwork, LocalTemperature,
    NvidiaGpu, Remote, RemoteTarget, SampleReaders,
};
use crate::error::{DeviceError, SetupError};
use crate::filter::FilterRule;
use crate::sink::MetricsSink;

/// Shortest period a loop will tick at.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// What to start. Device names are the ones in `devices::LOCAL_DEVICES`.
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub devices: Vec<String>,
    pub interval: Duration,
    pub net_filter: FilterRule,
    pub temp_filter: FilterRule,
    pub per_cpu: bool,
    pub nvidia: bool,
    pub remotes: Vec<RemoteTarget>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            devices: crate::devices::LOCAL_DEVICES.iter().map(|s| s.to_string()).collect(),
            interval: Duration::from_secs(1),
            net_filter: FilterRule::default(),
            temp_filter: FilterRule::default(),
            per_cpu: true,
            nvidia: false,
            remotes: Vec::new(),
        }
    }
}

fn build_local(name: &str, cfg: &StartupConfig) -> Result<Device, DeviceError> {
    Ok(match name {
        "cpu" => Device::Cpu(LocalCpu::new(cfg.per_cpu)?),
        "mem" => Device::Memory(LocalMemory::new()?),
        "disk" => Device::Disk(LocalDisk::new()?),
        "net" => Device::Network(LocalNetwork::new(cfg.net_filter.clone())?),
        "temp" => Device::Temperature(LocalTemperature::new(&cfg.temp_filter)?),
        "batt" => Device::Battery(LocalBattery::new()?),
        other => return Err(DeviceError::UnknownDevice(other.to_string())),
    })
}

/// Build every requested device and refresh each once so readers have data
/// straight away. Devices that cannot be built are returned as errors and
/// left out; a failed first refresh is only logged.
pub async fn startup(cfg: StartupConfig) -> (Registry, Vec<SetupError>) {
    let mut devices = Vec::new();
    let mut errors = Vec::new();

    let mut record = |device: String, built: Result<Device, DeviceError>| match built {
        Ok(dev) => devices.push(dev),
        Err(source) => {
            warn!("device {device} not started: {source}");
            errors.push(SetupError { device, source });
        }
    };

    for name in &cfg.devices {
        record(name.clone(), build_local(name, &cfg));
    }
    if cfg.nvidia {
        record("nvidia".into(), NvidiaGpu::new().await.map(Device::Gpu));
    }
    for target in &cfg.remotes {
        record(
            format!("remote-{}", target.name),
            Remote::new(target.clone()).map(Device::Remote),
        );
    }

    for dev in &mut devices {
        if let Err(e) = dev.update().await {
            warn!("{}: initial update failed: {e}", dev.name());
        }
        info!("{} registered", dev.name());
    }

    (Registry::new(devices, cfg.interval), errors)
}

/// Devices that were built but whose loops are not running yet.
pub struct Registry {
    devices: Vec<Device>,
    interval: Duration,
}

impl Registry {
    pub fn new(devices: Vec<Device>, interval: Duration) -> Self {
        Self { devices, interval }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.devices.iter().map(Device::name).collect()
    }

    pub fn readers(&self) -> SampleReaders {
        let mut out = SampleReaders::default();
        for dev in &self.devices {
            dev.collect_readers(&mut out);
        }
        out
    }

    /// Start one loop per device. With a sink, every device registers its
    /// metrics first. Must be called inside a tokio runtime.
    pub fn spawn(self, sink: Option<&dyn MetricsSink>) -> RunningRegistry {
        let readers = self.readers();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let stopped = Arc::new(Mutex::new(BTreeSet::new()));

        let handles = self
            .devices
            .into_iter()
            .map(|dev| {
                if let Some(sink) = sink {
                    dev.enable_metrics(sink);
                }
                let period = dev.interval(self.interval).max(MIN_INTERVAL);
                tokio::spawn(refresh_loop(
                    dev,
                    period,
                    shutdown_tx.subscribe(),
                    Arc::clone(&stopped),
                ))
            })
            .collect();

        RunningRegistry {
            handles,
            shutdown_tx,
            stopped,
            readers,
        }
    }
}

async fn refresh_loop(
    mut device: Device,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    stopped: Arc<Mutex<BTreeSet<String>>>,
) {
    let name = device.name();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick is immediate and startup already refreshed once.
    ticker.tick().await;
    debug!("{name}: refreshing every {period:?}");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = device.update().await {
                    error!("{name}: update failed, refresh stopped: {e}");
                    break;
                }
            }
            _ = shutdown.recv() => {
                debug!("{name}: shutting down");
                break;
            }
        }
    }

    stopped
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name);
}

/// Handle to the running loops. Dropping it closes the shutdown channel,
/// which also ends every loop; `shutdown` additionally waits for them.
pub struct RunningRegistry {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    stopped: Arc<Mutex<BTreeSet<String>>>,
    readers: SampleReaders,
}

impl RunningRegistry {
    pub fn readers(&self) -> &SampleReaders {
        &self.readers
    }

    /// Devices whose loops have ended. Their samples keep the last values.
    pub fn stopped_devices(&self) -> Vec<String> {
        self.stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Signal every loop and wait for all of them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for res in join_all(self.handles).await {
            if let Err(e) = res {
                error!("refresh loop ended abnormally: {e}");
            }
        }
        info!("all device loops stopped");
    }
}
