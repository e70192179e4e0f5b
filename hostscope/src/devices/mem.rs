//! Local main memory and swap.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

use crate::error::DeviceError;
use crate::sink::{metric_name, MetricsSink};
use crate::snapshot::{Published, SampleReader};
use crate::types::{MemoryInfo, MemorySample, MAIN_MEMORY, SWAP_MEMORY};

pub struct LocalMemory {
    sys: System,
    sample: Published<MemorySample>,
}

impl LocalMemory {
    pub fn new() -> Result<Self, DeviceError> {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        let mut sample = MemorySample::new();
        sample.insert(MAIN_MEMORY.to_string(), MemoryInfo::default());
        sample.insert(SWAP_MEMORY.to_string(), MemoryInfo::default());
        Ok(Self {
            sys,
            sample: Published::new(sample),
        })
    }

    pub fn update(&mut self) -> Result<(), DeviceError> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return Err(DeviceError::sensor("memory", "total memory reported as 0"));
        }
        let used = total.saturating_sub(self.sys.available_memory());
        self.apply(MAIN_MEMORY, total, used);
        self.apply(SWAP_MEMORY, self.sys.total_swap(), self.sys.used_swap());
        self.sample.publish();
        Ok(())
    }

    fn apply(&mut self, region: &str, total: u64, used: u64) {
        let info = self.sample.value.entry(region.to_string()).or_default();
        info.set_total(total);
        info.set_used(used);
    }

    pub fn sample(&self) -> &MemorySample {
        &self.sample.value
    }

    pub fn subscribe(&self) -> SampleReader<MemorySample> {
        self.sample.subscribe()
    }

    pub fn enable_metrics(&self, sink: &dyn MetricsSink) {
        enable_memory_metrics(&self.sample, "memory", sink);
    }
}

pub(crate) fn enable_memory_metrics(
    sample: &Published<MemorySample>,
    prefix: &str,
    sink: &dyn MetricsSink,
) {
    for region in sample.value.keys() {
        let rx = sample.subscribe();
        let key = region.clone();
        sink.gauge(
            metric_name([prefix, "total", region.as_str()]),
            Box::new(move || rx.borrow().get(&key).map_or(0.0, |m| m.total as f64)),
        );
        let rx = sample.subscribe();
        let key = region.clone();
        sink.gauge(
            metric_name([prefix, "used", region.as_str()]),
            Box::new(move || rx.borrow().get(&key).map_or(0.0, |m| m.used as f64)),
        );
    }
}
