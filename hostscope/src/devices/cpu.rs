//! Local CPU utilization via sysinfo.

use sysinfo::{CpuRefreshKind, RefreshKind, System};

use crate::error::DeviceError;
use crate::sink::{metric_name, MetricsSink};
use crate::snapshot::{Published, SampleReader};
use crate::types::CpuSample;

pub struct LocalCpu {
    sys: System,
    per_cpu: bool,
    sample: Published<CpuSample>,
}

impl LocalCpu {
    /// `per_cpu == false` reports a single aggregate core.
    pub fn new(per_cpu: bool) -> Result<Self, DeviceError> {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        if sys.cpus().is_empty() {
            return Err(DeviceError::sensor("cpu", "no CPUs reported"));
        }
        Ok(Self {
            sys,
            per_cpu,
            sample: Published::new(CpuSample::new("CPU")),
        })
    }

    pub fn update(&mut self) -> Result<(), DeviceError> {
        self.sys.refresh_cpu_usage();
        let values: Vec<f64> = if self.per_cpu {
            self.sys
                .cpus()
                .iter()
                .map(|c| c.cpu_usage() as f64)
                .collect()
        } else {
            vec![self.sys.global_cpu_usage() as f64]
        };
        self.apply(&values)
    }

    /// Store one reading. An empty reading is an error and keeps the
    /// previous sample.
    pub fn apply(&mut self, values: &[f64]) -> Result<(), DeviceError> {
        if values.is_empty() {
            return Err(DeviceError::sensor("cpu", "empty utilization reading"));
        }
        self.sample.value.set_all(values);
        self.sample.publish();
        Ok(())
    }

    pub fn sample(&self) -> &CpuSample {
        &self.sample.value
    }

    pub fn subscribe(&self) -> SampleReader<CpuSample> {
        self.sample.subscribe()
    }

    pub fn enable_metrics(&self, sink: &dyn MetricsSink) {
        enable_cpu_metrics(&self.sample, "cpu", sink);
    }
}

/// Gauges for the average and for each core known at registration time.
pub(crate) fn enable_cpu_metrics(sample: &Published<CpuSample>, prefix: &str, sink: &dyn MetricsSink) {
    let rx = sample.subscribe();
    sink.gauge(metric_name([prefix, "avg"]), Box::new(move || rx.borrow().average));
    for i in 0..sample.value.per_core.len() {
        let rx = sample.subscribe();
        sink.gauge(
            metric_name([prefix.to_string(), i.to_string()]),
            Box::new(move || rx.borrow().per_core.get(i).copied().unwrap_or(0.0)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MetricSet;

    #[test]
    fn failed_reading_keeps_previous_values() {
        let Ok(mut cpu) = LocalCpu::new(true) else {
            return;
        };
        cpu.apply(&[12.0, 14.0]).unwrap();
        assert!(cpu.apply(&[]).is_err());
        assert_eq!(cpu.sample().per_core[..2], [12.0, 14.0]);
        assert_eq!(cpu.subscribe().borrow().average, 13.0);
    }

    #[test]
    fn gauges_follow_published_values() {
        let Ok(mut cpu) = LocalCpu::new(true) else {
            return;
        };
        cpu.apply(&[10.0, 30.0]).unwrap();
        let set = MetricSet::new();
        cpu.enable_metrics(&set);
        cpu.apply(&[50.0, 70.0]).unwrap();
        assert_eq!(set.value("cpu_avg"), Some(60.0));
        assert_eq!(set.value("cpu_1"), Some(70.0));
    }
}
