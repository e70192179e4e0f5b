//! NVIDIA GPUs via `nvidia-smi` CSV output.
//!
//! One invocation returns every GPU. Rows are grouped by model name: each
//! model gets a CPU-shaped sample (one "core" per GPU index), a memory sample
//! keyed by index, and a temperature sample keyed by index.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{DeviceError, GpuParseError};
use crate::sink::{metric_name, MetricsSink};
use crate::snapshot::{Published, SampleReader};
use crate::types::{CpuSample, MemoryInfo, MemorySample, TemperatureSample};

const QUERY: &str = "--query-gpu=name,index,temperature.gpu,utilization.gpu,memory.total,memory.used";
const FORMAT: &str = "--format=csv,noheader,nounits";
const MIB: u64 = 1_048_576;

/// The query tool, overridable with `HOSTSCOPE_NVIDIA_SMI`.
static NVIDIA_SMI: Lazy<String> = Lazy::new(|| {
    std::env::var("HOSTSCOPE_NVIDIA_SMI").unwrap_or_else(|_| "nvidia-smi".to_string())
});

/// One CSV row. Fields that failed to parse are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuRow {
    pub name: String,
    pub index: usize,
    pub temperature: Option<f64>,
    pub utilization: Option<f64>,
    pub memory_total_mib: Option<u64>,
    pub memory_used_mib: Option<u64>,
}

/// Parse tool output. Bad rows or fields are recorded in the error and
/// parsing continues with the next field/row.
pub fn parse_rows(output: &str) -> (Vec<GpuRow>, GpuParseError) {
    let mut rows = Vec::new();
    let mut errs = GpuParseError::default();
    for (i, line) in output.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if cols.len() < 6 {
            errs.push(i, cols.len(), format!("expected 6 columns, got {}", cols.len()));
            continue;
        }
        let index = match cols[1].parse::<usize>() {
            Ok(v) => v,
            Err(e) => {
                errs.push(i, 1, e);
                continue;
            }
        };
        let mut float = |col: usize| match cols[col].parse::<f64>() {
            Ok(v) => Some(v),
            Err(e) => {
                errs.push(i, col, format!("{:?}: {e}", cols[col]));
                None
            }
        };
        let temperature = float(2);
        let utilization = float(3);
        let mut int = |col: usize| match cols[col].parse::<u64>() {
            Ok(v) => Some(v),
            Err(e) => {
                errs.push(i, col, format!("{:?}: {e}", cols[col]));
                None
            }
        };
        let memory_total_mib = int(4);
        let memory_used_mib = int(5);
        rows.push(GpuRow {
            name: cols[0].to_string(),
            index,
            temperature,
            utilization,
            memory_total_mib,
            memory_used_mib,
        });
    }
    (rows, errs)
}

/// Samples for every GPU of one model.
pub struct GpuModel {
    pub cpu: Published<CpuSample>,
    pub memory: Published<MemorySample>,
    pub temps: Published<TemperatureSample>,
    /// `nvidia-smi` index to position in `cpu.per_core`, in order of first
    /// appearance.
    slots: BTreeMap<usize, usize>,
}

impl GpuModel {
    fn new(name: &str) -> Self {
        Self {
            cpu: Published::new(CpuSample::new(name)),
            memory: Published::new(MemorySample::new()),
            temps: Published::new(TemperatureSample::new()),
            slots: BTreeMap::new(),
        }
    }

    fn slot(&mut self, index: usize) -> usize {
        let next = self.slots.len();
        *self.slots.entry(index).or_insert(next)
    }

    fn apply(&mut self, row: &GpuRow) {
        let key = row.index.to_string();
        if let Some(t) = row.temperature {
            self.temps.value.insert(key.clone(), t);
        }
        let pos = self.slot(row.index);
        match row.utilization {
            Some(u) => self.cpu.value.set_core(pos, u),
            None if pos >= self.cpu.value.per_core.len() => self.cpu.value.set_core(pos, 0.0),
            None => {}
        }
        let mem = self.memory.value.entry(key).or_insert_with(MemoryInfo::default);
        if let Some(total) = row.memory_total_mib {
            mem.set_total(total.saturating_mul(MIB));
        }
        if let Some(used) = row.memory_used_mib {
            mem.set_used(used.saturating_mul(MIB));
        }
    }

    fn publish(&mut self) {
        let cores = &self.cpu.value.per_core;
        if !cores.is_empty() {
            self.cpu.value.average = cores.iter().sum::<f64>() / cores.len() as f64;
        }
        self.cpu.publish();
        self.memory.publish();
        self.temps.publish();
    }
}

pub struct NvidiaGpu {
    command: String,
    models: BTreeMap<String, GpuModel>,
}

impl NvidiaGpu {
    /// Runs the tool once to learn which GPUs exist. Fails when the tool is
    /// missing or exits non-zero.
    pub async fn new() -> Result<Self, DeviceError> {
        Self::with_command(NVIDIA_SMI.as_str()).await
    }

    pub async fn with_command(command: impl Into<String>) -> Result<Self, DeviceError> {
        let mut dev = Self {
            command: command.into(),
            models: BTreeMap::new(),
        };
        let out = dev.query().await?;
        let (rows, _) = parse_rows(&out);
        for row in &rows {
            dev.models
                .entry(row.name.clone())
                .or_insert_with(|| GpuModel::new(&row.name));
        }
        if dev.models.is_empty() {
            return Err(DeviceError::sensor("gpu", "no GPUs listed"));
        }
        debug!("gpu models: {:?}", dev.models.keys().collect::<Vec<_>>());
        dev.apply(&out);
        Ok(dev)
    }

    async fn query(&self) -> Result<String, DeviceError> {
        let out = Command::new(&self.command)
            .arg(QUERY)
            .arg(FORMAT)
            .output()
            .await
            .map_err(|source| DeviceError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        if !out.status.success() {
            return Err(DeviceError::CommandFailed {
                command: self.command.clone(),
                status: out.status,
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    /// Only a tool that cannot run or exits non-zero fails the update; bad
    /// rows are logged by `apply`.
    pub async fn update(&mut self) -> Result<(), DeviceError> {
        let out = self.query().await?;
        self.apply(&out);
        Ok(())
    }

    /// Fold tool output into the per-model samples. Row errors are logged and
    /// returned; rows that parsed are applied either way.
    pub fn apply(&mut self, output: &str) -> Option<GpuParseError> {
        let (rows, errs) = parse_rows(output);
        for row in &rows {
            match self.models.get_mut(&row.name) {
                Some(model) => model.apply(row),
                None => debug!("ignoring GPU {} which appeared after startup", row.name),
            }
        }
        for model in self.models.values_mut() {
            model.publish();
        }
        if errs.is_empty() {
            None
        } else {
            warn!("{errs}");
            Some(errs)
        }
    }

    pub fn models(&self) -> &BTreeMap<String, GpuModel> {
        &self.models
    }

    pub fn subscribe_cpus(&self) -> Vec<SampleReader<CpuSample>> {
        self.models.values().map(|m| m.cpu.subscribe()).collect()
    }

    pub fn subscribe_memory(&self) -> Vec<SampleReader<MemorySample>> {
        self.models.values().map(|m| m.memory.subscribe()).collect()
    }

    pub fn subscribe_temps(&self) -> Vec<SampleReader<TemperatureSample>> {
        self.models.values().map(|m| m.temps.subscribe()).collect()
    }

    /// `gpu_<i>_util`, `gpu_<i>_temp` and `gpu_<i>_memory_used` for every GPU
    /// index seen so far, plus `<model>_avg` per model.
    pub fn enable_metrics(&self, sink: &dyn MetricsSink) {
        for (name, model) in &self.models {
            let rx = model.cpu.subscribe();
            sink.gauge(metric_name([name.as_str(), "avg"]), Box::new(move || rx.borrow().average));
            for (&idx, &pos) in &model.slots {
                let key = idx.to_string();
                let rx = model.cpu.subscribe();
                sink.gauge(
                    metric_name(["gpu", key.as_str(), "util"]),
                    Box::new(move || rx.borrow().per_core.get(pos).copied().unwrap_or(0.0)),
                );
                let rx = model.temps.subscribe();
                let k = key.clone();
                sink.gauge(
                    metric_name(["gpu", key.as_str(), "temp"]),
                    Box::new(move || rx.borrow().get(&k).copied().unwrap_or(0.0)),
                );
                let rx = model.memory.subscribe();
                let k = key.clone();
                sink.gauge(
                    metric_name(["gpu", key.as_str(), "memory_used"]),
                    Box::new(move || rx.borrow().get(&k).map_or(0.0, |m| m.used as f64)),
                );
            }
        }
    }
}
