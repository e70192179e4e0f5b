//! Local thermal sensors.

use std::collections::BTreeSet;

use sysinfo::Components;
use tracing::debug;

use crate::error::DeviceError;
use crate::filter::FilterRule;
use crate::sink::{metric_name, MetricsSink};
use crate::snapshot::{Published, SampleReader};
use crate::types::TemperatureSample;

pub struct LocalTemperature {
    components: Components,
    selected: BTreeSet<String>,
    sample: Published<TemperatureSample>,
}

impl LocalTemperature {
    /// Sensors are selected once from what is present now.
    pub fn new(filter: &FilterRule) -> Result<Self, DeviceError> {
        let components = Components::new_with_refreshed_list();
        let labels: Vec<String> = components.iter().map(|c| c.label().to_string()).collect();
        Ok(Self::with_sensors(components, filter, labels))
    }

    fn with_sensors(components: Components, filter: &FilterRule, labels: Vec<String>) -> Self {
        let selected: BTreeSet<String> = labels.into_iter().filter(|l| filter.allows(l)).collect();
        debug!("temperature sensors selected: {selected:?}");
        let sample = selected.iter().map(|l| (l.clone(), 0.0)).collect();
        Self {
            components,
            selected,
            sample: Published::new(sample),
        }
    }

    pub fn update(&mut self) -> Result<(), DeviceError> {
        self.components.refresh(true);
        let readings: Vec<(String, f64)> = self
            .components
            .iter()
            .filter_map(|c| c.temperature().map(|t| (c.label().to_string(), t as f64)))
            .collect();
        self.apply(readings);
        Ok(())
    }

    /// Replace the sample with the selected sensors found in `readings`.
    pub fn apply(&mut self, readings: impl IntoIterator<Item = (String, f64)>) {
        self.sample.value = readings
            .into_iter()
            .filter(|(label, _)| self.selected.contains(label))
            .collect();
        self.sample.publish();
    }

    pub fn sample(&self) -> &TemperatureSample {
        &self.sample.value
    }

    pub fn subscribe(&self) -> SampleReader<TemperatureSample> {
        self.sample.subscribe()
    }

    pub fn enable_metrics(&self, sink: &dyn MetricsSink) {
        enable_temperature_metrics(&self.sample, "temp", sink);
    }
}

pub(crate) fn enable_temperature_metrics(
    sample: &Published<TemperatureSample>,
    prefix: &str,
    sink: &dyn MetricsSink,
) {
    for label in sample.value.keys() {
        let rx = sample.subscribe();
        let key = label.clone();
        sink.gauge(
            metric_name([prefix, label.as_str()]),
            Box::new(move || rx.borrow().get(&key).copied().unwrap_or(0.0)),
        );
    }
}

/// Labels of every sensor the OS reports.
pub fn sensor_names() -> Vec<String> {
    Components::new_with_refreshed_list()
        .iter()
        .map(|c| c.label().to_string())
        .collect()
}
