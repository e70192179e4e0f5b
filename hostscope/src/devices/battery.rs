//! Local batteries. The OS gives no stable identity, so batteries are matched
//! by position from one update to the next.

use battery::units::energy::watt_hour;
use battery::units::power::watt;
use battery::{Manager, State};

use crate::error::DeviceError;
use crate::sink::{metric_name, MetricsSink};
use crate::snapshot::{Published, SampleReader};
use crate::types::{BatteryInfo, BatterySample};

pub struct LocalBattery {
    sample: Published<BatterySample>,
}

impl LocalBattery {
    /// Fails when the battery API is unavailable or reports no batteries.
    pub fn new() -> Result<Self, DeviceError> {
        let first = read_batteries()?;
        let mut dev = Self {
            sample: Published::new(BatterySample::default()),
        };
        dev.apply(first)?;
        Ok(dev)
    }

    pub fn update(&mut self) -> Result<(), DeviceError> {
        let readings = read_batteries()?;
        self.apply(readings)
    }

    pub fn apply(&mut self, readings: Vec<BatteryInfo>) -> Result<(), DeviceError> {
        if readings.is_empty() {
            return Err(DeviceError::NoBatteries);
        }
        let s = &mut self.sample.value;
        for (i, r) in readings.iter().enumerate() {
            match s.batteries.get_mut(i) {
                Some(slot) => *slot = *r,
                None => s.batteries.push(*r),
            }
        }
        s.batteries.truncate(readings.len());
        s.recompute();
        self.sample.publish();
        Ok(())
    }

    pub fn sample(&self) -> &BatterySample {
        &self.sample.value
    }

    pub fn subscribe(&self) -> SampleReader<BatterySample> {
        self.sample.subscribe()
    }

    pub fn enable_metrics(&self, sink: &dyn MetricsSink) {
        for i in 0..self.sample.value.batteries.len() {
            let rx = self.sample.subscribe();
            sink.gauge(
                metric_name(["batt".to_string(), i.to_string(), "total".to_string()]),
                Box::new(move || rx.borrow().batteries.get(i).map_or(0.0, BatteryInfo::fraction)),
            );
        }
    }
}

fn read_batteries() -> Result<Vec<BatteryInfo>, DeviceError> {
    let manager = Manager::new()?;
    let mut out = Vec::new();
    for b in manager.batteries()? {
        let b = b?;
        out.push(BatteryInfo {
            full: b.energy_full().get::<watt_hour>() as f64,
            current: b.energy().get::<watt_hour>() as f64,
            design: b.energy_full_design().get::<watt_hour>() as f64,
            charging: matches!(b.state(), State::Charging),
            charge_rate: b.energy_rate().get::<watt>() as f64,
        });
    }
    Ok(out)
}
