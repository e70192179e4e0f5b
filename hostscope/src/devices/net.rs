//! Local network interfaces: cumulative totals and an aggregate recent delta.

use sysinfo::Networks;

use crate::error::DeviceError;
use crate::filter::FilterRule;
use crate::rate::RateTracker;
use crate::sink::{metric_name, MetricsSink};
use crate::snapshot::{Published, SampleReader};
use crate::types::{NetworkInterface, NetworkSample};

/// `(interface, cumulative bytes received, cumulative bytes sent)`.
pub type InterfaceCounters = (String, u64, u64);

pub struct LocalNetwork {
    nets: Networks,
    filter: FilterRule,
    recv: RateTracker,
    sent: RateTracker,
    sample: Published<NetworkSample>,
}

impl LocalNetwork {
    /// Interfaces are chosen once, here; ones that appear later are ignored.
    pub fn new(filter: FilterRule) -> Result<Self, DeviceError> {
        let nets = Networks::new_with_refreshed_list();
        let names: Vec<String> = nets.iter().map(|(name, _)| name.to_string()).collect();
        Ok(Self::with_interfaces(nets, filter, names))
    }

    fn with_interfaces(nets: Networks, filter: FilterRule, names: Vec<String>) -> Self {
        let mut sample = NetworkSample::default();
        for name in names.into_iter().filter(|n| filter.allows(n)) {
            sample
                .interfaces
                .insert(name.clone(), NetworkInterface::new(name));
        }
        Self {
            nets,
            filter,
            recv: RateTracker::new(),
            sent: RateTracker::new(),
            sample: Published::new(sample),
        }
    }

    pub fn update(&mut self) -> Result<(), DeviceError> {
        self.nets.refresh(true);
        let counters: Vec<InterfaceCounters> = self
            .nets
            .iter()
            .map(|(name, data)| (name.to_string(), data.total_received(), data.total_transmitted()))
            .collect();
        self.apply(counters);
        Ok(())
    }

    /// Fold one set of OS counters into the sample. Untracked interfaces are
    /// ignored; the recent totals come from the sum over tracked ones.
    pub fn apply(&mut self, counters: impl IntoIterator<Item = InterfaceCounters>) {
        let s = &mut self.sample.value;
        let (mut ttl_recv, mut ttl_sent) = (0u64, 0u64);
        for (name, recv, sent) in counters {
            let Some(iface) = s.interfaces.get_mut(&name) else {
                continue;
            };
            iface.bytes_recv = recv;
            iface.bytes_sent = sent;
            ttl_recv = ttl_recv.saturating_add(recv);
            ttl_sent = ttl_sent.saturating_add(sent);
        }

        // RateTracker clamps and logs if the totals went backwards.
        s.recent_bytes_recv = self.recv.observe(ttl_recv);
        s.recent_bytes_sent = self.sent.observe(ttl_sent);
        s.total_bytes_recv = s.total_bytes_recv.saturating_add(s.recent_bytes_recv);
        s.total_bytes_sent = s.total_bytes_sent.saturating_add(s.recent_bytes_sent);
        self.sample.publish();
    }

    pub fn filter(&self) -> &FilterRule {
        &self.filter
    }

    pub fn sample(&self) -> &NetworkSample {
        &self.sample.value
    }

    pub fn subscribe(&self) -> SampleReader<NetworkSample> {
        self.sample.subscribe()
    }

    pub fn enable_metrics(&self, sink: &dyn MetricsSink) {
        enable_network_metrics(&self.sample, sink);
    }
}

/// Counters carrying each interface's cumulative bytes.
pub(crate) fn enable_network_metrics(sample: &Published<NetworkSample>, sink: &dyn MetricsSink) {
    for name in sample.value.interfaces.keys() {
        let rx = sample.subscribe();
        let key = name.clone();
        sink.counter(
            metric_name(["net", name.as_str(), "recv"]),
            Box::new(move || rx.borrow().interfaces.get(&key).map_or(0.0, |i| i.bytes_recv as f64)),
        );
        let rx = sample.subscribe();
        let key = name.clone();
        sink.counter(
            metric_name(["net", name.as_str(), "sent"]),
            Box::new(move || rx.borrow().interfaces.get(&key).map_or(0.0, |i| i.bytes_sent as f64)),
        );
    }
}

/// Names of every interface the OS reports.
pub fn interface_names() -> Vec<String> {
    Networks::new_with_refreshed_list()
        .iter()
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MetricSet;

    fn device(filter: FilterRule, names: &[&str]) -> LocalNetwork {
        LocalNetwork::with_interfaces(
            Networks::new(),
            filter,
            names.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn c(name: &str, recv: u64, sent: u64) -> InterfaceCounters {
        (name.to_string(), recv, sent)
    }

    #[test]
    fn filter_decides_tracked_interfaces() {
        let net = device(
            FilterRule::interfaces(["!lo"]).exclude_vpn(true),
            &["lo", "eth0", "tun0", "wlan0"],
        );
        let names: Vec<_> = net.sample().interfaces.keys().cloned().collect();
        assert_eq!(names, ["eth0", "wlan0"]);
    }

    #[test]
    fn aggregate_delta_across_tracked_interfaces() {
        let mut net = device(FilterRule::interfaces(["!lo"]), &["lo", "eth0", "wlan0"]);
        net.apply([c("eth0", 100, 10), c("wlan0", 50, 5), c("lo", 9_999, 9_999)]);
        assert_eq!(net.sample().recent_bytes_recv, 0);
        assert_eq!(net.sample().recent_bytes_sent, 0);

        net.apply([c("eth0", 130, 12), c("wlan0", 70, 5), c("lo", 99_999, 99_999)]);
        assert_eq!(net.sample().recent_bytes_recv, 50);
        assert_eq!(net.sample().recent_bytes_sent, 2);
        assert_eq!(net.sample().interfaces["eth0"].bytes_recv, 130);
        assert_eq!(net.sample().total_bytes_recv, 50);
    }

    #[test]
    fn shrinking_totals_clamp_to_zero() {
        let mut net = device(FilterRule::default(), &["eth0"]);
        net.apply([c("eth0", 1_000, 1_000)]);
        net.apply([c("eth0", 10, 2_000)]);
        assert_eq!(net.sample().recent_bytes_recv, 0);
        assert_eq!(net.sample().recent_bytes_sent, 1_000);
        net.apply([c("eth0", 30, 2_000)]);
        assert_eq!(net.sample().recent_bytes_recv, 20);
    }

    #[test]
    fn exports_counters_per_interface() {
        let mut net = device(FilterRule::default(), &["eth0"]);
        let set = MetricSet::new();
        net.enable_metrics(&set);
        net.apply([c("eth0", 77, 33)]);
        assert_eq!(set.value("net_eth0_recv"), Some(77.0));
        assert_eq!(set.value("net_eth0_sent"), Some(33.0));
        assert!(set.render().contains("# TYPE net_eth0_recv counter"));
    }
}
