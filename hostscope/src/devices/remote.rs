//! Another instance's export endpoint, scraped over HTTP.
//!
//! The body is one `name value` fact per line, using the names local devices
//! register in `enable_metrics`:
//!
//! ```text
//! cpu_<idx> 12.5            cpu_avg updates the average
//! temp_<label> 48
//! net_<iface>_recv 1024     cumulative; net_<iface>_sent likewise
//! disk_freepc_<dev> 55.1    dev has '/' written as ':'
//! disk_free_<dev> 1000      disk_read_<dev>, disk_write_<dev> are cumulative
//! memory_total_<region> 8   memory_used_<region> likewise
//! ```
//!
//! Unknown lines (including Prometheus `# HELP`/`# TYPE` comments) are ignored. A
//! recognised line with a missing or non-numeric value is logged and skipped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::error::DeviceError;
use crate::rate::RateTracker;
use crate::snapshot::{Published, SampleReader};
use crate::types::{
    CpuSample, DiskPartition, DiskSample, MemorySample, NetworkInterface, NetworkSample,
    TemperatureSample,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shorter lines cannot hold a prefix and a value.
const MIN_LINE: usize = 6;

/// Where a peer lives and how often to pull it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub name: String,
    pub url: String,
    /// `None` means the global update interval.
    pub refresh: Option<Duration>,
}

impl RemoteTarget {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            refresh: None,
        }
    }

    /// Collect targets from `remote-NAME-url` / `remote-NAME-refresh` pairs.
    /// Other keys are ignored; malformed `remote-` keys, bad refresh values
    /// and targets without a URL are logged and dropped.
    pub fn from_vars<'a, I>(vars: I) -> Vec<RemoteTarget>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut found: BTreeMap<String, (Option<String>, Option<Duration>)> = BTreeMap::new();
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix("remote-") else {
                continue;
            };
            let Some((name, field)) = rest.rsplit_once('-').filter(|(n, _)| !n.is_empty()) else {
                warn!("malformed remote configuration '{key}'; must be 'remote-NAME-url' or 'remote-NAME-refresh'");
                continue;
            };
            let entry = found.entry(name.to_string()).or_default();
            match field {
                "url" => entry.0 = Some(value.to_string()),
                "refresh" => match value.trim().parse::<u64>() {
                    Ok(secs) => entry.1 = Some(Duration::from_secs(secs)),
                    Err(_) => warn!(
                        "illegal remote value for {key}: '{value}'; must be a duration in seconds, e.g. '2'"
                    ),
                },
                _ => warn!("bad remote option '{key}'; must be 'remote-NAME-url' or 'remote-NAME-refresh'"),
            }
        }
        found
            .into_iter()
            .filter_map(|(name, (url, refresh))| match url {
                Some(url) => Some(RemoteTarget { name, url, refresh }),
                None => {
                    warn!("remote {name} has no url; skipping");
                    None
                }
            })
            .collect()
    }
}

pub struct Remote {
    target: RemoteTarget,
    client: Client,
    cpu: Published<CpuSample>,
    temps: Published<TemperatureSample>,
    net: Published<NetworkSample>,
    disk: Published<DiskSample>,
    memory: Published<MemorySample>,
    /// One tracker per cumulative fact, keyed by its line name.
    counters: HashMap<String, RateTracker>,
    /// Cumulative facts seen in the scrape being processed.
    scraped: HashSet<String>,
}

impl Remote {
    /// Validates the URL; no request is made until `update`.
    pub fn new(target: RemoteTarget) -> Result<Self, DeviceError> {
        url::Url::parse(&target.url).map_err(|source| DeviceError::BadUrl {
            url: target.url.clone(),
            source,
        })?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("failed to build HTTP client, using default: {e}");
                Client::new()
            });
        Ok(Self {
            cpu: Published::new(CpuSample::new(target.name.clone())),
            temps: Published::new(TemperatureSample::new()),
            net: Published::new(NetworkSample::default()),
            disk: Published::new(DiskSample::new()),
            memory: Published::new(MemorySample::new()),
            counters: HashMap::new(),
            scraped: HashSet::new(),
            client,
            target,
        })
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub async fn update(&mut self) -> Result<(), DeviceError> {
        let url = &self.target.url;
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| DeviceError::Http {
                url: url.clone(),
                source,
            })?;
        if res.status() != StatusCode::OK {
            return Err(DeviceError::Status {
                url: url.clone(),
                status: res.status(),
            });
        }
        let body = res.text().await.map_err(|source| DeviceError::Http {
            url: url.clone(),
            source,
        })?;
        self.process(&body);
        Ok(())
    }

    /// Merge one scrape body into the samples and publish them.
    pub fn process(&mut self, body: &str) {
        let mut temps = TemperatureSample::new();
        let mut cores = BTreeMap::new();
        self.net.value.recent_bytes_recv = 0;
        self.net.value.recent_bytes_sent = 0;
        self.scraped.clear();

        for line in body.lines() {
            let line = line.trim();
            if line.len() < MIN_LINE || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(key) = fields.next() else {
                continue;
            };
            let handled = if let Some(idx) = key.strip_prefix("cpu_") {
                value(line, fields.next()).map(|v| self.cpu_fact(line, idx, v, &mut cores))
            } else if let Some(label) = key.strip_prefix("temp_") {
                value(line, fields.next()).map(|v| {
                    temps.insert(label.to_string(), v);
                })
            } else if let Some(rest) = key.strip_prefix("net_") {
                value(line, fields.next()).map(|v| self.net_fact(line, key, rest, v))
            } else if let Some(rest) = key.strip_prefix("disk_") {
                value(line, fields.next()).map(|v| self.disk_fact(line, key, rest, v))
            } else if let Some(rest) = key.strip_prefix("memory_") {
                value(line, fields.next()).map(|v| self.memory_fact(line, rest, v))
            } else {
                Some(())
            };
            if handled.is_none() {
                debug!("skipped remote line {line:?}");
            }
        }

        self.apply_cores(cores);

        // A fact missing from this scrape starts from a fresh baseline if it
        // comes back.
        let before = self.counters.len();
        self.counters.retain(|k, _| self.scraped.contains(k));
        if self.counters.len() < before {
            debug!("{}: dropped {} stale counters", self.target.name, before - self.counters.len());
        }

        self.temps.value = temps;
        self.cpu.publish();
        self.temps.publish();
        self.net.publish();
        self.disk.publish();
        self.memory.publish();
    }

    fn cpu_fact(&mut self, line: &str, idx: &str, v: f64, cores: &mut BTreeMap<usize, f64>) {
        if idx == "avg" {
            self.cpu.value.average = v;
            return;
        }
        match idx.parse::<usize>() {
            Ok(i) => {
                cores.insert(i, v);
            }
            Err(_) => warn!("bad cpu index in {line:?}"),
        }
    }

    /// Apply one scrape's cores in index order. The list only grows one core
    /// at a time, so a gap ends it.
    fn apply_cores(&mut self, cores: BTreeMap<usize, f64>) {
        for (i, v) in cores {
            if i > self.cpu.value.per_core.len() {
                warn!("{}: cpu index {i} out of range, ignoring it and any higher", self.target.name);
                break;
            }
            self.cpu.value.set_core(i, v);
        }
    }

    fn net_fact(&mut self, line: &str, key: &str, rest: &str, v: f64) {
        let Some((iface, dir)) = rest.rsplit_once('_').filter(|(i, _)| !i.is_empty()) else {
            warn!("bad network data; expected net_IFACE_recv, got {line:?}");
            return;
        };
        if dir != "recv" && dir != "sent" {
            warn!("bad network direction in {line:?}");
            return;
        }
        let Some(total) = counter(line, v) else {
            return;
        };
        let delta = self.tracker(key).observe(total);
        let net = &mut self.net.value;
        let entry = net
            .interfaces
            .entry(iface.to_string())
            .or_insert_with(|| NetworkInterface::new(iface));
        if dir == "recv" {
            entry.bytes_recv = total;
            net.recent_bytes_recv = net.recent_bytes_recv.saturating_add(delta);
            net.total_bytes_recv = net.total_bytes_recv.saturating_add(delta);
        } else {
            entry.bytes_sent = total;
            net.recent_bytes_sent = net.recent_bytes_sent.saturating_add(delta);
            net.total_bytes_sent = net.total_bytes_sent.saturating_add(delta);
        }
    }

    fn disk_fact(&mut self, line: &str, key: &str, rest: &str, v: f64) {
        let Some((kind, encoded)) = rest.split_once('_').filter(|(_, d)| !d.is_empty()) else {
            warn!("bad disk data; expected disk_KIND_DEV, got {line:?}");
            return;
        };
        let device = encoded.replace(':', "/");
        match kind {
            "freepc" => self.partition(&device).used_percent = v,
            "free" => {
                if let Some(free) = counter(line, v) {
                    self.partition(&device).free = free;
                }
            }
            "read" | "write" => {
                let Some(total) = counter(line, v) else {
                    return;
                };
                let delta = self.tracker(key).observe(total);
                let part = self.partition(&device);
                if kind == "read" {
                    part.bytes_read = total;
                    part.bytes_read_recently = delta;
                } else {
                    part.bytes_written = total;
                    part.bytes_written_recently = delta;
                }
            }
            _ => debug!("unknown disk fact {kind} in {line:?}"),
        }
    }

    fn tracker(&mut self, key: &str) -> &mut RateTracker {
        self.scraped.insert(key.to_string());
        self.counters.entry(key.to_string()).or_default()
    }

    fn partition(&mut self, device: &str) -> &mut DiskPartition {
        self.disk
            .value
            .entry(device.to_string())
            .or_insert_with(|| DiskPartition::new(device, ""))
    }

    fn memory_fact(&mut self, line: &str, rest: &str, v: f64) {
        let Some((field, region)) = rest.split_once('_').filter(|(_, r)| !r.is_empty()) else {
            warn!("bad memory data; expected e.g. memory_used_Main, got {line:?}");
            return;
        };
        let Some(bytes) = counter(line, v) else {
            return;
        };
        let info = self.memory.value.entry(region.to_string()).or_default();
        match field {
            "total" => info.set_total(bytes),
            "used" => info.set_used(bytes),
            _ => warn!("bad memory field in {line:?}"),
        }
    }

    pub fn cpu(&self) -> &CpuSample {
        &self.cpu.value
    }

    pub fn temperatures(&self) -> &TemperatureSample {
        &self.temps.value
    }

    pub fn network(&self) -> &NetworkSample {
        &self.net.value
    }

    pub fn disk(&self) -> &DiskSample {
        &self.disk.value
    }

    pub fn memory(&self) -> &MemorySample {
        &self.memory.value
    }

    pub fn subscribe_cpu(&self) -> SampleReader<CpuSample> {
        self.cpu.subscribe()
    }

    pub fn subscribe_temps(&self) -> SampleReader<TemperatureSample> {
        self.temps.subscribe()
    }

    pub fn subscribe_network(&self) -> SampleReader<NetworkSample> {
        self.net.subscribe()
    }

    pub fn subscribe_disk(&self) -> SampleReader<DiskSample> {
        self.disk.subscribe()
    }

    pub fn subscribe_memory(&self) -> SampleReader<MemorySample> {
        self.memory.subscribe()
    }
}

fn value(line: &str, field: Option<&str>) -> Option<f64> {
    let Some(raw) = field else {
        warn!("bad data; not enough columns in {line:?}");
        return None;
    };
    match raw.parse::<f64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("bad value in {line:?}: {e}");
            None
        }
    }
}

/// Byte counts arrive as floats; negatives and NaN are rejected.
fn counter(line: &str, v: f64) -> Option<u64> {
    if v.is_finite() && v >= 0.0 {
        Some(v as u64)
    } else {
        warn!("negative or non-finite byte count in {line:?}");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> Remote {
        Remote::new(RemoteTarget::new("peer", "http://127.0.0.1:9/metrics")).unwrap()
    }

    #[test]
    fn cpu_and_memory_lines() {
        let mut r = remote();
        r.process("cpu_0 42.5\ncpu_avg 10.0\nmemory_total_Main 1000\nmemory_used_Main 500\n");
        assert_eq!(r.cpu().name, "peer");
        assert_eq!(r.cpu().per_core[0], 42.5);
        assert_eq!(r.cpu().average, 10.0);
        let main = r.memory()["Main"];
        assert_eq!((main.total, main.used), (1000, 500));
        assert_eq!(main.used_percent, 50.0);
    }

    #[test]
    fn network_delta_across_scrapes() {
        let mut r = remote();
        r.process("net_eth0_recv 100\n");
        assert_eq!(r.network().recent_bytes_recv, 0);
        r.process("net_eth0_recv 150\n");
        assert_eq!(r.network().recent_bytes_recv, 50);
        assert_eq!(r.network().interfaces["eth0"].bytes_recv, 150);

        // peer restarted
        r.process("net_eth0_recv 20\n");
        assert_eq!(r.network().recent_bytes_recv, 0);
        r.process("net_eth0_recv 35\n");
        assert_eq!(r.network().recent_bytes_recv, 15);
        assert_eq!(r.network().total_bytes_recv, 65);
    }

    #[test]
    fn recent_totals_sum_over_interfaces() {
        let mut r = remote();
        r.process("net_eth0_sent 10\nnet_wg_home_sent 10\n");
        r.process("net_eth0_sent 15\nnet_wg_home_sent 30\n");
        assert_eq!(r.network().recent_bytes_sent, 25);
        assert!(r.network().interfaces.contains_key("wg_home"));
    }

    #[test]
    fn malformed_lines_do_not_stop_the_scrape() {
        let mut r = remote();
        r.process("cpu_x\ncpu_1\ncpu_q 3.0\ncpu_2 oops\n# TYPE cpu_0 gauge\nswap_used 12\ncpu_0 7.0\n");
        assert_eq!(r.cpu().per_core, vec![7.0]);
    }

    #[test]
    fn cpu_indices_are_bounded_by_the_known_cores() {
        let mut r = remote();
        r.process("cpu_1000000000000 1.0\ncpu_0 2.0\ncpu_5 3.0\n");
        assert_eq!(r.cpu().per_core, vec![2.0]);

        // Exported names sort as text, so cpu_10 arrives before cpu_2.
        let body: String = [0, 1, 10, 11, 2, 3, 4, 5, 6, 7, 8, 9]
            .iter()
            .map(|i| format!("cpu_{i} {i}\n"))
            .collect();
        r.process(&body);
        let expected: Vec<f64> = (0..12).map(f64::from).collect();
        assert_eq!(r.cpu().per_core, expected);
    }

    #[test]
    fn unknown_network_direction_is_ignored() {
        let mut r = remote();
        r.process("net_eth0_foo 5\nnet__recv 3\nnet_eth1_sent 9\n");
        assert!(!r.network().interfaces.contains_key("eth0"));
        assert_eq!(r.network().interfaces.len(), 1);
        assert_eq!(r.network().interfaces["eth1"].bytes_sent, 9);
        assert_eq!(r.counters.len(), 1);
    }

    #[test]
    fn counters_not_in_the_scrape_are_dropped() {
        let mut r = remote();
        r.process("net_eth0_recv 100\nnet_wlan0_recv 10\ndisk_read_:dev:sda 5\n");
        assert_eq!(r.counters.len(), 3);
        r.process("net_eth0_recv 150\n");
        assert_eq!(r.counters.len(), 1);
        assert_eq!(r.network().recent_bytes_recv, 50);

        // wlan0 returns with a fresh baseline rather than a jump from 10.
        r.process("net_eth0_recv 160\nnet_wlan0_recv 4000\n");
        assert_eq!(r.network().recent_bytes_recv, 10);
        assert_eq!(r.counters.len(), 2);
    }

    #[test]
    fn disk_device_names_are_decoded() {
        let mut r = remote();
        r.process("disk_freepc_:dev:sda1 55.5\ndisk_free_:dev:sda1 4096\ndisk_read_:dev:sda1 100\n");
        r.process("disk_read_:dev:sda1 160\ndisk_write_:dev:sda1 5\n");
        let p = &r.disk()["/dev/sda1"];
        assert_eq!(p.device, "/dev/sda1");
        assert_eq!(p.used_percent, 55.5);
        assert_eq!(p.free, 4096);
        assert_eq!(p.bytes_read_recently, 60);
        assert_eq!(p.bytes_written_recently, 0);
    }

    #[test]
    fn temperatures_are_replaced_each_scrape() {
        let mut r = remote();
        r.process("temp_cpu 50\ntemp_gpu 60\n");
        r.process("temp_cpu 51\n");
        assert_eq!(r.temperatures().len(), 1);
        assert_eq!(r.temperatures()["cpu"], 51.0);
    }

    #[test]
    fn bad_url_is_a_setup_error() {
        let err = Remote::new(RemoteTarget::new("x", "not a url")).err();
        assert!(matches!(err, Some(DeviceError::BadUrl { .. })));
    }

    #[test]
    fn targets_from_vars() {
        let vars = [
            ("remote-lab-url", "http://lab:8080/metrics"),
            ("remote-lab-refresh", "3"),
            ("remote-nas-url", "http://nas/metrics"),
            ("remote-nas-refresh", "soon"),
            ("remote-bogus", "x"),
            ("remote-orphan-refresh", "2"),
            ("colorscheme", "monokai"),
        ];
        let targets = RemoteTarget::from_vars(vars);
        assert_eq!(
            targets,
            [
                RemoteTarget {
                    name: "lab".into(),
                    url: "http://lab:8080/metrics".into(),
                    refresh: Some(Duration::from_secs(3)),
                },
                RemoteTarget::new("nas", "http://nas/metrics"),
            ]
        );
    }
}
