//! Metrics export surface.
//!
//! Devices register read closures once (`enable_metrics`); the sink calls them
//! whenever it is scraped. Each closure reads a snapshot owned by exactly one
//! device, so the only shared write is registration itself.

use std::sync::{Mutex, PoisonError};

use prometheus::core::{Collector, Desc};
use prometheus::proto::{MetricFamily, MetricType};
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};
use tracing::warn;

pub type ReadFn = Box<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// Anything device values can be registered into.
pub trait MetricsSink: Send + Sync {
    fn register(&self, name: String, kind: MetricKind, read: ReadFn);

    fn gauge(&self, name: String, read: ReadFn) {
        self.register(name, MetricKind::Gauge, read);
    }

    fn counter(&self, name: String, read: ReadFn) {
        self.register(name, MetricKind::Counter, read);
    }
}

/// Build an exported metric name: parts joined by `_`, with `-`, spaces and
/// any other character a metric name cannot hold turned into `:`.
pub fn metric_name<I>(parts: I) -> String
where
    I: IntoIterator,
    I::Item: std::fmt::Display,
{
    let joined = parts
        .into_iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("_");
    joined
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { ':' })
        .collect()
}

/// Prometheus registry whose values are read from device snapshots at
/// gather time.
#[derive(Default)]
pub struct MetricSet {
    registry: Registry,
}

/// One registered value. Collecting it calls `read` and stores the result in
/// the wrapped metric before handing that metric's family to the registry.
struct ReadOnGather {
    metric: Metric,
    read: ReadFn,
    // Serialises the read-compare-increment of counters across gathers.
    update: Mutex<()>,
}

enum Metric {
    Gauge(Gauge),
    Counter(Counter),
}

impl Metric {
    fn new(name: &str, kind: MetricKind) -> prometheus::Result<Self> {
        let opts = Opts::new(name, format!("hostscope {}", kind.as_str()));
        Ok(match kind {
            MetricKind::Gauge => Metric::Gauge(Gauge::with_opts(opts)?),
            MetricKind::Counter => Metric::Counter(Counter::with_opts(opts)?),
        })
    }
}

impl Collector for ReadOnGather {
    fn desc(&self) -> Vec<&Desc> {
        match &self.metric {
            Metric::Gauge(g) => g.desc(),
            Metric::Counter(c) => c.desc(),
        }
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        let v = (self.read)();
        match &self.metric {
            Metric::Gauge(g) => {
                g.set(v);
                g.collect()
            }
            Metric::Counter(c) => {
                // Counters only move forward; a source reset starts them over.
                let cur = c.get();
                if v >= cur {
                    c.inc_by(v - cur);
                } else if v >= 0.0 {
                    c.reset();
                    c.inc_by(v);
                }
                c.collect()
            }
        }
    }
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registry.gather().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect()
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        let families = self.registry.gather();
        let family = families.iter().find(|f| f.get_name() == name)?;
        let m = family.get_metric().first()?;
        Some(match family.get_field_type() {
            MetricType::COUNTER => m.get_counter().get_value(),
            _ => m.get_gauge().get_value(),
        })
    }

    /// Text exposition format, sorted by name.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            warn!("encoding metrics failed: {e}");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl MetricsSink for MetricSet {
    fn register(&self, name: String, kind: MetricKind, read: ReadFn) {
        let metric = match Metric::new(&name, kind) {
            Ok(m) => m,
            Err(e) => {
                warn!("metric {name} not exported: {e}");
                return;
            }
        };
        let collector = Box::new(ReadOnGather {
            metric,
            read,
            update: Mutex::new(()),
        });
        match self.registry.register(collector) {
            Ok(()) => {}
            Err(prometheus::Error::AlreadyReg) => {
                warn!("metric {name} registered twice; keeping the first");
            }
            Err(e) => warn!("metric {name} not exported: {e}"),
        }
    }
}

impl std::fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSet")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn names_are_protocol_safe() {
        assert_eq!(metric_name(["cpu", "avg"]), "cpu_avg");
        assert_eq!(metric_name(["gpu", "GeForce GTX-1080"]), "gpu_GeForce:GTX:1080");
        assert_eq!(metric_name(vec!["disk".to_string(), "free".into(), ":dev:sda1".into()]), "disk_free_:dev:sda1");
        assert_eq!(metric_name(["temp", "acpitz (1)"]), "temp_acpitz::1:");
        assert_eq!(metric_name([1, 2]), "1_2");
    }

    #[test]
    fn render_reads_closures_at_scrape_time() {
        let set = MetricSet::new();
        let v = Arc::new(AtomicU64::new(1));
        let vc = v.clone();
        set.gauge("b_metric".into(), Box::new(move || vc.load(Ordering::Relaxed) as f64));
        set.counter("a_metric".into(), Box::new(|| 42.5));
        v.store(9, Ordering::Relaxed);

        let text = set.render();
        let a = text.find("# TYPE a_metric counter\na_metric 42.5\n").unwrap();
        let b = text.find("# TYPE b_metric gauge\nb_metric 9\n").unwrap();
        assert!(a < b);
        assert_eq!(set.value("b_metric"), Some(9.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn counters_follow_source_resets() {
        let set = MetricSet::new();
        let v = Arc::new(AtomicU64::new(100));
        let vc = v.clone();
        set.counter("bytes".into(), Box::new(move || vc.load(Ordering::Relaxed) as f64));
        assert_eq!(set.value("bytes"), Some(100.0));
        v.store(250, Ordering::Relaxed);
        assert_eq!(set.value("bytes"), Some(250.0));
        v.store(7, Ordering::Relaxed);
        assert_eq!(set.value("bytes"), Some(7.0));
    }

    #[test]
    fn invalid_and_duplicate_names_are_skipped() {
        let set = MetricSet::new();
        set.gauge("temp_acpitz(1)".into(), Box::new(|| 1.0));
        set.gauge("dup".into(), Box::new(|| 1.0));
        set.gauge("dup".into(), Box::new(|| 2.0));
        assert_eq!(set.names(), ["dup"]);
        assert_eq!(set.value("dup"), Some(1.0));
    }

    #[test]
    fn rendered_text_is_readable_by_the_line_protocol() {
        let set = MetricSet::new();
        set.gauge("cpu_avg".into(), Box::new(|| 12.5));
        let text = set.render();
        let facts: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(facts, ["cpu_avg 12.5"]);
    }
}
