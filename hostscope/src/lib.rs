//! hostscope: host metrics collection.
//!
//! Local OS sensors, `nvidia-smi` output and other hostscope instances are
//! all adapted into the same per-domain samples. Each source is a
//! [`devices::Device`]; the [`registry`] refreshes every device on its own
//! tokio task, and readers follow the results through watch channels.

pub mod devices;
pub mod error;
pub mod filter;
pub mod rate;
pub mod registry;
pub mod sink;
pub mod snapshot;
pub mod types;

pub use devices::{available_names, Device, RemoteTarget, SampleReaders};
pub use error::{DeviceError, SetupError};
pub use filter::FilterRule;
pub use registry::{startup, Registry, RunningRegistry, StartupConfig};
pub use sink::{MetricSet, MetricsSink};
