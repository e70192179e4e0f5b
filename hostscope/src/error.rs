//! Error types shared by every device.

use std::fmt;

use thiserror::Error;

/// Everything a device can report from construction or from `update`.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("{what} unavailable: {reason}")]
    Sensor { what: &'static str, reason: String },

    #[error("no batteries")]
    NoBatteries,

    #[error("battery query failed: {0}")]
    Battery(#[from] battery::Error),

    #[error("could not run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("bad remote URL {url}: {source}")]
    BadUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("error pulling remote {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unsuccessful connection to {url}: http status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

impl DeviceError {
    pub(crate) fn sensor(what: &'static str, reason: impl fmt::Display) -> Self {
        DeviceError::Sensor {
            what,
            reason: reason.to_string(),
        }
    }
}

/// A device that could not be brought up at startup.
#[derive(Debug, Error)]
#[error("device {device}: {source}")]
pub struct SetupError {
    pub device: String,
    #[source]
    pub source: DeviceError,
}

/// Column-level problems found while reading GPU tool rows. Parsing carries on
/// past a bad row; this collects what went wrong, keyed by row index.
#[derive(Debug, Default, Error)]
pub struct GpuParseError {
    pub rows: Vec<GpuRowError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuRowError {
    pub row: usize,
    pub column: usize,
    pub reason: String,
}

impl GpuParseError {
    pub(crate) fn push(&mut self, row: usize, column: usize, reason: impl fmt::Display) {
        self.rows.push(GpuRowError {
            row,
            column,
            reason: reason.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for GpuParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bad GPU field(s)", self.rows.len())?;
        for e in &self.rows {
            write!(f, "; row {} col {}: {}", e.row, e.column, e.reason)?;
        }
        Ok(())
    }
}
