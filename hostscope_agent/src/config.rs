//! Agent configuration: JSON file plus command-line overrides.
//! Stored under XDG config dir: $XDG_CONFIG_HOME/hostscope/agent.json (fallback ~/.config/hostscope/agent.json)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use anyhow::{ensure, Context, Result};
use hostscope::{FilterRule, RemoteTarget, StartupConfig};
use serde::{Deserialize, Serialize};

use crate::cli::ParsedArgs;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub devices: Vec<String>,
    pub update_interval_ms: u64,
    pub net_interfaces: Vec<String>,
    pub exclude_vpn: bool,
    pub temps: Vec<String>,
    pub nvidia: bool,
    pub per_cpu: bool,
    /// Port for `/metrics`; `null` turns the HTTP endpoint off.
    pub export_port: Option<u16>,
    pub remotes: Vec<RemoteEntry>,
    /// Extension variables such as `remote-NAME-url` / `remote-NAME-refresh`.
    pub vars: BTreeMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            devices: hostscope::devices::LOCAL_DEVICES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            update_interval_ms: 1000,
            net_interfaces: Vec::new(),
            exclude_vpn: false,
            temps: Vec::new(),
            nvidia: false,
            per_cpu: true,
            export_port: Some(DEFAULT_PORT),
            remotes: Vec::new(),
            vars: BTreeMap::new(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("hostscope")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hostscope")
    }
}

pub fn config_path() -> PathBuf {
    config_dir().join("agent.json")
}

/// Read `path` (or the default location). A missing file means defaults; a
/// file that does not parse is an error.
pub fn load(path: Option<&Path>) -> Result<AgentConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let cfg = match fs::read_to_string(&path) {
        Ok(s) => serde_json::from_str(&s)
            .with_context(|| format!("parsing config {}", path.display()))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("no config at {}, using defaults", path.display());
            AgentConfig::default()
        }
        Err(e) => return Err(e).with_context(|| format!("reading config {}", path.display())),
    };
    Ok(cfg)
}

impl AgentConfig {
    pub fn apply_args(&mut self, args: &ParsedArgs) {
        if let Some(port) = args.port {
            self.export_port = Some(port);
        }
        if let Some(ms) = args.interval_ms {
            self.update_interval_ms = ms;
        }
        if let Some(d) = &args.devices {
            self.devices = d.clone();
        }
        if let Some(n) = &args.net {
            self.net_interfaces = n.clone();
        }
        if let Some(t) = &args.temps {
            self.temps = t.clone();
        }
        self.nvidia |= args.nvidia;
        for (name, url) in &args.remotes {
            self.vars.insert(format!("remote-{name}-url"), url.clone());
        }
    }

    /// Listed remotes first, then any defined through `vars`. A name defined
    /// both ways keeps the listed entry.
    pub fn remote_targets(&self) -> Vec<RemoteTarget> {
        let mut targets: Vec<RemoteTarget> = self
            .remotes
            .iter()
            .map(|r| RemoteTarget {
                name: r.name.clone(),
                url: r.url.clone(),
                refresh: r.refresh_secs.map(Duration::from_secs),
            })
            .collect();
        let from_vars = RemoteTarget::from_vars(self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        for t in from_vars {
            if !targets.iter().any(|e| e.name == t.name) {
                targets.push(t);
            }
        }
        targets
    }

    pub fn startup_config(&self) -> Result<StartupConfig> {
        ensure!(self.update_interval_ms > 0, "update_interval_ms must be positive");
        Ok(StartupConfig {
            devices: self.devices.clone(),
            interval: Duration::from_millis(self.update_interval_ms),
            net_filter: FilterRule::interfaces(self.net_interfaces.iter().map(String::as_str))
                .exclude_vpn(self.exclude_vpn),
            temp_filter: FilterRule::sensors(self.temps.iter().map(String::as_str)),
            per_cpu: self.per_cpu,
            nvidia: self.nvidia,
            remotes: self.remote_targets(),
        })
    }
}
