//! Include/exclude name lists for network interfaces and temperature sensors.
//!
//! Rules, in order:
//! 1. A name matching any `!pattern` is excluded, wherever it appears in the list.
//! 2. Otherwise, if there are inclusion patterns, the name must match one.
//! 3. Otherwise (no inclusions, only exclusions, or `all`) the name is included.

/// Interfaces whose names start with this are treated as VPN tunnels.
pub const VPN_PREFIX: &str = "tun";

pub fn is_vpn(name: &str) -> bool {
    name.starts_with(VPN_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStyle {
    /// Pattern must equal the name.
    Exact,
    /// A trailing `*` matches any suffix; other patterns must equal the name.
    PrefixGlob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    includes: Vec<String>,
    excludes: Vec<String>,
    style: MatchStyle,
    exclude_vpn: bool,
}

impl FilterRule {
    pub fn new<I, S>(patterns: I, style: MatchStyle) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        for p in patterns {
            let p = p.as_ref().trim();
            if p.is_empty() || p == "all" {
                continue;
            }
            match p.strip_prefix('!') {
                Some(ex) => excludes.push(ex.to_string()),
                None => includes.push(p.to_string()),
            }
        }
        Self {
            includes,
            excludes,
            style,
            exclude_vpn: false,
        }
    }

    /// Exact-match rule for interface names.
    pub fn interfaces<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(patterns, MatchStyle::Exact)
    }

    /// Prefix-glob rule for sensor labels (`coretemp*`).
    pub fn sensors<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(patterns, MatchStyle::PrefixGlob)
    }

    /// Also drop VPN tunnel interfaces, regardless of the pattern list.
    pub fn exclude_vpn(mut self, on: bool) -> Self {
        self.exclude_vpn = on;
        self
    }

    pub fn allows(&self, name: &str) -> bool {
        if self.exclude_vpn && is_vpn(name) {
            return false;
        }
        if self.excludes.iter().any(|p| self.matches(p, name)) {
            return false;
        }
        self.includes.is_empty() || self.includes.iter().any(|p| self.matches(p, name))
    }

    fn matches(&self, pattern: &str, name: &str) -> bool {
        match self.style {
            MatchStyle::Exact => pattern == name,
            MatchStyle::PrefixGlob => match pattern.strip_suffix('*') {
                Some(prefix) => name.starts_with(prefix),
                None => pattern == name,
            },
        }
    }
}

impl Default for FilterRule {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>(), MatchStyle::Exact)
    }
}
