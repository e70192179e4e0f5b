//! Command-line flags. Every flag overrides the matching config file value.

use std::path::PathBuf;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub interval_ms: Option<u64>,
    pub devices: Option<Vec<String>>,
    pub net: Option<Vec<String>>,
    pub temps: Option<Vec<String>>,
    pub nvidia: bool,
    /// `(name, url)` from `--remote NAME=URL`.
    pub remotes: Vec<(String, String)>,
    /// `--list net|temp|disk`: print names and exit.
    pub list: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CliError {
    /// `--help`; carries the usage text.
    Help(String),
    Invalid(String),
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--config PATH] [--port PORT|-p PORT] [--interval MS] \
         [--devices a,b,c] [--net a,!b] [--temps a*,!b] [--nvidia] \
         [--remote NAME=URL]... [--list net|temp|disk]"
    )
}

fn list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, CliError> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "hostscope_agent".into());
    let mut out = ParsedArgs::default();

    while let Some(arg) = it.next() {
        // Accept both `--flag value` and `--flag=value`.
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| {
            inline
                .clone()
                .or_else(|| it.next())
                .ok_or_else(|| CliError::Invalid(format!("{name} needs a value. {}", usage(&prog))))
        };

        match flag.as_str() {
            "-h" | "--help" => return Err(CliError::Help(usage(&prog))),
            "--config" | "-c" => out.config = Some(PathBuf::from(value("--config")?)),
            "--port" | "-p" => {
                let v = value("--port")?;
                let port = v
                    .parse::<u16>()
                    .map_err(|_| CliError::Invalid(format!("invalid port '{v}'")))?;
                out.port = Some(port);
            }
            "--interval" => {
                let v = value("--interval")?;
                let ms = v
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| CliError::Invalid(format!("invalid interval '{v}'")))?;
                out.interval_ms = Some(ms);
            }
            "--devices" => out.devices = Some(list(&value("--devices")?)),
            "--net" => out.net = Some(list(&value("--net")?)),
            "--temps" => out.temps = Some(list(&value("--temps")?)),
            "--nvidia" => out.nvidia = true,
            "--remote" => {
                let v = value("--remote")?;
                match v.split_once('=') {
                    Some((name, url)) if !name.is_empty() && !url.is_empty() => {
                        out.remotes.push((name.to_string(), url.to_string()))
                    }
                    _ => {
                        return Err(CliError::Invalid(format!(
                            "--remote expects NAME=URL, got '{v}'"
                        )))
                    }
                }
            }
            "--list" => out.list = Some(value("--list")?),
            _ => {
                return Err(CliError::Invalid(format!(
                    "Unexpected argument '{arg}'. {}",
                    usage(&prog)
                )))
            }
        }
    }
    Ok(out)
}
