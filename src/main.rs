pub mod models {
    pub mod rachio;
}

pub mod bridge;
pub mod client;
pub mod config;
pub mod hub;
pub mod registry;
pub mod session;
pub mod utils;
pub mod nodes {
    pub mod controller;
    pub mod entity;
    pub mod flex_schedule;
    pub mod schedule;
    pub mod zone;
}
pub mod services {
    pub mod discovery;
    pub mod realtime;
}

#[cfg(test)]
mod test_support;

use crate::bridge::Bridge;
use crate::config::Config;
use crate::hub::NodeTable;
use crate::services::realtime::{self, LoopSettings};
use log::{error, info};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

/// A single hub command to run instead of the poll loop.
#[derive(Debug, Clone, PartialEq)]
struct OneShot {
    address: String,
    command: String,
    value: Option<f64>,
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    command: Option<OneShot>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        let env_value = if arg == "--env-file" {
            Some(
                args.next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            )
        } else {
            arg.strip_prefix("--env-file=").map(str::to_string)
        };
        if let Some(path) = env_value {
            if parsed.env_file.is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
            if path.is_empty() {
                return Err("`--env-file` requires a path argument".to_string());
            }
            parsed.env_file = Some(PathBuf::from(path));
            continue;
        }

        match arg.as_str() {
            "--command" => {
                let usage = "usage: --command ADDRESS COMMAND [VALUE]";
                let address = args.next().ok_or_else(|| usage.to_string())?;
                let command = args.next().ok_or_else(|| usage.to_string())?;
                let value = match args.next_if(|a| !a.starts_with("--")) {
                    Some(v) => Some(
                        v.parse::<f64>()
                            .map_err(|_| format!("command value must be a number, got {:?}", v))?,
                    ),
                    None => None,
                };
                parsed.command = Some(OneShot {
                    address: address.to_lowercase(),
                    command: command.to_uppercase(),
                    value,
                });
            }
            "--" => break,
            other => return Err(format!("unrecognised argument: {}", other)),
        }
    }
    Ok(parsed)
}

fn load_env(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }
    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if !default_path.is_file() {
        return Ok(None);
    }
    load_env_file(&default_path)?;
    Ok(Some(LoadedEnvFile {
        path: default_path,
        explicit: false,
    }))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in content.lines().enumerate() {
        let Some((key, value)) = parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Values already in the process environment win over the file.
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// `KEY=value` with optional `export `, `#` comments and single or double quotes.
fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name {:?}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let inner = &raw[1..];
            let end = inner
                .find(q)
                .ok_or_else(|| format!("unterminated {} quote", q))?;
            let rest = inner[end + 1..].trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err("unexpected characters after closing quote".to_string());
            }
            inner[..end].to_string()
        }
        _ => raw.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

fn run(one_shot: Option<OneShot>) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (api_url={}, short_poll={}s, long_poll={}s, discovery_retry={}s, request_timeout={}s)",
        cfg.api_url,
        cfg.short_poll.as_secs(),
        cfg.long_poll.as_secs(),
        cfg.discovery_retry.as_secs(),
        cfg.request_timeout.as_secs()
    );

    // 2) Hub host and bridge
    let mut host = NodeTable::new();
    let mut bridge = Bridge::new(cfg.api_url.clone(), cfg.request_timeout);

    // 3) One-shot command
    if let Some(cmd) = one_shot {
        bridge
            .discover(&mut host, &cfg.api_key)
            .map_err(|e| e.to_string())?;
        bridge
            .dispatch(&mut host, &cmd.address, &cmd.command, cmd.value)
            .map_err(|e| format!("command failed: {}", e))?;
        info!("{} on {} completed", cmd.command, cmd.address);
        return Ok(());
    }

    // 4) Poll loop (steady cadence)
    info!(
        "Starting poll loop: short={}s, long={}s",
        cfg.short_poll.as_secs(),
        cfg.long_poll.as_secs()
    );
    realtime::run_loop(
        &mut bridge,
        &mut host,
        &cfg.api_key,
        &LoopSettings {
            short_interval: cfg.short_poll,
            long_interval: cfg.long_poll,
            discovery_retry: cfg.discovery_retry,
        },
    )
}

fn main() {
    let (args, loaded_env) = match parse_args(std::env::args().skip(1))
        .and_then(|args| load_env(args.env_file.clone()).map(|env| (args, env)))
    {
        Ok(v) => v,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "rachio-bridge {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(args.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
