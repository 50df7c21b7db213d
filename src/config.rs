// src/config.rs
use std::{net::IpAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Maximum age of a ping still reported as online.
    pub freshness_window: Duration,
    pub firmware_dir: PathBuf,
    /// Upper bound on a whole remote fetch, body included.
    pub fetch_timeout: Duration,
    pub request_timeout: Duration,
    pub max_artifact_bytes: u64,
    /// Fetch linked firmware and serve it locally instead of handing the
    /// remote URL to the device.
    pub mirror_remote: bool,
    pub public_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 3000,
            freshness_window: Duration::from_millis(10_000),
            firmware_dir: PathBuf::from("./firmware"),
            fetch_timeout: Duration::from_millis(30_000),
            request_timeout: Duration::from_secs(120),
            max_artifact_bytes: 16 * 1024 * 1024,
            mirror_remote: true,
            public_base_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let d = Self::default();
        let config = Self {
            host: parse_or(&get, "HOST", d.host)?,
            port: parse_or(&get, "PORT", d.port)?,
            freshness_window: millis_or(&get, "FRESHNESS_WINDOW_MS", d.freshness_window)?,
            firmware_dir: get("FIRMWARE_DIR").map(PathBuf::from).unwrap_or(d.firmware_dir),
            fetch_timeout: millis_or(&get, "FETCH_TIMEOUT_MS", d.fetch_timeout)?,
            request_timeout: parse_or(&get, "REQUEST_TIMEOUT_SECS", d.request_timeout.as_secs())
                .map(Duration::from_secs)?,
            max_artifact_bytes: parse_or(&get, "MAX_ARTIFACT_BYTES", d.max_artifact_bytes)?,
            mirror_remote: bool_or(&get, "MIRROR_REMOTE_ARTIFACTS", d.mirror_remote)?,
            public_base_url: get("PUBLIC_BASE_URL")
                .filter(|s| !s.is_empty())
                .map(|s| s.trim_end_matches('/').to_string()),
        };
        if config.fetch_timeout >= config.request_timeout {
            return Err(anyhow!(
                "FETCH_TIMEOUT_MS ({:?}) must be shorter than REQUEST_TIMEOUT_SECS ({:?})",
                config.fetch_timeout,
                config.request_timeout
            ));
        }
        Ok(config)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(v) => v.trim().parse().with_context(|| format!("invalid {key}: {v:?}")),
        None => Ok(default),
    }
}

fn millis_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> anyhow::Result<Duration> {
    let ms: u64 = parse_or(get, key, default.as_millis() as u64)?;
    if ms == 0 {
        return Err(anyhow!("{key} must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

fn bool_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> anyhow::Result<bool> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid {key}: {v:?}")),
        },
    }
}
