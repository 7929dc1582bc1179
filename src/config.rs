use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::time::Duration;
use url::Url;

use crate::api::AVELON_API_BASE;
use crate::cli::Args;
use crate::model::Device;

const DEFAULT_FETCH_INTERVAL_SECONDS: u64 = 60 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_HTTP_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub devices: Vec<Device>,
    pub api_base: Url,
    pub fetch_interval: Duration,
    pub request_timeout: Duration,
    pub http_bind: String,
}

impl Config {
    /// Reads `.env` (if present) and the process environment, then applies CLI overrides.
    pub fn load(args: &Args) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_env()?;
        config.apply_args(args)?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let device_list = env_optional("DEVICE_LIST")
            .ok_or_else(|| anyhow!("DEVICE_LIST not specified, aborting"))?;
        let devices = parse_device_list(&device_list)?;

        let api_base = parse_api_base(&env_string(
            "AVELON_API_BASE",
            Some(AVELON_API_BASE.to_string()),
        )?)?;

        let fetch_interval = Duration::from_secs(positive(
            "AVELON_FETCH_INTERVAL_SECONDS",
            env_u64(
                "AVELON_FETCH_INTERVAL_SECONDS",
                Some(DEFAULT_FETCH_INTERVAL_SECONDS),
            )?,
        )?);
        let request_timeout = Duration::from_secs(positive(
            "AVELON_REQUEST_TIMEOUT_SECONDS",
            env_u64(
                "AVELON_REQUEST_TIMEOUT_SECONDS",
                Some(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            )?,
        )?);

        let http_bind = env_string(
            "AVELON_EXPORTER_HTTP_BIND",
            Some(DEFAULT_HTTP_BIND.to_string()),
        )?;

        Ok(Self {
            devices,
            api_base,
            fetch_interval,
            request_timeout,
            http_bind,
        })
    }

    pub fn apply_args(&mut self, args: &Args) -> Result<()> {
        if let Some(bind) = args
            .bind
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            self.http_bind = bind.to_string();
        }
        if let Some(base) = args.api_base.as_deref() {
            self.api_base = parse_api_base(base)?;
        }
        if let Some(secs) = args.fetch_interval_seconds {
            self.fetch_interval =
                Duration::from_secs(positive("--fetch-interval-seconds", secs)?);
        }
        Ok(())
    }
}

/// Splits a comma-separated list of activation codes, dropping blanks and repeats.
pub fn parse_device_list(raw: &str) -> Result<Vec<Device>> {
    let mut devices: Vec<Device> = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|code| !code.is_empty()) {
        if devices.iter().any(|device| device.activation_code() == code) {
            tracing::warn!(
                activation_code = code,
                "duplicate device in DEVICE_LIST; ignoring"
            );
            continue;
        }
        tracing::info!(activation_code = code, "setting up device");
        devices.push(Device::new(code));
    }
    if devices.is_empty() {
        bail!("DEVICE_LIST contains no activation codes, aborting");
    }
    Ok(devices)
}

fn parse_api_base(raw: &str) -> Result<Url> {
    let url =
        Url::parse(raw.trim()).with_context(|| format!("invalid AVELON_API_BASE {raw:?}"))?;
    if url.cannot_be_a_base() {
        bail!("AVELON_API_BASE {raw:?} cannot be used as a base URL");
    }
    Ok(url)
}

fn positive(key: &str, value: u64) -> Result<u64> {
    if value == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(value)
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        _ => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
