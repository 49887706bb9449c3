use crate::app_url::resolve_compute_base_url;
use crate::models::{DEFAULT_FEE_RATE, DEFAULT_SLIPPAGE_RATE};
use crate::orchestrator::DEFAULT_DEBOUNCE;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_SYMBOL: &str = "AAPL";
pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const MAX_DEBOUNCE_MS: usize = 60_000;

/// Keys read from the process environment before database settings are merged in.
const ENV_KEYS: [&str; 10] = [
    "COMPUTE_API_URL",
    "COMPUTE_API_SECRET",
    "DOMAIN",
    "DEBOUNCE_MS",
    "DEFAULT_FEE_RATE",
    "DEFAULT_SLIPPAGE_RATE",
    "DEFAULT_SYMBOL",
    "LLM_API_URL",
    "LLM_MODEL",
    "LLM_API_KEY",
];

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub compute_api_url: String,
    pub compute_api_secret: Option<String>,
    pub debounce: Duration,
    pub default_fee_rate: f64,
    pub default_slippage_rate: f64,
    pub default_symbol: String,
    pub llm_api_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
}

impl RuntimeSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let compute_api_url = resolve_compute_base_url(settings).ok_or_else(|| {
            anyhow!("Missing required setting COMPUTE_API_URL (or DOMAIN to derive it)")
        })?;
        let debounce_ms = optional_setting_usize(
            settings,
            "DEBOUNCE_MS",
            DEFAULT_DEBOUNCE.as_millis() as usize,
            0,
            MAX_DEBOUNCE_MS,
        )?;
        let default_fee_rate =
            optional_setting_rate(settings, "DEFAULT_FEE_RATE", DEFAULT_FEE_RATE)?;
        let default_slippage_rate =
            optional_setting_rate(settings, "DEFAULT_SLIPPAGE_RATE", DEFAULT_SLIPPAGE_RATE)?;
        let default_symbol = optional_setting(settings, "DEFAULT_SYMBOL")
            .unwrap_or(DEFAULT_SYMBOL)
            .to_uppercase();
        let llm_api_url = optional_setting(settings, "LLM_API_URL")
            .unwrap_or(DEFAULT_LLM_API_URL)
            .trim_end_matches('/')
            .to_string();
        let llm_model = optional_setting(settings, "LLM_MODEL")
            .unwrap_or(DEFAULT_LLM_MODEL)
            .to_string();

        Ok(Self {
            compute_api_url,
            compute_api_secret: optional_setting(settings, "COMPUTE_API_SECRET").map(str::to_string),
            debounce: Duration::from_millis(debounce_ms as u64),
            default_fee_rate,
            default_slippage_rate,
            default_symbol,
            llm_api_url,
            llm_model,
            llm_api_key: optional_setting(settings, "LLM_API_KEY").map(str::to_string),
        })
    }
}

/// Settings present in the environment. Database settings override these.
pub fn settings_from_env() -> HashMap<String, String> {
    ENV_KEYS
        .iter()
        .filter_map(|key| {
            std::env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(|value| (key.to_string(), value))
        })
        .collect()
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

pub fn require_setting_date(settings: &HashMap<String, String>, key: &str) -> Result<NaiveDate> {
    let raw = require_setting(settings, key)?;
    parse_date(raw).map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("'{}' is not a date in YYYY-MM-DD format", raw.trim()))
}

/// Fractional cost in [0, 1).
fn optional_setting_rate(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if !(0.0..1.0).contains(&value) {
        return Err(anyhow!(
            "Setting {} must be >= 0 and < 1 (value: {})",
            key,
            raw
        ));
    }
    Ok(value)
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 || value > max as f64 {
        return Err(anyhow!(
            "Setting {} must be between {} and {} (value: {})",
            key,
            min,
            max,
            raw
        ));
    }
    Ok(value as usize)
}
