use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::Context;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "neuroscan.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub batch_concurrency: usize,
    pub request_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            batch_concurrency: 1,
            request_timeout_secs: 120,
        }
    }
}

impl ClientSettings {
    pub fn base_url(&self) -> anyhow::Result<Url> {
        parse_base_url(&self.api_base_url)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// Defaults, then `neuroscan.toml` (or `path`), then environment overrides.
pub fn load_settings(path: Option<&Path>) -> ClientSettings {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let file_cfg = fs::read_to_string(path)
        .ok()
        .and_then(|raw| toml::from_str::<HashMap<String, toml::Value>>(&raw).ok())
        .unwrap_or_default();
    resolve_settings(&file_cfg, |key| std::env::var(key).ok())
}

fn value_as_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

fn resolve_settings(
    file_cfg: &HashMap<String, toml::Value>,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Some(v) = file_cfg.get("api_url").and_then(value_as_string) {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg
        .get("batch_concurrency")
        .and_then(value_as_string)
        .and_then(|v| v.parse::<usize>().ok())
    {
        settings.batch_concurrency = v;
    }
    if let Some(v) = file_cfg
        .get("request_timeout_secs")
        .and_then(value_as_string)
        .and_then(|v| v.parse::<u64>().ok())
    {
        settings.request_timeout_secs = v;
    }

    if let Some(v) = env("NEUROSCAN_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("APP__BATCH_CONCURRENCY") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.batch_concurrency = parsed;
        }
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    settings.batch_concurrency = settings.batch_concurrency.max(1);
    settings
}

pub fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let raw = raw.trim();
    let url = Url::parse(raw).with_context(|| format!("invalid service url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("service url '{raw}' must use http or https");
    }
    Ok(url)
}
