use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_DB_URL: &str = "sqlite://.agent-hub/agent_hub.db";
pub const DEFAULT_TELEMETRY_PATH: &str = ".agent-hub/telemetry/events.jsonl";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub db_url: String,
    pub cache_ttl_secs: u64,
    pub cache_sweep_interval_secs: u64,
    pub min_quality: f64,
    pub max_iterations: u32,
    pub dispatch_timeout_secs: u64,
    pub history_limit: usize,
    pub show_sensitive_config: bool,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub db_url: Option<String>,
    pub cache_ttl_secs: Option<u64>,
    pub cache_sweep_interval_secs: Option<u64>,
    pub min_quality: Option<f64>,
    pub max_iterations: Option<u32>,
    pub dispatch_timeout_secs: Option<u64>,
    pub history_limit: Option<usize>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check field names and value types.",
            path.display()
        )
    })
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let cache_ttl_secs = cli
        .cache_ttl_secs
        .or(profile.cache_ttl_secs)
        .unwrap_or(3600)
        .max(1);
    let min_quality = cli.min_quality.or(profile.min_quality).unwrap_or(0.7);
    if !min_quality.is_finite() {
        return Err(anyhow::anyhow!("min_quality must be a number between 0 and 1"));
    }

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        db_url: cli
            .db_url
            .clone()
            .or(profile.db_url)
            .unwrap_or_else(|| DEFAULT_DB_URL.to_string()),
        cache_ttl_secs,
        cache_sweep_interval_secs: cli
            .cache_sweep_interval_secs
            .or(profile.cache_sweep_interval_secs)
            .unwrap_or(cache_ttl_secs)
            .max(1),
        min_quality: min_quality.clamp(0.0, 1.0),
        max_iterations: cli
            .max_iterations
            .or(profile.max_iterations)
            .unwrap_or(3)
            .max(1),
        dispatch_timeout_secs: cli
            .dispatch_timeout_secs
            .or(profile.dispatch_timeout_secs)
            .unwrap_or(60)
            .max(1),
        history_limit: cli
            .history_limit
            .or(profile.history_limit)
            .unwrap_or(20)
            .max(1),
        show_sensitive_config: cli.show_sensitive_config,
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| DEFAULT_TELEMETRY_PATH.to_string()),
    })
}

pub fn display_db_url(cfg: &RuntimeConfig) -> String {
    if cfg.show_sensitive_config {
        cfg.db_url.clone()
    } else {
        format!(
            "{} (set --show-sensitive-config to reveal)",
            crate::error::redact_sqlite_url_value(&cfg.db_url)
        )
    }
}
