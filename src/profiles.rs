use anyhow::Result;

use crate::config::{ProfilesFile, RuntimeConfig, display_db_url};

pub fn run_profiles_list(profiles: &ProfilesFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Configured profiles (active='{}'):", cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        let source = if profiles.profiles.contains_key(&name) {
            "configured"
        } else {
            "implicit"
        };
        println!("{marker} {name} ({source})");
    }

    Ok(())
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    println!("Active profile: {}", cfg.profile);
    println!("Config path: {}", cfg.config_path);
    println!("Database URL: {}", display_db_url(cfg));
    println!(
        "Short-term memory: ttl_secs={} sweep_interval_secs={}",
        cfg.cache_ttl_secs, cfg.cache_sweep_interval_secs
    );
    println!(
        "Improvement loop: min_quality={:.2} max_iterations={}",
        cfg.min_quality, cfg.max_iterations
    );
    println!("Dispatch timeout (secs): {}", cfg.dispatch_timeout_secs);
    println!("History limit: {}", cfg.history_limit);
    println!("Telemetry enabled: {}", cfg.telemetry_enabled);
    println!("Telemetry path: {}", cfg.telemetry_path);
    Ok(())
}
