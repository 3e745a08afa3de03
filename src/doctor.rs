use anyhow::{Context, Result};

use crate::config::{RuntimeConfig, display_db_url};
use crate::store::{PersistentLog, sqlite_path_from_url};

pub async fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );
    let config_state = if std::path::Path::new(&cfg.config_path).exists() {
        "found"
    } else {
        "missing (built-in defaults in use)"
    };
    println!("Config file: {config_state}");

    println!(
        "Orchestration: min_quality={:.2} max_iterations={} dispatch_timeout_secs={}",
        cfg.min_quality, cfg.max_iterations, cfg.dispatch_timeout_secs
    );
    println!(
        "Short-term memory: ttl_secs={} sweep_interval_secs={}",
        cfg.cache_ttl_secs, cfg.cache_sweep_interval_secs
    );
    if cfg.cache_sweep_interval_secs > cfg.cache_ttl_secs {
        println!("Tip: a sweep interval longer than the TTL keeps expired entries around longer");
    }
    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );

    match sqlite_path_from_url(&cfg.db_url) {
        Some(path) if path.exists() => println!("Database file: present ({})", path.display()),
        Some(_) => println!("Database file: not created yet (will be created on first use)"),
        None => println!("Database file: in-memory (nothing persists after exit)"),
    }

    let log = PersistentLog::open(&cfg.db_url)
        .await
        .context("database check failed")?;
    let stats = log
        .conversation_stats(None)
        .await
        .context("database query check failed")?;
    log.close().await;
    println!(
        "SQLite DB check: ok ({}, {} logged messages)",
        display_db_url(cfg),
        stats.total
    );

    Ok(())
}

pub async fn run_migrate(cfg: &RuntimeConfig) -> Result<()> {
    let log = PersistentLog::open(&cfg.db_url)
        .await
        .context("failed to open database for migration")?;
    log.init_schema().await.context("schema migration failed")?;
    log.close().await;
    println!(
        "SQLite schema applied successfully: {}",
        display_db_url(cfg)
    );
    Ok(())
}
