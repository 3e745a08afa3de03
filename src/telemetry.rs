use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;

pub fn unix_ms_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Append-only JSONL event stream for one process run.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    pub enabled: bool,
    pub path: PathBuf,
    pub run_id: String,
    pub command: String,
    pub profile: String,
    file_lock: Arc<Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        Self {
            enabled: cfg.telemetry_enabled,
            path: PathBuf::from(&cfg.telemetry_path),
            run_id: format!("run-{}-{}", unix_ms_now(), std::process::id()),
            command,
            profile: cfg.profile.clone(),
            file_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
            run_id: String::new(),
            command: String::new(),
            profile: String::new(),
            file_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Payload keys are merged into the envelope; envelope keys win.
    pub fn emit(&self, event: &str, payload: Value) {
        if !self.enabled {
            return;
        }

        let mut record = match payload {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        record.insert("ts_unix_ms".to_string(), json!(unix_ms_now()));
        record.insert("event".to_string(), json!(event));
        record.insert("run_id".to_string(), json!(self.run_id));
        record.insert("command".to_string(), json!(self.command));
        record.insert("profile".to_string(), json!(self.profile));

        if let Err(err) = self.append_event_line(&Value::Object(record)) {
            tracing::warn!(
                event = event,
                path = %self.path.display(),
                error = %err,
                "telemetry write failed"
            );
        }
    }

    fn append_event_line(&self, value: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create telemetry directory '{}'", parent.display())
            })?;
        }

        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open telemetry path '{}'", self.path.display()))?;
        serde_json::to_writer(&mut file, value)
            .with_context(|| format!("failed to serialize telemetry event for '{}'", self.command))?;
        writeln!(file).context("failed to write telemetry newline")
    }
}

#[derive(Debug, Default)]
pub struct TaskLifecycle {
    pub created: usize,
    pub executed: usize,
    pub failed: usize,
    pub improved: usize,
    pub discussions: usize,
    pub degraded_slots: u64,
    score_sum: f64,
    scored: usize,
}

impl TaskLifecycle {
    pub fn mean_score(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.score_sum / self.scored as f64)
    }
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub unique_runs: BTreeSet<String>,
    pub command_counts: BTreeMap<String, usize>,
    pub command_completed: usize,
    pub command_failed: usize,
    pub tasks: TaskLifecycle,
    pub last_event_ts_unix_ms: Option<u128>,
}

impl TelemetrySummary {
    /// Most frequent commands first, ties by name.
    pub fn top_commands(&self, n: usize) -> Vec<(&str, usize)> {
        let mut commands = self
            .command_counts
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect::<Vec<_>>();
        commands.sort_by_key(|(name, count)| (std::cmp::Reverse(*count), *name));
        commands.truncate(n);
        commands
    }
}

/// Summarizes the newest `limit` lines.
pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary {
        total_lines: lines.len(),
        ..TelemetrySummary::default()
    };

    for line in lines.iter().rev().take(limit.max(1)) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<Value>(line) else {
            summary.parse_errors += 1;
            continue;
        };
        summary.parsed_events += 1;

        if let Some(run_id) = parsed.get("run_id").and_then(Value::as_str)
            && !run_id.is_empty()
        {
            summary.unique_runs.insert(run_id.to_string());
        }
        if let Some(ts) = parsed.get("ts_unix_ms").and_then(Value::as_u64) {
            let ts = u128::from(ts);
            summary.last_event_ts_unix_ms =
                Some(summary.last_event_ts_unix_ms.map_or(ts, |last| last.max(ts)));
        }

        let event = parsed.get("event").and_then(Value::as_str).unwrap_or_default();
        if event.starts_with("command.")
            && let Some(command) = parsed.get("command").and_then(Value::as_str)
            && !command.is_empty()
        {
            *summary.command_counts.entry(command.to_string()).or_default() += 1;
        }

        let tasks = &mut summary.tasks;
        match event {
            "command.completed" => summary.command_completed += 1,
            "command.failed" => summary.command_failed += 1,
            "task.created" => tasks.created += 1,
            "task.executed" => {
                tasks.executed += 1;
                tasks.degraded_slots += parsed
                    .get("degraded_slots")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                if let Some(score) = parsed.get("score").and_then(Value::as_f64) {
                    tasks.score_sum += score;
                    tasks.scored += 1;
                }
            }
            "task.failed" => tasks.failed += 1,
            "task.improved" => tasks.improved += 1,
            "discussion.concluded" => tasks.discussions += 1,
            _ => {}
        }
    }

    summary
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    if !path.exists() {
        println!("No telemetry file found at '{}'.", path.display());
        return Ok(());
    }

    let file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open telemetry file '{}'", path.display()))?;
    let lines = io::BufReader::new(file)
        .lines()
        .collect::<io::Result<Vec<String>>>()
        .with_context(|| format!("failed to read telemetry file '{}'", path.display()))?;

    let summary = summarize_telemetry_lines(lines, limit);
    let tasks = &summary.tasks;

    println!("Telemetry report");
    println!("Path: {}", path.display());
    println!("Lines in file: {}", summary.total_lines);
    println!(
        "Events analyzed: {} (parse_errors={})",
        summary.parsed_events, summary.parse_errors
    );
    println!("Unique runs: {}", summary.unique_runs.len());
    println!(
        "Command outcomes: completed={} failed={}",
        summary.command_completed, summary.command_failed
    );
    println!(
        "Task lifecycle: created={} executed={} failed={} improved={} discussions={}",
        tasks.created, tasks.executed, tasks.failed, tasks.improved, tasks.discussions
    );
    println!("Degraded slots: {}", tasks.degraded_slots);
    if let Some(mean) = tasks.mean_score() {
        println!("Mean quality score: {mean:.2}");
    }

    let top = summary.top_commands(5);
    if !top.is_empty() {
        println!("Top commands:");
        for (name, count) in top {
            println!("- {name}: {count}");
        }
    }
    if let Some(last_ts) = summary.last_event_ts_unix_ms {
        println!("Last event ts_unix_ms: {last_ts}");
    }

    Ok(())
}
