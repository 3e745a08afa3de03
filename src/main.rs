use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;

use agent_hub::cli::{Cli, Commands, HistoryCommands, ProfileCommands, TelemetryCommands, command_label};
use agent_hub::commands;
use agent_hub::config::{ProfilesFile, RuntimeConfig, load_profiles, resolve_runtime_config};
use agent_hub::doctor::{run_doctor, run_migrate};
use agent_hub::error::{categorize_error, format_cli_error};
use agent_hub::hub::AgentHub;
use agent_hub::interactive::run_interactive;
use agent_hub::profiles::{run_profiles_list, run_profiles_show};
use agent_hub::server::run_server;
use agent_hub::telemetry::{TelemetrySink, run_telemetry_report};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let show_sensitive = cli.show_sensitive_config;
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err, show_sensitive));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let command = cli.command.unwrap_or(Commands::Interactive);

    let telemetry = TelemetrySink::new(&cfg, command_label(&command));
    let started = Instant::now();
    let outcome = run_command(command, &cfg, &profiles, &telemetry).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        Ok(()) => telemetry.emit("command.completed", json!({ "duration_ms": elapsed_ms })),
        Err(err) => telemetry.emit(
            "command.failed",
            json!({
                "duration_ms": elapsed_ms,
                "category": categorize_error(err).code(),
                "error": format_cli_error(err, false),
            }),
        ),
    }
    outcome
}

async fn run_command(
    command: Commands,
    cfg: &RuntimeConfig,
    profiles: &ProfilesFile,
    telemetry: &TelemetrySink,
) -> Result<()> {
    match &command {
        Commands::Profiles { command } => match command {
            ProfileCommands::List => return run_profiles_list(profiles, cfg),
            ProfileCommands::Show => return run_profiles_show(cfg),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => {
                return run_telemetry_report(cfg, path.clone(), *limit);
            }
        },
        Commands::Doctor => return run_doctor(cfg).await,
        Commands::Migrate => return run_migrate(cfg).await,
        _ => {}
    }

    let hub = Arc::new(AgentHub::open(cfg, Some(telemetry.clone())).await?);
    let team = hub.initialize_team();
    tracing::info!(agents = team.len(), "agent team ready");

    let outcome = match command {
        Commands::Task {
            description,
            improve,
            min_quality,
            max_iterations,
        } => {
            commands::run_task(&hub, &description.join(" "), improve, min_quality, max_iterations)
                .await
        }
        Commands::Plan { description } => commands::run_plan(&hub, &description.join(" ")).await,
        Commands::Send { from, to, message } => {
            commands::run_send(&hub, &from, &to, &message.join(" ")).await
        }
        Commands::Broadcast {
            from,
            exclude,
            message,
        } => commands::run_broadcast(&hub, &from, &message.join(" "), &exclude).await,
        Commands::Agents => commands::run_agents(&hub),
        Commands::History { command } => match command {
            HistoryCommands::Conversations {
                agent,
                with_agent,
                search,
                limit,
            } => {
                commands::run_history_conversations(
                    &hub,
                    agent.as_deref(),
                    with_agent.as_deref(),
                    search.as_deref(),
                    limit.unwrap_or(cfg.history_limit).max(1),
                )
                .await
            }
            HistoryCommands::Memories {
                agent,
                memory_type,
                search,
                since_secs,
                limit,
            } => {
                commands::run_history_memories(
                    &hub,
                    &agent,
                    memory_type,
                    search.as_deref(),
                    since_secs,
                    limit.unwrap_or(cfg.history_limit).max(1),
                )
                .await
            }
            HistoryCommands::Planning { task_id } => {
                commands::run_history_planning(&hub, &task_id).await
            }
        },
        Commands::Export { agent, format } => {
            commands::run_export(&hub, agent.as_deref(), format).await
        }
        Commands::Stats { agent } => commands::run_stats(&hub, agent.as_deref()).await,
        Commands::Clear {
            target,
            agent,
            force,
        } => commands::run_clear(&hub, target, agent.as_deref(), force).await,
        Commands::Interactive => {
            run_interactive(&hub, cfg.history_limit, cfg.show_sensitive_config, telemetry).await
        }
        Commands::Serve { host, port } => {
            run_server(hub.clone(), host, port, cfg.history_limit, telemetry).await
        }
        Commands::Profiles { .. }
        | Commands::Telemetry { .. }
        | Commands::Doctor
        | Commands::Migrate => Ok(()),
    };

    hub.shutdown().await;
    outcome
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
