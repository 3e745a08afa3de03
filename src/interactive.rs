use std::io::{self, Write};

use anyhow::{Context, Result};
use serde_json::json;

use crate::agents::AgentType;
use crate::error::format_cli_error;
use crate::hub::AgentHub;
use crate::orchestrator::TaskResults;
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Task(String),
    Improve(String),
    Agents,
    Send {
        from: String,
        to: String,
        message: String,
    },
    History(String),
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedShellCommand {
    Empty,
    Command(ShellCommand),
    MissingArgument { usage: &'static str },
    UnknownCommand(String),
}

pub fn parse_shell_command(input: &str) -> ParsedShellCommand {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ParsedShellCommand::Empty;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts
        .next()
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    let require = |usage: &'static str, build: fn(String) -> ShellCommand| {
        if arg.is_empty() {
            ParsedShellCommand::MissingArgument { usage }
        } else {
            ParsedShellCommand::Command(build(arg.to_string()))
        }
    };

    match command.as_str() {
        "exit" | "quit" => ParsedShellCommand::Command(ShellCommand::Exit),
        "help" => ParsedShellCommand::Command(ShellCommand::Help),
        "agents" => ParsedShellCommand::Command(ShellCommand::Agents),
        "task" => require("task <description>", ShellCommand::Task),
        "improve" => require("improve <task-id>", ShellCommand::Improve),
        "history" => require("history <agent-id>", ShellCommand::History),
        "send" => {
            let mut fields = arg.splitn(3, char::is_whitespace);
            match (fields.next(), fields.next(), fields.next().map(str::trim)) {
                (Some(from), Some(to), Some(message)) if !from.is_empty() && !message.is_empty() => {
                    ParsedShellCommand::Command(ShellCommand::Send {
                        from: from.to_string(),
                        to: to.trim().to_string(),
                        message: message.to_string(),
                    })
                }
                _ => ParsedShellCommand::MissingArgument {
                    usage: "send <from> <to> <message>",
                },
            }
        }
        other => ParsedShellCommand::UnknownCommand(other.to_string()),
    }
}

pub fn print_shell_help() {
    println!("Commands:");
    println!("- task <description>: create a task and run the agent team on it");
    println!("- improve <task-id>: run the discussion/re-execution loop on a task");
    println!("- agents: list registered agents");
    println!("- send <from> <to> <message>: send a message to an agent");
    println!("- history <agent-id>: show recent conversations for an agent");
    println!("- help: show this reference");
    println!("- exit: leave the shell");
}

pub fn print_task_report(task_id: &str, results: &TaskResults, score: Option<f64>, iterations: u32) {
    println!("Task {task_id} (iterations={iterations})");
    for (agent_type, slot) in results {
        let marker = if slot.is_degraded() { " [degraded]" } else { "" };
        println!("\n== {}{marker} ==", agent_type.title());
        println!("{}", slot.text());
    }
    if let Some(score) = score {
        println!("\nQuality score: {score:.2}");
    }
}

pub fn print_agents(hub: &AgentHub) {
    let infos = hub.registry().infos();
    if infos.is_empty() {
        println!("No agents registered.");
        return;
    }
    println!("Registered agents:");
    for info in infos {
        println!("- {} ({}): {}", info.id, info.agent_type, info.name);
    }
}

/// Runs one command. Errors are returned so the loop can print them and
/// keep going.
async fn dispatch_shell_command(
    hub: &AgentHub,
    command: ShellCommand,
    history_limit: usize,
) -> Result<bool> {
    let orchestrator = hub.orchestrator();
    match command {
        ShellCommand::Exit => return Ok(false),
        ShellCommand::Help => print_shell_help(),
        ShellCommand::Agents => print_agents(hub),
        ShellCommand::Task(description) => {
            let task_id = orchestrator.create_task(&description, Some("user")).await?;
            println!("Created task {task_id}");
            let results = orchestrator.execute_task(&task_id).await?;
            let task = orchestrator.task(&task_id);
            print_task_report(
                &task_id,
                &results,
                task.as_ref().and_then(|t| t.quality_score),
                task.as_ref().map_or(0, |t| t.iterations),
            );
        }
        ShellCommand::Improve(task_id) => {
            let results = orchestrator.improve_task_results(&task_id, None, None).await?;
            let task = orchestrator.task(&task_id);
            print_task_report(
                &task_id,
                &results,
                task.as_ref().and_then(|t| t.quality_score),
                task.as_ref().map_or(0, |t| t.iterations),
            );
        }
        ShellCommand::Send { from, to, message } => {
            let response = hub.router().send(&from, &to, &message).await?;
            println!("{to}: {response}");
        }
        ShellCommand::History(agent_id) => {
            let rows = hub
                .log()
                .conversation_history(Some(&agent_id), history_limit)
                .await?;
            if rows.is_empty() {
                println!("No conversations logged for '{agent_id}'.");
            }
            for row in rows.iter().rev() {
                println!("{}", crate::store::render_transcript_line(row));
            }
        }
    }
    Ok(true)
}

pub async fn run_interactive(
    hub: &AgentHub,
    history_limit: usize,
    show_sensitive_config: bool,
    telemetry: &TelemetrySink,
) -> Result<()> {
    telemetry.emit(
        "interactive.started",
        json!({ "agents": hub.registry().len() }),
    );
    println!("Agent hub shell. Type 'help' for commands or 'exit' to quit.");
    for agent_type in AgentType::TEAM {
        if hub.registry().first_of_type(agent_type).is_none() {
            println!("Note: no {} agent registered.", agent_type.label());
        }
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("agent-hub> ");
        io::stdout().flush().context("failed to flush stdout")?;
        line.clear();
        let read = stdin
            .read_line(&mut line)
            .context("failed to read input from stdin")?;
        if read == 0 {
            break;
        }

        let command = match parse_shell_command(&line) {
            ParsedShellCommand::Empty => continue,
            ParsedShellCommand::MissingArgument { usage } => {
                println!("Usage: {usage}");
                continue;
            }
            ParsedShellCommand::UnknownCommand(command) => {
                println!("Unknown command '{command}'. Type 'help'.");
                continue;
            }
            ParsedShellCommand::Command(command) => command,
        };

        match dispatch_shell_command(hub, command, history_limit).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => eprintln!("{}", format_cli_error(&err, show_sensitive_config)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(
            parse_shell_command("  task Summarize AI trends "),
            ParsedShellCommand::Command(ShellCommand::Task("Summarize AI trends".into()))
        );
        assert_eq!(
            parse_shell_command("SEND user agent_1 hello there"),
            ParsedShellCommand::Command(ShellCommand::Send {
                from: "user".into(),
                to: "agent_1".into(),
                message: "hello there".into(),
            })
        );
        assert_eq!(parse_shell_command("quit"), ParsedShellCommand::Command(ShellCommand::Exit));
        assert_eq!(parse_shell_command("   "), ParsedShellCommand::Empty);
    }

    #[test]
    fn reports_missing_arguments_and_unknown_commands() {
        assert_eq!(
            parse_shell_command("improve"),
            ParsedShellCommand::MissingArgument { usage: "improve <task-id>" }
        );
        assert_eq!(
            parse_shell_command("send user agent_1"),
            ParsedShellCommand::MissingArgument { usage: "send <from> <to> <message>" }
        );
        assert_eq!(
            parse_shell_command("dance now"),
            ParsedShellCommand::UnknownCommand("dance".into())
        );
    }
}
