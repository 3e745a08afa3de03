//! Handlers behind the one-shot CLI subcommands. Each prints to stdout.

use anyhow::{Result, anyhow};
use chrono::{Duration as ChronoDuration, Utc};

use crate::cli::{ClearTarget, clear_target_label};
use crate::error::{HubError, HubResult};
use crate::hub::AgentHub;
use crate::interactive::{print_agents, print_task_report};
use crate::store::{ExportFormat, MemoryType, render_transcript_line};

pub async fn run_task(
    hub: &AgentHub,
    description: &str,
    improve: bool,
    min_quality: Option<f64>,
    max_iterations: Option<u32>,
) -> Result<()> {
    check_min_quality(min_quality)?;
    let orchestrator = hub.orchestrator();
    let task_id = orchestrator.create_task(description, Some("user")).await?;
    let results = if improve {
        orchestrator
            .improve_task_results(&task_id, min_quality, max_iterations.map(|n| n.max(1)))
            .await?
    } else {
        orchestrator.execute_task(&task_id).await?
    };

    let task = orchestrator
        .task(&task_id)
        .ok_or_else(|| anyhow!("task '{task_id}' disappeared during execution"))?;
    print_task_report(&task_id, &results, task.quality_score, task.iterations);
    let discussions = orchestrator.discussions_for_task(&task_id);
    if !discussions.is_empty() {
        println!("Discussions held: {}", discussions.len());
    }
    Ok(())
}

pub fn check_min_quality(min_quality: Option<f64>) -> HubResult<()> {
    match min_quality {
        Some(min) if !(0.0..=1.0).contains(&min) => Err(HubError::InvalidInput(format!(
            "--min-quality must be between 0 and 1 (got {min})"
        ))),
        _ => Ok(()),
    }
}

pub async fn run_plan(hub: &AgentHub, description: &str) -> Result<()> {
    let report = hub.executor().run_plan_flow(description).await?;
    println!("Task {} planned by {}", report.task_id, report.planner_id);
    println!("\n{}", report.plan.trim_end());
    println!("\nExecution {} ({} steps):", report.execution_id, report.steps.len());
    for step in &report.results {
        println!("\n[{}] {}", step.index + 1, step.step);
        println!("{}", step.result);
    }
    Ok(())
}

pub async fn run_send(hub: &AgentHub, from: &str, to: &str, message: &str) -> Result<()> {
    let response = hub.router().send(from, to, message).await?;
    println!("{response}");
    Ok(())
}

pub async fn run_broadcast(hub: &AgentHub, from: &str, message: &str, exclude: &[String]) -> Result<()> {
    let report = hub.router().broadcast(from, message, exclude).await;
    if report.is_empty() {
        println!("No recipients.");
    }
    for (agent_id, outcome) in report {
        match outcome {
            Ok(response) => println!("{agent_id}: {response}"),
            Err(err) => println!("{agent_id}: error: {err}"),
        }
    }
    Ok(())
}

pub fn run_agents(hub: &AgentHub) -> Result<()> {
    print_agents(hub);
    Ok(())
}

pub async fn run_history_conversations(
    hub: &AgentHub,
    agent: Option<&str>,
    with_agent: Option<&str>,
    search: Option<&str>,
    limit: usize,
) -> Result<()> {
    let log = hub.log();
    let rows = match (agent, with_agent, search) {
        (_, _, Some(query)) => log.search_conversations(query, limit).await?,
        (Some(a), Some(b), None) => log.conversation_between(a, b, limit).await?,
        (None, Some(_), None) => return Err(anyhow!("--with requires --agent")),
        (agent, None, None) => log.conversation_history(agent, limit).await?,
    };
    if rows.is_empty() {
        println!("No conversations found.");
    }
    for row in rows.iter().rev() {
        println!("{}", render_transcript_line(row));
    }
    Ok(())
}

pub async fn run_history_memories(
    hub: &AgentHub,
    agent: &str,
    memory_type: Option<MemoryType>,
    search: Option<&str>,
    since_secs: Option<i64>,
    limit: usize,
) -> Result<()> {
    let log = hub.log();
    let mut rows = match (search, since_secs) {
        (Some(query), _) => log.search_memories(query, Some(agent), memory_type, limit).await?,
        (None, Some(secs)) => {
            let end = Utc::now();
            let start = end - ChronoDuration::seconds(secs.max(0));
            let mut rows = log.memories_in_range(Some(agent), start, end).await?;
            if let Some(memory_type) = memory_type {
                rows.retain(|row| row.memory_type == memory_type);
            }
            rows.reverse();
            rows
        }
        (None, None) => log.memories_for_agent(agent, memory_type, limit).await?,
    };
    rows.truncate(limit);

    if rows.is_empty() {
        println!("No memories found for '{agent}'.");
    }
    for row in rows {
        println!(
            "[{}] #{} {}: {}",
            row.created_at.to_rfc3339(),
            row.id,
            row.memory_type.as_str(),
            row.content
        );
    }
    Ok(())
}

pub async fn run_history_planning(hub: &AgentHub, task_id: &str) -> Result<()> {
    let rows = hub.ledger().history(task_id).await?;
    if rows.is_empty() {
        println!("No ledger rows for '{task_id}'.");
    }
    for row in rows {
        println!(
            "[{}] {} {} ({}) by {}: {}",
            row.created_at.to_rfc3339(),
            row.task_id,
            row.plan_type,
            row.status,
            row.agent_id,
            row.content
        );
    }
    Ok(())
}

pub async fn run_export(hub: &AgentHub, agent: Option<&str>, format: ExportFormat) -> Result<()> {
    let exported = hub.log().export_conversations(agent, format).await?;
    println!("{exported}");
    Ok(())
}

pub async fn run_stats(hub: &AgentHub, agent: Option<&str>) -> Result<()> {
    let log = hub.log();
    let conversations = log.conversation_stats(agent).await?;
    let memories = log.memory_stats(agent).await?;

    println!("Conversations: {}", conversations.total);
    for (sender, count) in &conversations.by_sender {
        println!("- from {sender}: {count}");
    }
    for (recipient, count) in &conversations.by_recipient {
        println!("- to {recipient}: {count}");
    }
    if !conversations.by_hour.is_empty() {
        let hours = conversations
            .by_hour
            .iter()
            .map(|(hour, count)| format!("{hour}h={count}"))
            .collect::<Vec<_>>();
        println!("By hour: {}", hours.join(" "));
    }

    println!("Memories: {}", memories.total);
    for (memory_type, count) in &memories.by_type {
        println!("- {memory_type}: {count}");
    }
    if agent.is_none() {
        for (agent_id, count) in &memories.by_agent {
            println!("- agent {agent_id}: {count}");
        }
    }
    Ok(())
}

pub async fn run_clear(hub: &AgentHub, target: ClearTarget, agent: Option<&str>, force: bool) -> Result<()> {
    let scope = agent.map_or_else(|| "all agents".to_string(), |a| format!("agent '{a}'"));
    if !force {
        return Err(anyhow!(
            "clearing {} is destructive. Re-run with --force to delete {} for {scope}",
            clear_target_label(target),
            clear_target_label(target)
        ));
    }
    let removed = match target {
        ClearTarget::Conversations => hub.log().clear_conversations(agent).await?,
        ClearTarget::Memories => hub.log().clear_memories(agent, None).await?,
    };
    println!("Deleted {removed} {} for {scope}.", clear_target_label(target));
    Ok(())
}
