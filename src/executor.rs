//! Runs plans against execution agents and keeps a record of every run.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agents::{AgentType, Worker, short_id};
use crate::error::{EntityKind, HubError, HubResult};
use crate::ledger::{SubtaskStatus, TaskLedger, subtask_id};
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub step: String,
    pub agent_id: Option<String>,
    pub result: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Plan { result: String },
    Steps { steps: Vec<StepResult> },
    Collaborative { steps: Vec<StepResult> },
    Subtask { subtask_id: String, result: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub plan_id: String,
    pub agent_ids: Vec<String>,
    pub outcome: ExecutionOutcome,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanFlowReport {
    pub task_id: String,
    pub planner_id: String,
    pub plan: String,
    pub steps: Vec<String>,
    pub execution_id: String,
    pub results: Vec<StepResult>,
}

pub struct PlanExecutor {
    registry: Arc<AgentRegistry>,
    router: Arc<MessageRouter>,
    ledger: Arc<TaskLedger>,
    sender_id: String,
    executions: Mutex<BTreeMap<String, ExecutionRecord>>,
}

impl PlanExecutor {
    pub fn new(registry: Arc<AgentRegistry>, router: Arc<MessageRouter>, ledger: Arc<TaskLedger>) -> Self {
        Self {
            registry,
            router,
            ledger,
            sender_id: "system".to_string(),
            executions: Mutex::new(BTreeMap::new()),
        }
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, ExecutionRecord>> {
        self.executions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Explicit id, else the first execution agent, else any agent.
    fn resolve_agent(&self, agent_id: Option<&str>) -> HubResult<Arc<dyn Worker>> {
        if let Some(id) = agent_id {
            return self
                .registry
                .lookup(id)
                .ok_or_else(|| HubError::not_found(EntityKind::Agent, id));
        }
        self.registry
            .first_of_type(AgentType::Execution)
            .or_else(|| self.registry.list_all().into_iter().next())
            .ok_or(HubError::Unavailable(AgentType::Execution))
    }

    fn store(
        &self,
        plan_id: &str,
        agent_ids: Vec<String>,
        outcome: ExecutionOutcome,
        started_at: DateTime<Utc>,
    ) -> String {
        let id = short_id("exec");
        self.records().insert(
            id.clone(),
            ExecutionRecord {
                id: id.clone(),
                plan_id: plan_id.to_string(),
                agent_ids,
                outcome,
                started_at,
                completed_at: Utc::now(),
            },
        );
        id
    }

    pub async fn execute_plan(
        &self,
        plan_id: &str,
        plan: &str,
        agent_id: Option<&str>,
    ) -> HubResult<(String, String)> {
        let agent = self.resolve_agent(agent_id)?;
        let agent_id = agent.id().to_string();
        let started_at = Utc::now();
        let preview = plan.chars().take(100).collect::<String>();

        self.ledger
            .record(
                plan_id,
                &agent_id,
                "execution_start",
                &format!("Starting execution of plan: {preview}..."),
                "in_progress",
            )
            .await?;
        let result = self
            .router
            .send(&self.sender_id, &agent_id, &format!("Execute plan: {plan}"))
            .await?;
        self.ledger
            .record(plan_id, &agent_id, "execution_result", &result, "completed")
            .await?;

        tracing::info!(plan_id = %plan_id, agent_id = %agent_id, "plan executed");
        let id = self.store(
            plan_id,
            vec![agent_id],
            ExecutionOutcome::Plan {
                result: result.clone(),
            },
            started_at,
        );
        Ok((id, result))
    }

    /// Sends steps one at a time to a single agent, in order.
    pub async fn execute_plan_steps(
        &self,
        plan_id: &str,
        steps: &[String],
        agent_id: Option<&str>,
    ) -> HubResult<(String, Vec<StepResult>)> {
        let agent = self.resolve_agent(agent_id)?;
        let agent_id = agent.id().to_string();
        let started_at = Utc::now();
        let total = steps.len();

        let mut results = Vec::with_capacity(total);
        for (index, step) in steps.iter().enumerate() {
            let step_id = format!("{plan_id}_step_{index}");
            self.ledger
                .record(&step_id, &agent_id, "step_start", step, "in_progress")
                .await?;
            let result = self
                .router
                .send(
                    &self.sender_id,
                    &agent_id,
                    &format!("Execute step {} of {total}: {step}", index + 1),
                )
                .await?;
            self.ledger
                .record(&step_id, &agent_id, "step_result", &result, "completed")
                .await?;
            results.push(StepResult {
                index,
                step: step.clone(),
                agent_id: Some(agent_id.clone()),
                result,
            });
        }
        self.ledger
            .record(
                plan_id,
                &agent_id,
                "execution_complete",
                &format!("Completed {total} steps"),
                "completed",
            )
            .await?;

        tracing::info!(plan_id = %plan_id, agent_id = %agent_id, steps = total, "plan steps executed");
        let id = self.store(
            plan_id,
            vec![agent_id],
            ExecutionOutcome::Steps {
                steps: results.clone(),
            },
            started_at,
        );
        Ok((id, results))
    }

    /// Each step goes to its assigned agent; unassigned steps are skipped
    /// with a note instead of failing the run.
    pub async fn execute_collaborative_plan(
        &self,
        plan_id: &str,
        steps: &[String],
        assignments: &BTreeMap<usize, String>,
    ) -> HubResult<(String, Vec<StepResult>)> {
        let started_at = Utc::now();
        let total = steps.len();
        self.ledger
            .record(
                plan_id,
                &self.sender_id,
                "collaborative_execution_start",
                &format!("Starting collaborative execution of {total} steps"),
                "in_progress",
            )
            .await?;

        let mut results = Vec::with_capacity(total);
        let mut agent_ids = Vec::new();
        for (index, step) in steps.iter().enumerate() {
            let Some(agent_id) = assignments.get(&index) else {
                results.push(StepResult {
                    index,
                    step: step.clone(),
                    agent_id: None,
                    result: format!("No agent assigned for step {}", index + 1),
                });
                continue;
            };
            let step_id = format!("{plan_id}_step_{index}");
            self.ledger
                .record(&step_id, agent_id, "step_start", step, "in_progress")
                .await?;
            let result = match self
                .router
                .send(
                    &self.sender_id,
                    agent_id,
                    &format!("Execute step {} of {total}: {step}", index + 1),
                )
                .await
            {
                Ok(text) => text,
                Err(err) if err.is_storage() => return Err(err),
                Err(err) => err.to_string(),
            };
            self.ledger
                .record(&step_id, agent_id, "step_result", &result, "completed")
                .await?;
            if !agent_ids.contains(agent_id) {
                agent_ids.push(agent_id.clone());
            }
            results.push(StepResult {
                index,
                step: step.clone(),
                agent_id: Some(agent_id.clone()),
                result,
            });
        }

        self.ledger
            .record(
                plan_id,
                &self.sender_id,
                "collaborative_execution_complete",
                &format!("Completed collaborative execution of {total} steps"),
                "completed",
            )
            .await?;
        let id = self.store(
            plan_id,
            agent_ids,
            ExecutionOutcome::Collaborative {
                steps: results.clone(),
            },
            started_at,
        );
        Ok((id, results))
    }

    /// Executes one ledger subtask through its assigned agent (or the
    /// default execution agent, which is then assigned).
    pub async fn execute_subtask(&self, task_id: &str, index: usize) -> HubResult<(String, String)> {
        let subtask = self.ledger.subtask(task_id, index).await.ok_or_else(|| {
            HubError::not_found(EntityKind::Subtask, subtask_id(task_id, index))
        })?;
        if subtask.status == SubtaskStatus::Completed {
            return Err(HubError::InvalidInput(format!(
                "subtask '{}' is already completed",
                subtask.id
            )));
        }

        let agent = self.resolve_agent(subtask.assigned_agent.as_deref())?;
        let agent_id = agent.id().to_string();
        if subtask.assigned_agent.is_none() {
            self.ledger.assign(task_id, index, &agent_id).await?;
        }
        if subtask.status < SubtaskStatus::InProgress {
            self.ledger
                .update_status(task_id, index, SubtaskStatus::InProgress)
                .await?;
        }

        let started_at = Utc::now();
        let result = self
            .router
            .send(
                &self.sender_id,
                &agent_id,
                &format!("Execute subtask: {}", subtask.description),
            )
            .await?;
        self.ledger
            .update_status(task_id, index, SubtaskStatus::Completed)
            .await?;
        self.ledger
            .record(&subtask.id, &agent_id, "execution", &result, "completed")
            .await?;

        let id = self.store(
            task_id,
            vec![agent_id],
            ExecutionOutcome::Subtask {
                subtask_id: subtask.id,
                result: result.clone(),
            },
            started_at,
        );
        Ok((id, result))
    }

    /// Creates a ledger task, has the first planning agent write a plan,
    /// splits it into steps and runs them on the default execution agent.
    pub async fn run_plan_flow(&self, description: &str) -> HubResult<PlanFlowReport> {
        let description = description.trim();
        if description.is_empty() {
            return Err(HubError::InvalidInput("task description cannot be empty".into()));
        }
        let planner = self
            .registry
            .first_of_type(AgentType::Planning)
            .ok_or(HubError::Unavailable(AgentType::Planning))?;
        let planner_id = planner.id().to_string();

        let task_id = short_id("task");
        self.ledger
            .create_task(&task_id, description, &self.sender_id)
            .await?;
        self.ledger.assign_task(&task_id, &planner_id).await?;

        let plan = self
            .router
            .send(
                &self.sender_id,
                &planner_id,
                &format!("Create a plan for the following task: {description}"),
            )
            .await?;
        let steps = extract_task_steps(&plan);
        self.ledger.update_task_status(&task_id, "in_progress").await?;
        let (execution_id, results) = self.execute_plan_steps(&task_id, &steps, None).await?;
        self.ledger.update_task_status(&task_id, "completed").await?;

        Ok(PlanFlowReport {
            task_id,
            planner_id,
            plan,
            steps,
            execution_id,
            results,
        })
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        let mut all = self.records().values().cloned().collect::<Vec<_>>();
        all.sort_by_key(|record| record.started_at);
        all
    }

    pub fn execution(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.records().get(execution_id).cloned()
    }

    pub fn executions_for_plan(&self, plan_id: &str) -> Vec<ExecutionRecord> {
        self.executions()
            .into_iter()
            .filter(|record| record.plan_id == plan_id)
            .collect()
    }

    pub fn executions_for_agent(&self, agent_id: &str) -> Vec<ExecutionRecord> {
        self.executions()
            .into_iter()
            .filter(|record| record.agent_ids.iter().any(|id| id == agent_id))
            .collect()
    }
}

/// Pulls steps out of free-form plan text.
///
/// Numbered lines (`1.`, `2)`, `3:`) and `Step N:` lines win; without them
/// the text is split into sentences.
pub fn extract_task_steps(plan: &str) -> Vec<String> {
    let steps = plan
        .lines()
        .filter_map(numbered_step)
        .filter(|step| !step.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if !steps.is_empty() {
        return steps;
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in plan.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn numbered_step(line: &str) -> Option<&str> {
    let line = line.trim();
    let rest = match line.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("step") => line[4..].trim_start(),
        _ => line,
    };
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let after = &rest[digits..];
    let body = after
        .strip_prefix('.')
        .or_else(|| after.strip_prefix(')'))
        .or_else(|| after.strip_prefix(':'))?;
    Some(body.trim())
}
