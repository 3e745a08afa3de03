//! Task lifecycle: creation, parallel research/planning/execution
//! dispatch, critique, quality scoring and discussion-driven improvement.
//!
//! State per task moves `IDLE -> RUNNING -> FINISHED`, with `ERROR` on a
//! storage failure. Routing problems never fail a task; they become
//! degraded [`SlotOutcome`]s. Concurrent `execute_task` calls for the same
//! task id are not serialized here; callers keep one in flight per id.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::agents::{AgentType, short_id};
use crate::config::RuntimeConfig;
use crate::error::{EntityKind, HubError, HubResult};
use crate::ledger::{SubtaskStatus, TaskLedger};
use crate::quality::{KeywordScorer, QualityAssessment, QualityScorer};
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorConfig {
    pub min_quality: f64,
    pub max_iterations: u32,
    pub dispatch_timeout: Duration,
    pub sender_id: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_quality: 0.7,
            max_iterations: 3,
            dispatch_timeout: Duration::from_secs(60),
            sender_id: "system".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            min_quality: cfg.min_quality,
            max_iterations: cfg.max_iterations,
            dispatch_timeout: Duration::from_secs(cfg.dispatch_timeout_secs),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Idle,
    Running,
    Finished,
    Error,
}

/// Result of one worker slot. Only `Completed` carries worker output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotOutcome {
    Completed { text: String },
    Empty { agent_type: AgentType },
    Unavailable { agent_type: AgentType },
    TimedOut { agent_type: AgentType, secs: u64 },
}

impl SlotOutcome {
    /// Always non-empty; degraded outcomes render a placeholder sentence.
    pub fn text(&self) -> String {
        match self {
            SlotOutcome::Completed { text } => text.clone(),
            SlotOutcome::Empty { agent_type } => {
                format!("{} agent returned an empty response", agent_type.title())
            }
            SlotOutcome::Unavailable { agent_type } => {
                HubError::Unavailable(*agent_type).to_string()
            }
            SlotOutcome::TimedOut { agent_type, secs } => HubError::Timeout {
                agent_type: *agent_type,
                secs: *secs,
            }
            .to_string(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, SlotOutcome::Completed { .. })
    }
}

pub type TaskResults = BTreeMap<AgentType, SlotOutcome>;

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub creator_id: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub results: TaskResults,
    pub quality_score: Option<f64>,
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscussionMessage {
    pub sender_id: String,
    pub recipient_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Discussion {
    pub id: String,
    pub task_id: String,
    pub seed_prompt: String,
    pub messages: Vec<DiscussionMessage>,
    pub started_at: DateTime<Utc>,
    pub active: bool,
    pub concluded_at: Option<DateTime<Utc>>,
}

pub struct TaskOrchestrator {
    config: OrchestratorConfig,
    registry: Arc<AgentRegistry>,
    router: Arc<MessageRouter>,
    ledger: Arc<TaskLedger>,
    scorer: Arc<dyn QualityScorer>,
    telemetry: Option<TelemetrySink>,
    tasks: Mutex<HashMap<String, Task>>,
    discussions: Mutex<HashMap<String, Discussion>>,
    assessments: Mutex<HashMap<String, QualityAssessment>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl TaskOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        router: Arc<MessageRouter>,
        ledger: Arc<TaskLedger>,
    ) -> Self {
        Self {
            config,
            registry,
            router,
            ledger,
            scorer: Arc::new(KeywordScorer::default()),
            telemetry: None,
            tasks: Mutex::new(HashMap::new()),
            discussions: Mutex::new(HashMap::new()),
            assessments: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.emit(event, payload);
        }
    }

    fn with_task<R>(&self, task_id: &str, f: impl FnOnce(&mut Task) -> R) -> HubResult<R> {
        let mut tasks = locked(&self.tasks);
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| HubError::not_found(EntityKind::Task, task_id))?;
        Ok(f(task))
    }

    pub async fn create_task(&self, description: &str, creator_id: Option<&str>) -> HubResult<String> {
        let description = description.trim();
        if description.is_empty() {
            return Err(HubError::InvalidInput("task description cannot be empty".into()));
        }
        let creator = creator_id.unwrap_or(&self.config.sender_id).to_string();
        let id = short_id("task");

        self.ledger.create_task(&id, description, &creator).await?;
        locked(&self.tasks).insert(
            id.clone(),
            Task {
                id: id.clone(),
                description: description.to_string(),
                creator_id: creator,
                state: TaskState::Idle,
                created_at: Utc::now(),
                results: TaskResults::new(),
                quality_score: None,
                iterations: 0,
            },
        );
        tracing::info!(task_id = %id, "task created");
        self.emit("task.created", json!({ "task_id": id }));
        Ok(id)
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        locked(&self.tasks).get(task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks = locked(&self.tasks).values().cloned().collect::<Vec<_>>();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn assessment(&self, task_id: &str) -> Option<QualityAssessment> {
        locked(&self.assessments).get(task_id).cloned()
    }

    pub fn discussion(&self, discussion_id: &str) -> Option<Discussion> {
        locked(&self.discussions).get(discussion_id).cloned()
    }

    pub fn discussions_for_task(&self, task_id: &str) -> Vec<Discussion> {
        let mut found = locked(&self.discussions)
            .values()
            .filter(|d| d.task_id == task_id)
            .cloned()
            .collect::<Vec<_>>();
        found.sort_by_key(|d| d.started_at);
        found
    }

    /// Runs one full pass: research, planning and execution in parallel,
    /// then the critic, then scoring. Each call adds an iteration.
    pub async fn execute_task(&self, task_id: &str) -> HubResult<TaskResults> {
        let description = self.with_task(task_id, |task| {
            task.state = TaskState::Running;
            task.iterations += 1;
            task.description.clone()
        })?;
        tracing::info!(task_id = %task_id, "task running");

        match self.run_pass(task_id, &description).await {
            Ok(results) => {
                let iterations = self.with_task(task_id, |task| {
                    task.results = results.clone();
                    task.state = TaskState::Finished;
                    task.iterations
                })?;
                let critique = results
                    .get(&AgentType::Critic)
                    .map(SlotOutcome::text)
                    .unwrap_or_default();
                let score = self.evaluate_quality(task_id, &critique)?;
                let degraded = results.values().filter(|slot| slot.is_degraded()).count();
                tracing::info!(task_id = %task_id, score, iterations, degraded, "task finished");
                self.emit(
                    "task.executed",
                    json!({ "task_id": task_id, "score": score, "iterations": iterations, "degraded_slots": degraded }),
                );
                Ok(results)
            }
            Err(err) => {
                let _ = self.with_task(task_id, |task| task.state = TaskState::Error);
                tracing::error!(task_id = %task_id, error = %err, "task failed");
                self.emit("task.failed", json!({ "task_id": task_id, "error": err.to_string() }));
                Err(err)
            }
        }
    }

    async fn run_pass(&self, task_id: &str, description: &str) -> HubResult<TaskResults> {
        let research_prompt = format!("Research task: {description}");
        let research_entry = format!("Research: {description}");
        let planning_prompt = format!("Plan task: {description}");
        let planning_entry = format!("Planning: {description}");
        let execution_prompt = format!("Execute task: {description}");
        let execution_entry = format!("Execution: {description}");
        let (research, planning, execution) = tokio::join!(
            self.dispatch(task_id, AgentType::Research, &research_prompt, &research_entry),
            self.dispatch(task_id, AgentType::Planning, &planning_prompt, &planning_entry),
            self.dispatch(task_id, AgentType::Execution, &execution_prompt, &execution_entry),
        );

        let mut results = TaskResults::new();
        results.insert(AgentType::Research, research?);
        results.insert(AgentType::Planning, planning?);
        results.insert(AgentType::Execution, execution?);

        let prompt = critique_prompt(task_id, &results);
        let critique = self
            .dispatch(task_id, AgentType::Critic, &prompt, "Critique of results")
            .await?;
        results.insert(AgentType::Critic, critique);
        Ok(results)
    }

    /// Sends `prompt` to the first agent of `agent_type` and records the
    /// exchange as a ledger subtask. Only storage errors are returned as
    /// `Err`; everything else becomes a degraded outcome.
    async fn dispatch(
        &self,
        task_id: &str,
        agent_type: AgentType,
        prompt: &str,
        ledger_entry: &str,
    ) -> HubResult<SlotOutcome> {
        let Some(worker) = self.registry.first_of_type(agent_type) else {
            tracing::warn!(task_id = %task_id, agent_type = %agent_type, "no agent available");
            return Ok(SlotOutcome::Unavailable { agent_type });
        };
        let agent_id = worker.id().to_string();

        let created = self
            .ledger
            .decompose(task_id, &[ledger_entry.to_string()])
            .await?;
        let Some((index, _)) = created.into_iter().next() else {
            return Err(HubError::InvalidInput(format!(
                "ledger produced no subtask for task '{task_id}'"
            )));
        };
        self.ledger.assign(task_id, index, &agent_id).await?;
        self.ledger
            .update_status(task_id, index, SubtaskStatus::InProgress)
            .await?;

        let outcome = match self.call(agent_type, &agent_id, prompt).await? {
            Some(text) if text.trim().is_empty() => SlotOutcome::Empty { agent_type },
            Some(text) => SlotOutcome::Completed { text },
            None => SlotOutcome::TimedOut {
                agent_type,
                secs: self.config.dispatch_timeout.as_secs(),
            },
        };
        if !outcome.is_degraded() {
            self.ledger
                .update_status(task_id, index, SubtaskStatus::Completed)
                .await?;
        }
        Ok(outcome)
    }

    /// Routed call bounded by the dispatch timeout. `Ok(None)` means the
    /// worker stalled; a worker that vanished mid-flight reads as an empty
    /// answer.
    async fn call(&self, agent_type: AgentType, agent_id: &str, prompt: &str) -> HubResult<Option<String>> {
        let send = self.router.send(&self.config.sender_id, agent_id, prompt);
        match tokio::time::timeout(self.config.dispatch_timeout, send).await {
            Ok(Ok(text)) => Ok(Some(text)),
            Ok(Err(err)) if err.is_storage() => Err(err),
            Ok(Err(err)) => {
                tracing::warn!(agent_id = %agent_id, agent_type = %agent_type, error = %err, "dispatch failed");
                Ok(Some(String::new()))
            }
            Err(_) => {
                tracing::warn!(
                    agent_id = %agent_id,
                    agent_type = %agent_type,
                    timeout_secs = self.config.dispatch_timeout.as_secs(),
                    "dispatch timed out"
                );
                Ok(None)
            }
        }
    }

    /// Scores the critique, stores it as the task's current assessment and
    /// attaches the score to the task.
    pub fn evaluate_quality(&self, task_id: &str, critique: &str) -> HubResult<f64> {
        let score = self.scorer.score(critique);
        self.with_task(task_id, |task| task.quality_score = Some(score))?;
        locked(&self.assessments).insert(
            task_id.to_string(),
            QualityAssessment {
                task_id: task_id.to_string(),
                score,
                critique: critique.to_string(),
                timestamp: Utc::now(),
            },
        );
        tracing::debug!(task_id = %task_id, score, scorer = self.scorer.name(), "quality evaluated");
        Ok(score)
    }

    /// Executes (if not yet finished) and then alternates discussion and
    /// re-execution until the score reaches `min_quality` or iterations hit
    /// `max_iterations`. Exhausting the budget is not an error.
    pub async fn improve_task_results(
        &self,
        task_id: &str,
        min_quality: Option<f64>,
        max_iterations: Option<u32>,
    ) -> HubResult<TaskResults> {
        let min_quality = min_quality.unwrap_or(self.config.min_quality);
        let max_iterations = max_iterations.unwrap_or(self.config.max_iterations);

        let state = self.with_task(task_id, |task| task.state)?;
        if state != TaskState::Finished {
            self.execute_task(task_id).await?;
        }

        let mut rounds = 0u32;
        loop {
            let (score, iterations) = self.with_task(task_id, |task| {
                (task.quality_score.unwrap_or_default(), task.iterations)
            })?;
            if score >= min_quality || iterations >= max_iterations {
                tracing::info!(task_id = %task_id, score, iterations, rounds, "improvement loop done");
                self.emit(
                    "task.improved",
                    json!({
                        "task_id": task_id,
                        "score": score,
                        "iterations": iterations,
                        "rounds": rounds,
                        "reached_threshold": score >= min_quality,
                    }),
                );
                break;
            }
            self.initiate_discussion(task_id).await?;
            self.execute_task(task_id).await?;
            rounds += 1;
        }

        self.with_task(task_id, |task| task.results.clone())
    }

    /// Three sequential hops: research reacts to the critique, planning to
    /// research's answer, execution to both.
    pub async fn initiate_discussion(&self, task_id: &str) -> HubResult<String> {
        self.with_task(task_id, |_| ())?;
        let critique = self
            .assessment(task_id)
            .map(|a| a.critique)
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "No critique available".to_string());
        let seed_prompt = format!(
            "We need to improve the results for task {task_id}. The critique identified the following issues:\n\n\
             {critique}\n\n\
             Let's discuss how to address these issues and improve the results."
        );

        let discussion_id = short_id("discussion");
        locked(&self.discussions).insert(
            discussion_id.clone(),
            Discussion {
                id: discussion_id.clone(),
                task_id: task_id.to_string(),
                seed_prompt: seed_prompt.clone(),
                messages: Vec::new(),
                started_at: Utc::now(),
                active: true,
                concluded_at: None,
            },
        );
        tracing::info!(task_id = %task_id, discussion_id = %discussion_id, "discussion started");

        let chain = self.discussion_chain(&discussion_id, &seed_prompt).await;

        if let Some(discussion) = locked(&self.discussions).get_mut(&discussion_id) {
            discussion.active = false;
            discussion.concluded_at = Some(Utc::now());
        }
        chain?;
        self.emit(
            "discussion.concluded",
            json!({ "task_id": task_id, "discussion_id": discussion_id }),
        );
        Ok(discussion_id)
    }

    async fn discussion_chain(&self, discussion_id: &str, seed_prompt: &str) -> HubResult<()> {
        let research = self
            .discussion_hop(discussion_id, AgentType::Research, seed_prompt)
            .await?;
        let planning = self
            .discussion_hop(
                discussion_id,
                AgentType::Planning,
                &format!(
                    "Based on the research agent's response:\n\n{research}\n\nHow would you improve the plan?"
                ),
            )
            .await?;
        self.discussion_hop(
            discussion_id,
            AgentType::Execution,
            &format!(
                "Based on the research and planning responses:\n\n\
                 Research: {research}\n\n\
                 Planning: {planning}\n\n\
                 How would you improve the execution?"
            ),
        )
        .await?;
        Ok(())
    }

    /// One hop. A missing or stalled agent contributes its placeholder text
    /// so the chain can continue.
    async fn discussion_hop(
        &self,
        discussion_id: &str,
        agent_type: AgentType,
        prompt: &str,
    ) -> HubResult<String> {
        let sender = self.config.sender_id.clone();
        let (recipient, answer) = match self.registry.first_of_type(agent_type) {
            Some(worker) => {
                let agent_id = worker.id().to_string();
                let answer = match self.call(agent_type, &agent_id, prompt).await? {
                    Some(text) if !text.trim().is_empty() => text,
                    Some(_) => SlotOutcome::Empty { agent_type }.text(),
                    None => SlotOutcome::TimedOut {
                        agent_type,
                        secs: self.config.dispatch_timeout.as_secs(),
                    }
                    .text(),
                };
                (agent_id, answer)
            }
            None => (
                agent_type.label().to_string(),
                SlotOutcome::Unavailable { agent_type }.text(),
            ),
        };

        if let Some(discussion) = locked(&self.discussions).get_mut(discussion_id) {
            let now = Utc::now();
            discussion.messages.push(DiscussionMessage {
                sender_id: sender.clone(),
                recipient_id: recipient.clone(),
                message: prompt.to_string(),
                timestamp: now,
            });
            discussion.messages.push(DiscussionMessage {
                sender_id: recipient,
                recipient_id: sender,
                message: answer.clone(),
                timestamp: now,
            });
        }
        Ok(answer)
    }
}

fn critique_prompt(task_id: &str, results: &TaskResults) -> String {
    let slot = |agent_type| {
        results
            .get(&agent_type)
            .map(SlotOutcome::text)
            .unwrap_or_default()
    };
    format!(
        "Critique the following task results:\n\n\
         Task ID: {task_id}\n\
         Research Results:\n{}\n\n\
         Planning Results:\n{}\n\n\
         Execution Results:\n{}\n\n\
         Please evaluate the quality, completeness, and accuracy of these results.",
        slot(AgentType::Research),
        slot(AgentType::Planning),
        slot(AgentType::Execution),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PersistentLog;
    use crate::tests::ScriptedWorker;

    struct Fixture {
        orchestrator: TaskOrchestrator,
        registry: Arc<AgentRegistry>,
        ledger: Arc<TaskLedger>,
        log: PersistentLog,
    }

    async fn fixture(config: OrchestratorConfig) -> Fixture {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        let registry = Arc::new(AgentRegistry::new());
        let router = Arc::new(MessageRouter::new(registry.clone(), log.clone()));
        let ledger = Arc::new(TaskLedger::new(log.clone()));
        let orchestrator = TaskOrchestrator::new(config, registry.clone(), router, ledger.clone());
        Fixture {
            orchestrator,
            registry,
            ledger,
            log,
        }
    }

    fn register_team(registry: &AgentRegistry, critique: &'static str) {
        registry.register(ScriptedWorker::arc("r1", AgentType::Research));
        registry.register(ScriptedWorker::arc("p1", AgentType::Planning));
        registry.register(ScriptedWorker::arc("e1", AgentType::Execution));
        registry.register(
            ScriptedWorker::new("c1", AgentType::Critic)
                .with_reply(move |_, _| critique.to_string())
                .into_arc(),
        );
    }

    #[tokio::test]
    async fn created_task_is_idle_and_mirrored_in_ledger() {
        let fx = fixture(OrchestratorConfig::default()).await;
        let id = fx
            .orchestrator
            .create_task("Summarize AI trends", Some("alice"))
            .await
            .expect("create");
        let task = fx.orchestrator.task(&id).expect("task exists");
        assert_eq!(task.state, TaskState::Idle);
        assert_eq!(task.iterations, 0);
        assert!(task.quality_score.is_none());
        let ledger_task = fx.ledger.task(&id).await.expect("ledger mirrors same id");
        assert_eq!(ledger_task.creator_id, "alice");

        let err = fx.orchestrator.create_task("   ", None).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn execute_fills_four_slots_and_finishes() {
        let fx = fixture(OrchestratorConfig::default()).await;
        register_team(&fx.registry, "Excellent, thorough work");
        let id = fx.orchestrator.create_task("Summarize AI trends", None).await.expect("create");

        let results = fx.orchestrator.execute_task(&id).await.expect("execute");
        assert_eq!(
            results.keys().copied().collect::<Vec<_>>(),
            AgentType::TEAM.to_vec()
        );
        assert!(results.values().all(|slot| !slot.is_degraded() && !slot.text().is_empty()));
        assert_eq!(
            results[&AgentType::Research].text(),
            "r1 handled: Research task: Summarize AI trends"
        );

        let task = fx.orchestrator.task(&id).expect("task");
        assert_eq!(task.state, TaskState::Finished);
        assert_eq!(task.iterations, 1);
        assert_eq!(task.quality_score, Some(1.0));

        fx.orchestrator.execute_task(&id).await.expect("execute again");
        assert_eq!(fx.orchestrator.task(&id).expect("task").iterations, 2);
    }

    struct FixedScorer(f64);

    impl QualityScorer for FixedScorer {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn score(&self, _critique: &str) -> f64 {
            self.0
        }
    }

    #[tokio::test]
    async fn plugged_scorer_decides_the_quality_score() {
        let fx = fixture(OrchestratorConfig::default()).await;
        let orchestrator = fx.orchestrator.with_scorer(Arc::new(FixedScorer(0.42)));
        register_team(&fx.registry, "Excellent, thorough work");
        let id = orchestrator.create_task("Score me", None).await.expect("create");

        orchestrator.execute_task(&id).await.expect("execute");
        assert_eq!(orchestrator.task(&id).and_then(|t| t.quality_score), Some(0.42));
        let assessment = orchestrator.assessment(&id).expect("assessment");
        assert_eq!(assessment.score, 0.42);
        assert_eq!(assessment.critique, "Excellent, thorough work");
    }

    #[tokio::test]
    async fn critic_sees_all_three_results() {
        let fx = fixture(OrchestratorConfig::default()).await;
        register_team(&fx.registry, "ok");
        let id = fx.orchestrator.create_task("Ship v2", None).await.expect("create");
        fx.orchestrator.execute_task(&id).await.expect("execute");

        let to_critic = fx.log.conversation_between("system", "c1", 10).await.expect("query");
        let prompt = to_critic
            .iter()
            .find(|m| m.sender_id == "system")
            .expect("critic was prompted");
        assert!(prompt.message.starts_with("Critique the following task results:"));
        assert!(prompt.message.contains(&format!("Task ID: {id}")));
        assert!(prompt.message.contains("p1 handled: Plan task: Ship v2"));
        assert!(prompt.message.contains("e1 handled: Execute task: Ship v2"));
    }

    #[tokio::test]
    async fn missing_agent_types_degrade_but_task_finishes() {
        let fx = fixture(OrchestratorConfig::default()).await;
        fx.registry.register(ScriptedWorker::arc("r1", AgentType::Research));
        let id = fx.orchestrator.create_task("Solo", None).await.expect("create");

        let results = fx.orchestrator.execute_task(&id).await.expect("execute");
        assert_eq!(
            results[&AgentType::Planning],
            SlotOutcome::Unavailable { agent_type: AgentType::Planning }
        );
        assert_eq!(results[&AgentType::Critic].text(), "Critic agent not available");
        let task = fx.orchestrator.task(&id).expect("task");
        assert_eq!(task.state, TaskState::Finished);
        assert_eq!(task.quality_score, Some(0.5));
    }

    #[tokio::test]
    async fn stalled_worker_times_out_without_blocking_the_barrier() {
        let config = OrchestratorConfig {
            dispatch_timeout: Duration::from_secs(1),
            ..OrchestratorConfig::default()
        };
        let fx = fixture(config).await;
        fx.registry.register(
            ScriptedWorker::new("r1", AgentType::Research)
                .with_delay(Duration::from_secs(3600))
                .into_arc(),
        );
        fx.registry.register(ScriptedWorker::arc("p1", AgentType::Planning));
        let id = fx.orchestrator.create_task("Slow", None).await.expect("create");

        let results = fx.orchestrator.execute_task(&id).await.expect("execute");
        assert_eq!(
            results[&AgentType::Research],
            SlotOutcome::TimedOut { agent_type: AgentType::Research, secs: 1 }
        );
        assert!(!results[&AgentType::Planning].is_degraded());
        assert_eq!(fx.orchestrator.task(&id).expect("task").state, TaskState::Finished);
    }

    #[tokio::test]
    async fn dispatches_are_recorded_as_completed_subtasks() {
        let fx = fixture(OrchestratorConfig::default()).await;
        register_team(&fx.registry, "fine");
        let id = fx.orchestrator.create_task("Audit", None).await.expect("create");
        fx.orchestrator.execute_task(&id).await.expect("execute");
        fx.orchestrator.execute_task(&id).await.expect("execute");

        let ledger_task = fx.ledger.task(&id).await.expect("ledger task");
        assert_eq!(ledger_task.subtasks.len(), 8, "indices never collide across passes");
        assert!(ledger_task
            .subtasks
            .iter()
            .all(|s| s.status == SubtaskStatus::Completed && s.assigned_agent.is_some()));
        assert!(ledger_task
            .subtasks
            .iter()
            .any(|s| s.description == "Critique of results"));
    }

    #[tokio::test]
    async fn improvement_stops_at_iteration_budget() {
        let fx = fixture(OrchestratorConfig::default()).await;
        register_team(&fx.registry, "poor and incomplete");
        let id = fx.orchestrator.create_task("Hard problem", None).await.expect("create");

        fx.orchestrator
            .improve_task_results(&id, Some(0.9), Some(2))
            .await
            .expect("improve");
        let task = fx.orchestrator.task(&id).expect("task");
        assert_eq!(task.iterations, 2);
        assert!(task.quality_score.expect("scored") < 0.9);
        assert_eq!(fx.orchestrator.discussions_for_task(&id).len(), 1);
    }

    #[tokio::test]
    async fn improvement_skips_discussion_when_quality_is_met() {
        let fx = fixture(OrchestratorConfig::default()).await;
        register_team(&fx.registry, "excellent");
        let id = fx.orchestrator.create_task("Easy", None).await.expect("create");

        fx.orchestrator.improve_task_results(&id, None, None).await.expect("improve");
        let task = fx.orchestrator.task(&id).expect("task");
        assert_eq!(task.iterations, 1);
        assert!(fx.orchestrator.discussions_for_task(&id).is_empty());
    }

    #[tokio::test]
    async fn discussion_chains_answers_in_order() {
        let fx = fixture(OrchestratorConfig::default()).await;
        register_team(&fx.registry, "missing sources");
        let id = fx.orchestrator.create_task("Report", None).await.expect("create");
        fx.orchestrator.execute_task(&id).await.expect("execute");

        let discussion_id = fx.orchestrator.initiate_discussion(&id).await.expect("discuss");
        let discussion = fx.orchestrator.discussion(&discussion_id).expect("stored");
        assert!(!discussion.active);
        assert!(discussion.concluded_at.is_some());
        assert!(discussion.seed_prompt.contains("missing sources"));
        assert_eq!(discussion.messages.len(), 6);

        let recipients = discussion
            .messages
            .iter()
            .step_by(2)
            .map(|m| m.recipient_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(recipients, vec!["r1", "p1", "e1"]);
        let research_answer = &discussion.messages[1].message;
        assert!(discussion.messages[2].message.contains(research_answer.as_str()));
        assert!(discussion.messages[4].message.contains("How would you improve the execution?"));
    }

    #[tokio::test]
    async fn discussion_with_missing_agent_uses_placeholder() {
        let fx = fixture(OrchestratorConfig::default()).await;
        fx.registry.register(ScriptedWorker::arc("p1", AgentType::Planning));
        let id = fx.orchestrator.create_task("Gap", None).await.expect("create");

        let discussion_id = fx.orchestrator.initiate_discussion(&id).await.expect("discuss");
        let discussion = fx.orchestrator.discussion(&discussion_id).expect("stored");
        assert!(discussion.seed_prompt.contains("No critique available"));
        assert_eq!(discussion.messages[1].message, "Research agent not available");
        assert!(discussion.messages[2]
            .message
            .contains("Research agent not available"));
    }

    #[tokio::test]
    async fn unknown_task_ids_are_not_found() {
        let fx = fixture(OrchestratorConfig::default()).await;
        assert!(fx.orchestrator.execute_task("task_nope").await.unwrap_err().is_not_found());
        assert!(fx
            .orchestrator
            .improve_task_results("task_nope", None, None)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(fx.orchestrator.initiate_discussion("task_nope").await.unwrap_err().is_not_found());
        assert!(fx.orchestrator.evaluate_quality("task_nope", "good").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn storage_failure_moves_task_to_error() {
        let fx = fixture(OrchestratorConfig::default()).await;
        register_team(&fx.registry, "good");
        let id = fx.orchestrator.create_task("Doomed", None).await.expect("create");
        fx.log.close().await;

        let err = fx.orchestrator.execute_task(&id).await.unwrap_err();
        assert!(err.is_storage());
        assert_eq!(fx.orchestrator.task(&id).expect("task").state, TaskState::Error);
    }
}
