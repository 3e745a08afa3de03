//! Task to subtask breakdown with per-subtask assignment and status.
//!
//! In-memory state is the source for status checks; every mutation is also
//! appended to the `planning` table so `history` survives restarts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{EntityKind, HubError, HubResult};
use crate::store::{PersistentLog, PlanningRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Created,
    Assigned,
    InProgress,
    Completed,
}

impl SubtaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubtaskStatus::Created => "created",
            SubtaskStatus::Assigned => "assigned",
            SubtaskStatus::InProgress => "in_progress",
            SubtaskStatus::Completed => "completed",
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            SubtaskStatus::Created => Some(SubtaskStatus::Assigned),
            SubtaskStatus::Assigned => Some(SubtaskStatus::InProgress),
            SubtaskStatus::InProgress => Some(SubtaskStatus::Completed),
            SubtaskStatus::Completed => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subtask {
    pub id: String,
    pub index: usize,
    pub description: String,
    pub status: SubtaskStatus,
    pub assigned_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerTask {
    pub id: String,
    pub description: String,
    pub creator_id: String,
    pub status: String,
    pub assigned_agent: Option<String>,
    pub subtasks: Vec<Subtask>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn subtask_id(task_id: &str, index: usize) -> String {
    format!("{task_id}_subtask_{index}")
}

pub struct TaskLedger {
    log: PersistentLog,
    // Held across the planning-row write so index allocation and row order
    // match under concurrent dispatch.
    tasks: Mutex<HashMap<String, LedgerTask>>,
}

impl TaskLedger {
    pub fn new(log: PersistentLog) -> Self {
        Self {
            log,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create_task(&self, task_id: &str, description: &str, creator_id: &str) -> HubResult<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(task_id) {
            return Err(HubError::InvalidInput(format!("task '{task_id}' already exists in ledger")));
        }
        self.log
            .append_planning(task_id, creator_id, "task_creation", description, "created")
            .await?;
        let now = Utc::now();
        tasks.insert(
            task_id.to_string(),
            LedgerTask {
                id: task_id.to_string(),
                description: description.to_string(),
                creator_id: creator_id.to_string(),
                status: "created".to_string(),
                assigned_agent: None,
                subtasks: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    pub async fn update_task_status(&self, task_id: &str, status: &str) -> HubResult<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| HubError::not_found(EntityKind::Task, task_id))?;
        self.log
            .append_planning(
                task_id,
                "system",
                "status_update",
                &format!("Status updated to: {status}"),
                status,
            )
            .await?;
        task.status = status.to_string();
        task.updated_at = Utc::now();
        Ok(())
    }

    pub async fn assign_task(&self, task_id: &str, agent_id: &str) -> HubResult<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| HubError::not_found(EntityKind::Task, task_id))?;
        self.log
            .append_planning(
                task_id,
                agent_id,
                "assignment",
                &format!("Task {task_id} assigned to Agent {agent_id}"),
                "assigned",
            )
            .await?;
        task.assigned_agent = Some(agent_id.to_string());
        task.status = "assigned".to_string();
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Appends subtasks and returns `(index, id)` for each. Indices continue
    /// after the task's existing subtasks, so repeated calls never reuse an id.
    pub async fn decompose(
        &self,
        task_id: &str,
        descriptions: &[String],
    ) -> HubResult<Vec<(usize, String)>> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| HubError::not_found(EntityKind::Task, task_id))?;

        let mut ids = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let index = task.subtasks.len();
            let id = subtask_id(task_id, index);
            self.log
                .append_planning(&id, "system", "subtask", description, "created")
                .await?;
            let now = Utc::now();
            task.subtasks.push(Subtask {
                id: id.clone(),
                index,
                description: description.clone(),
                status: SubtaskStatus::Created,
                assigned_agent: None,
                created_at: now,
                updated_at: now,
            });
            ids.push((index, id));
        }
        task.updated_at = Utc::now();
        Ok(ids)
    }

    /// Assigns a subtask that has not started yet. Unknown task, bad index
    /// or a subtask already in progress returns `Ok(false)`.
    pub async fn assign(&self, task_id: &str, index: usize, agent_id: &str) -> HubResult<bool> {
        let mut tasks = self.tasks.lock().await;
        let Some(subtask) = tasks
            .get_mut(task_id)
            .and_then(|task| task.subtasks.get_mut(index))
        else {
            return Ok(false);
        };
        if subtask.status > SubtaskStatus::Assigned {
            return Ok(false);
        }
        self.log
            .append_planning(
                &subtask.id,
                agent_id,
                "assignment",
                &format!("Subtask {} assigned to Agent {agent_id}", subtask.id),
                SubtaskStatus::Assigned.as_str(),
            )
            .await?;
        subtask.assigned_agent = Some(agent_id.to_string());
        subtask.status = SubtaskStatus::Assigned;
        subtask.updated_at = Utc::now();
        Ok(true)
    }

    /// Moves a subtask exactly one step forward. Skips, reversals and
    /// entering `assigned` without an agent return `Ok(false)`.
    pub async fn update_status(&self, task_id: &str, index: usize, status: SubtaskStatus) -> HubResult<bool> {
        let mut tasks = self.tasks.lock().await;
        let Some(subtask) = tasks
            .get_mut(task_id)
            .and_then(|task| task.subtasks.get_mut(index))
        else {
            return Ok(false);
        };
        if subtask.status.next() != Some(status)
            || (status == SubtaskStatus::Assigned && subtask.assigned_agent.is_none())
        {
            return Ok(false);
        }
        let agent = subtask.assigned_agent.as_deref().unwrap_or("system");
        self.log
            .append_planning(
                &subtask.id,
                agent,
                "status_update",
                &format!("Status updated to: {}", status.as_str()),
                status.as_str(),
            )
            .await?;
        subtask.status = status;
        subtask.updated_at = Utc::now();
        Ok(true)
    }

    pub async fn task(&self, task_id: &str) -> Option<LedgerTask> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    pub async fn subtask(&self, task_id: &str, index: usize) -> Option<Subtask> {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .and_then(|task| task.subtasks.get(index).cloned())
    }

    /// (subtask id, agent id) for every assigned subtask of a task.
    pub async fn assignments(&self, task_id: &str) -> Option<Vec<(String, String)>> {
        let tasks = self.tasks.lock().await;
        let task = tasks.get(task_id)?;
        Some(
            task.subtasks
                .iter()
                .filter_map(|s| s.assigned_agent.clone().map(|agent| (s.id.clone(), agent)))
                .collect(),
        )
    }

    /// Task and subtask ids currently assigned to `agent_id`.
    pub async fn agent_tasks(&self, agent_id: &str) -> Vec<String> {
        let tasks = self.tasks.lock().await;
        let mut ids = Vec::new();
        for task in tasks.values() {
            if task.assigned_agent.as_deref() == Some(agent_id) {
                ids.push(task.id.clone());
            }
            ids.extend(
                task.subtasks
                    .iter()
                    .filter(|s| s.assigned_agent.as_deref() == Some(agent_id))
                    .map(|s| s.id.clone()),
            );
        }
        ids.sort();
        ids
    }

    /// Every ledger row for the task and its derived ids, in creation order.
    pub async fn history(&self, task_id: &str) -> HubResult<Vec<PlanningRecord>> {
        self.log.planning_for_task(task_id, true).await
    }

    /// Appends a free-form planning row (execution events and the like).
    pub async fn record(
        &self,
        task_id: &str,
        agent_id: &str,
        plan_type: &str,
        content: &str,
        status: &str,
    ) -> HubResult<i64> {
        self.log
            .append_planning(task_id, agent_id, plan_type, content, status)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger() -> TaskLedger {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        TaskLedger::new(log)
    }

    #[tokio::test]
    async fn decompose_continues_indices_across_calls() {
        let ledger = ledger().await;
        ledger.create_task("t1", "root", "user").await.expect("create");
        let first = ledger
            .decompose("t1", &["a".to_string(), "b".to_string()])
            .await
            .expect("decompose");
        let second = ledger.decompose("t1", &["c".to_string()]).await.expect("decompose");
        assert_eq!(
            first,
            vec![(0, "t1_subtask_0".to_string()), (1, "t1_subtask_1".to_string())]
        );
        assert_eq!(second, vec![(2, "t1_subtask_2".to_string())]);

        let missing = ledger.decompose("nope", &["x".to_string()]).await;
        assert!(missing.is_err_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn status_moves_forward_one_step_at_a_time() {
        let ledger = ledger().await;
        ledger.create_task("t1", "root", "user").await.expect("create");
        ledger.decompose("t1", &["a".to_string()]).await.expect("decompose");

        assert!(!ledger.update_status("t1", 0, SubtaskStatus::Assigned).await.expect("ok"));
        assert!(!ledger.update_status("t1", 0, SubtaskStatus::InProgress).await.expect("ok"));
        assert!(ledger.assign("t1", 0, "e1").await.expect("ok"));
        assert!(!ledger.update_status("t1", 0, SubtaskStatus::Completed).await.expect("ok"));
        assert!(ledger.update_status("t1", 0, SubtaskStatus::InProgress).await.expect("ok"));
        assert!(!ledger.assign("t1", 0, "e2").await.expect("ok"), "cannot reassign once started");
        assert!(ledger.update_status("t1", 0, SubtaskStatus::Completed).await.expect("ok"));
        assert!(!ledger.update_status("t1", 0, SubtaskStatus::Completed).await.expect("ok"));

        let subtask = ledger.subtask("t1", 0).await.expect("exists");
        assert_eq!(subtask.status, SubtaskStatus::Completed);
        assert_eq!(subtask.assigned_agent.as_deref(), Some("e1"));
    }

    #[tokio::test]
    async fn out_of_range_index_is_a_no_op() {
        let ledger = ledger().await;
        ledger.create_task("t1", "root", "user").await.expect("create");
        assert!(!ledger.assign("t1", 3, "e1").await.expect("ok"));
        assert!(!ledger.assign("ghost", 0, "e1").await.expect("ok"));
        assert!(!ledger.update_status("t1", 9, SubtaskStatus::InProgress).await.expect("ok"));
        assert_eq!(ledger.history("t1").await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn history_covers_task_and_subtask_rows_in_order() {
        let ledger = ledger().await;
        ledger.create_task("t1", "root", "user").await.expect("create");
        ledger.assign_task("t1", "p1").await.expect("assign task");
        ledger.decompose("t1", &["a".to_string()]).await.expect("decompose");
        ledger.assign("t1", 0, "e1").await.expect("assign");
        ledger.update_task_status("t1", "in_progress").await.expect("status");

        let history = ledger.history("t1").await.expect("history");
        let kinds = history.iter().map(|r| r.plan_type.as_str()).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec!["task_creation", "assignment", "subtask", "assignment", "status_update"]
        );
        assert_eq!(history[4].content, "Status updated to: in_progress");

        assert_eq!(
            ledger.assignments("t1").await,
            Some(vec![("t1_subtask_0".to_string(), "e1".to_string())])
        );
        assert_eq!(ledger.agent_tasks("p1").await, vec!["t1"]);
        assert_eq!(ledger.agent_tasks("e1").await, vec!["t1_subtask_0"]);
        assert!(ledger.create_task("t1", "dup", "user").await.is_err());
    }
}
