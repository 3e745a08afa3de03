use async_trait::async_trait;
use serde_json::{Value, json};

use super::base::{WorkerCore, mentions, strip_lead_in};
use super::{AgentInfo, Worker};
use crate::cache::TtlCache;
use crate::error::HubResult;
use crate::store::MemoryType;

const LEAD_INS: &[&str] = &["Plan task:", "Create a plan for the following task:"];

pub struct PlanningWorker {
    core: WorkerCore,
}

impl PlanningWorker {
    pub fn new(core: WorkerCore) -> Self {
        Self { core }
    }

    fn reply(body: &str) -> &'static str {
        if mentions(body, "plan") {
            "I'll help you plan that task."
        } else if mentions(body, "task") {
            "I can break down that task into manageable steps."
        } else if mentions(body, "coordinate") {
            "I'll coordinate the agents to accomplish this goal."
        } else {
            "I'm a planning agent. I can help you plan tasks, break them down into steps, and coordinate execution."
        }
    }
}

#[async_trait]
impl Worker for PlanningWorker {
    fn info(&self) -> &AgentInfo {
        self.core.info()
    }

    async fn receive(&self, sender_id: &str, body: &str) -> HubResult<String> {
        self.core.note_inbound(sender_id, body);
        let response = match strip_lead_in(body, LEAD_INS) {
            Some(task) if !task.is_empty() => self.plan(task).await?,
            _ => Self::reply(body).to_string(),
        };
        self.think(&format!(
            "Received message from {sender_id}: '{body}'. This seems to be about planning. I'll offer my planning capabilities."
        ))
        .await?;
        self.core.note_exchange(sender_id, body, &response).await?;
        Ok(response)
    }

    async fn think(&self, context: &str) -> HubResult<String> {
        let thoughts = format!(
            "Planning analysis: {context}\nI need to consider task dependencies, resource allocation, and timeline."
        );
        self.core
            .record(MemoryType::Thinking, &thoughts, json!({ "context": context }))
            .await?;
        Ok(thoughts)
    }

    async fn plan(&self, task: &str) -> HubResult<String> {
        let plan = format!(
            "Plan for task: {task}\n\
             1. Analyze requirements\n\
             2. Break down into subtasks\n\
             3. Allocate resources\n\
             4. Set timeline\n\
             5. Execute and monitor\n"
        );
        self.core
            .record(MemoryType::Planning, &plan, json!({ "task": task }))
            .await?;
        Ok(plan)
    }

    async fn execute(&self, plan: &str) -> HubResult<String> {
        self.core.plain_execute(plan).await
    }

    fn memory(&self) -> Option<&TtlCache<Value>> {
        Some(self.core.short_term())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentType, MemorySettings};
    use crate::executor::extract_task_steps;
    use crate::store::PersistentLog;

    #[tokio::test]
    async fn plan_requests_produce_numbered_steps() {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        let info = AgentInfo::new(AgentType::Planning, Some("p1".into()), None);
        let worker = PlanningWorker::new(WorkerCore::new(info, log.clone(), MemorySettings::default()));

        let plan = worker
            .receive("user", "Create a plan for the following task: launch docs")
            .await
            .expect("receive");
        assert!(plan.starts_with("Plan for task: launch docs"));
        assert_eq!(extract_task_steps(&plan).len(), 5);

        let chat = worker.receive("user", "can we coordinate?").await.expect("receive");
        assert_eq!(chat, "I'll coordinate the agents to accomplish this goal.");

        let planning = log
            .memories_for_agent("p1", Some(MemoryType::Planning), 10)
            .await
            .expect("query");
        assert_eq!(planning.len(), 1);
        assert_eq!(planning[0].metadata["task"], "launch docs");
    }
}
