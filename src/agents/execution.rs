use async_trait::async_trait;
use serde_json::{Value, json};

use super::base::{WorkerCore, mentions, strip_lead_in};
use super::{AgentInfo, Worker};
use crate::cache::TtlCache;
use crate::error::HubResult;
use crate::store::MemoryType;

const LEAD_INS: &[&str] = &["Execute task:", "Execute plan:", "Execute subtask:"];
const STEP_LEAD_IN: &[&str] = &["Execute step"];

pub struct ExecutionWorker {
    core: WorkerCore,
    skills: Vec<String>,
}

impl ExecutionWorker {
    pub fn new(core: WorkerCore, skills: Vec<String>) -> Self {
        let skills = if skills.is_empty() {
            vec!["general execution".to_string()]
        } else {
            skills
        };
        Self { core, skills }
    }

    pub fn skills(&self) -> &[String] {
        &self.skills
    }

    fn reply(&self, body: &str) -> String {
        if mentions(body, "execute") {
            format!(
                "I'll execute that task for you. My skills include: {}",
                self.skills.join(", ")
            )
        } else if mentions(body, "implement") {
            "I can implement that for you.".to_string()
        } else if mentions(body, "do") {
            "I'll take care of that task.".to_string()
        } else {
            format!(
                "I'm an execution agent specializing in {}. I can execute tasks for you.",
                self.skills.join(", ")
            )
        }
    }
}

#[async_trait]
impl Worker for ExecutionWorker {
    fn info(&self) -> &AgentInfo {
        self.core.info()
    }

    async fn receive(&self, sender_id: &str, body: &str) -> HubResult<String> {
        self.core.note_inbound(sender_id, body);
        // "Execute step 2 of 5: <step>" carries the work after the colon.
        let step = strip_lead_in(body, STEP_LEAD_IN)
            .and_then(|rest| rest.split_once(':'))
            .map(|(_, work)| work.trim());
        let response = match step.or_else(|| strip_lead_in(body, LEAD_INS)) {
            Some(work) if !work.is_empty() => self.execute(work).await?,
            _ => self.reply(body),
        };
        self.think(&format!(
            "Received message from {sender_id}: '{body}'. This seems to be about execution. I'll offer my execution capabilities."
        ))
        .await?;
        self.core.note_exchange(sender_id, body, &response).await?;
        Ok(response)
    }

    async fn think(&self, context: &str) -> HubResult<String> {
        let thoughts = format!(
            "Execution analysis: {context}\nConsidering my skills in {}, I can execute this task efficiently.",
            self.skills.join(", ")
        );
        self.core
            .record(MemoryType::Thinking, &thoughts, json!({ "context": context }))
            .await?;
        Ok(thoughts)
    }

    async fn plan(&self, task: &str) -> HubResult<String> {
        self.core.plain_plan(task).await
    }

    async fn execute(&self, plan: &str) -> HubResult<String> {
        let result = format!(
            "Execution result for plan:\n{plan}\n\n\
             Status: Completed\n\
             Steps executed:\n\
             1. Analyzed requirements\n\
             2. Implemented solution\n\
             3. Verified results\n"
        );
        self.core
            .record(MemoryType::Execution, &result, json!({ "plan": plan }))
            .await?;
        Ok(result)
    }

    fn memory(&self) -> Option<&TtlCache<Value>> {
        Some(self.core.short_term())
    }

    fn describe(&self) -> Value {
        let mut value = json!(self.info());
        value["skills"] = json!(self.skills);
        value
    }
}
