use async_trait::async_trait;
use serde_json::{Value, json};

use super::base::{WorkerCore, mentions, strip_lead_in};
use super::{AgentInfo, Worker};
use crate::cache::TtlCache;
use crate::error::HubResult;
use crate::store::MemoryType;

const LEAD_INS: &[&str] = &["Research task:", "Research topic:"];

pub struct ResearchWorker {
    core: WorkerCore,
    expertise: Vec<String>,
}

impl ResearchWorker {
    pub fn new(core: WorkerCore, expertise: Vec<String>) -> Self {
        let expertise = if expertise.is_empty() {
            vec!["general research".to_string()]
        } else {
            expertise
        };
        Self { core, expertise }
    }

    pub fn expertise(&self) -> &[String] {
        &self.expertise
    }

    pub async fn research_topic(&self, topic: &str) -> HubResult<String> {
        let results = format!(
            "Research results for '{topic}':\n\
             1. Overview of {topic}\n\
             2. Key aspects of {topic}\n\
             3. Recent developments in {topic}\n"
        );
        self.core
            .record(MemoryType::Research, &results, json!({ "topic": topic }))
            .await?;
        Ok(results)
    }

    fn reply(&self, body: &str) -> String {
        if mentions(body, "research") {
            format!(
                "I'll research that for you. My expertise areas are: {}",
                self.expertise.join(", ")
            )
        } else if mentions(body, "analyze") {
            "I'll analyze that information for you.".to_string()
        } else if mentions(body, "data") {
            "I can help you gather and analyze data on that topic.".to_string()
        } else {
            format!(
                "I'm a research agent specializing in {}. How can I help you with research or analysis?",
                self.expertise.join(", ")
            )
        }
    }
}

#[async_trait]
impl Worker for ResearchWorker {
    fn info(&self) -> &AgentInfo {
        self.core.info()
    }

    async fn receive(&self, sender_id: &str, body: &str) -> HubResult<String> {
        self.core.note_inbound(sender_id, body);
        let response = match strip_lead_in(body, LEAD_INS) {
            Some(topic) if !topic.is_empty() => self.research_topic(topic).await?,
            _ => self.reply(body),
        };
        self.think(&format!(
            "Received message from {sender_id}: '{body}'. This seems to be about research. I'll respond with my expertise."
        ))
        .await?;
        self.core.note_exchange(sender_id, body, &response).await?;
        Ok(response)
    }

    async fn think(&self, context: &str) -> HubResult<String> {
        let thoughts = format!(
            "Research analysis: {context}\nConsidering my expertise in {}, I can provide insights on this topic.",
            self.expertise.join(", ")
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
        self.core.plain_execute(plan).await
    }

    fn memory(&self) -> Option<&TtlCache<Value>> {
        Some(self.core.short_term())
    }

    fn describe(&self) -> Value {
        let mut value = json!(self.info());
        value["expertise"] = json!(self.expertise);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentType, MemorySettings};
    use crate::store::PersistentLog;

    async fn worker(expertise: Vec<String>) -> (ResearchWorker, PersistentLog) {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        let info = AgentInfo::new(AgentType::Research, Some("r1".into()), None);
        let core = WorkerCore::new(info, log.clone(), MemorySettings::default());
        (ResearchWorker::new(core, expertise), log)
    }

    #[tokio::test]
    async fn research_lead_in_runs_topic_research() {
        let (worker, log) = worker(Vec::new()).await;
        let reply = worker
            .receive("system", "Research task: Summarize AI trends")
            .await
            .expect("receive");
        assert!(reply.starts_with("Research results for 'Summarize AI trends'"));

        let stats = log.memory_stats(Some("r1")).await.expect("stats");
        assert_eq!(stats.by_type.get("research"), Some(&1));
        assert_eq!(stats.by_type.get("thinking"), Some(&1));
        assert_eq!(stats.by_type.get("conversation"), Some(&1));
    }

    #[tokio::test]
    async fn keyword_replies_mention_expertise() {
        let (worker, _log) = worker(vec!["rust".into(), "databases".into()]).await;
        let reply = worker
            .receive("p1", "Can you research tokio?")
            .await
            .expect("receive");
        assert_eq!(
            reply,
            "I'll research that for you. My expertise areas are: rust, databases"
        );
        let reply = worker.receive("p1", "hello").await.expect("receive");
        assert!(reply.contains("specializing in rust, databases"));
        assert_eq!(worker.describe()["expertise"][1], "databases");
    }
}
