use async_trait::async_trait;
use serde_json::{Value, json};

use super::{AgentInfo, MemorySettings, Worker};
use crate::cache::TtlCache;
use crate::error::HubResult;
use crate::store::{MemoryType, PersistentLog};

/// State every worker variant carries: identity, short-term memory and a
/// handle to the long-term log.
pub struct WorkerCore {
    info: AgentInfo,
    short_term: TtlCache<Value>,
    log: PersistentLog,
    settings: MemorySettings,
}

impl WorkerCore {
    pub fn new(info: AgentInfo, log: PersistentLog, settings: MemorySettings) -> Self {
        Self {
            info,
            short_term: TtlCache::new(settings.sweep_interval),
            log,
            settings,
        }
    }

    pub fn info(&self) -> &AgentInfo {
        &self.info
    }

    pub fn short_term(&self) -> &TtlCache<Value> {
        &self.short_term
    }

    pub fn log(&self) -> &PersistentLog {
        &self.log
    }

    pub async fn record(
        &self,
        memory_type: MemoryType,
        content: &str,
        mut metadata: Value,
    ) -> HubResult<i64> {
        if let Some(map) = metadata.as_object_mut() {
            map.insert("timestamp".to_string(), json!(unix_ms()));
        }
        self.log
            .append_memory(&self.info.id, memory_type, content, Some(metadata))
            .await
    }

    pub fn note_inbound(&self, sender_id: &str, body: &str) {
        self.short_term.put(
            format!("conversation:{sender_id}:{}", unix_ms()),
            json!({ "sender_id": sender_id, "message": body, "timestamp": unix_ms() }),
            Some(self.settings.ttl),
        );
    }

    /// Caches the response and appends the exchange as a `conversation`
    /// memory.
    pub async fn note_exchange(&self, sender_id: &str, body: &str, response: &str) -> HubResult<()> {
        self.short_term.put(
            format!("response:{sender_id}:{}", unix_ms()),
            json!({ "recipient_id": sender_id, "message": response, "timestamp": unix_ms() }),
            Some(self.settings.ttl),
        );
        self.record(
            MemoryType::Conversation,
            &format!("From {sender_id}: {body}\nResponse: {response}"),
            json!({ "sender_id": sender_id, "message": body, "response": response }),
        )
        .await?;
        Ok(())
    }

    pub async fn plain_think(&self, context: &str) -> HubResult<String> {
        let thoughts = format!("Thinking about: {context}");
        self.record(MemoryType::Thinking, &thoughts, json!({ "context": context }))
            .await?;
        Ok(thoughts)
    }

    pub async fn plain_plan(&self, task: &str) -> HubResult<String> {
        let plan = format!("Plan for task: {task}");
        self.record(MemoryType::Planning, &plan, json!({ "task": task }))
            .await?;
        Ok(plan)
    }

    pub async fn plain_execute(&self, plan: &str) -> HubResult<String> {
        let result = format!("Executed plan: {plan}");
        self.record(MemoryType::Execution, &result, json!({ "plan": plan }))
            .await?;
        Ok(result)
    }
}

/// Returns the text after the first matching lead-in, compared
/// case-insensitively.
pub fn strip_lead_in<'a>(body: &'a str, lead_ins: &[&str]) -> Option<&'a str> {
    let trimmed = body.trim_start();
    lead_ins.iter().find_map(|lead_in| {
        let head = trimmed.get(..lead_in.len())?;
        head.eq_ignore_ascii_case(lead_in)
            .then(|| trimmed[lead_in.len()..].trim())
    })
}

pub fn mentions(body: &str, word: &str) -> bool {
    body.to_lowercase().contains(word)
}

pub(crate) fn unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct BaseWorker {
    core: WorkerCore,
}

impl BaseWorker {
    pub fn new(core: WorkerCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Worker for BaseWorker {
    fn info(&self) -> &AgentInfo {
        self.core.info()
    }

    async fn receive(&self, sender_id: &str, body: &str) -> HubResult<String> {
        self.core.note_inbound(sender_id, body);
        let response = format!("Received message from {sender_id}: {body}");
        self.core.note_exchange(sender_id, body, &response).await?;
        Ok(response)
    }

    async fn think(&self, context: &str) -> HubResult<String> {
        self.core.plain_think(context).await
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;

    async fn base_worker() -> (BaseWorker, PersistentLog) {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        let info = AgentInfo::new(AgentType::Base, Some("b1".into()), None);
        let core = WorkerCore::new(info, log.clone(), MemorySettings::default());
        (BaseWorker::new(core), log)
    }

    #[tokio::test]
    async fn receive_caches_both_sides_and_logs_conversation() {
        let (worker, log) = base_worker().await;
        let reply = worker.receive("alice", "ping").await.expect("receive");
        assert_eq!(reply, "Received message from alice: ping");

        let cached = worker.memory().expect("base worker has memory").snapshot();
        assert!(cached.keys().any(|k| k.starts_with("conversation:alice:")));
        assert!(cached.keys().any(|k| k.starts_with("response:alice:")));

        let rows = log
            .memories_for_agent("b1", Some(MemoryType::Conversation), 10)
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "From alice: ping\nResponse: Received message from alice: ping");
        assert_eq!(rows[0].metadata["sender_id"], "alice");
        worker.shutdown();
    }

    #[tokio::test]
    async fn direct_capabilities_write_typed_memories() {
        let (worker, log) = base_worker().await;
        worker.think("ctx").await.expect("think");
        worker.plan("ship it").await.expect("plan");
        assert_eq!(
            worker.execute("step").await.expect("execute"),
            "Executed plan: step"
        );
        let stats = log.memory_stats(Some("b1")).await.expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("planning"), Some(&1));
    }

    #[test]
    fn lead_in_matching_ignores_case_and_trims() {
        assert_eq!(
            strip_lead_in("  research TASK: rust async", &["Research task:"]),
            Some("rust async")
        );
        assert_eq!(strip_lead_in("Plan", &["Plan task:"]), None);
        assert_eq!(strip_lead_in("héllo", &["h\u{e9}x"]), None);
    }
}
