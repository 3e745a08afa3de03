use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use super::base::{WorkerCore, mentions, strip_lead_in};
use super::{AgentInfo, Worker, short_id};
use crate::cache::TtlCache;
use crate::error::HubResult;
use crate::store::MemoryType;

const LEAD_INS: &[&str] = &["Critique the following", "Evaluate the following"];
const DEFAULT_CRITERIA: [&str; 3] = ["accuracy", "completeness", "clarity"];
const PLACEHOLDER_SCORE: u8 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub id: String,
    pub content: String,
    pub criteria: Vec<String>,
    pub evaluation: String,
    pub created_at: DateTime<Utc>,
}

pub struct CriticWorker {
    core: WorkerCore,
    evaluations: Mutex<BTreeMap<String, Evaluation>>,
}

impl CriticWorker {
    pub fn new(core: WorkerCore) -> Self {
        Self {
            core,
            evaluations: Mutex::new(BTreeMap::new()),
        }
    }

    /// Scores `content` per criterion and appends an `evaluation` memory.
    pub async fn evaluate(&self, content: &str, criteria: Option<&[String]>) -> HubResult<Evaluation> {
        let criteria = criteria
            .filter(|c| !c.is_empty())
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| DEFAULT_CRITERIA.iter().map(|c| c.to_string()).collect());
        let sample = content.chars().take(100).collect::<String>();

        let mut text = format!("Evaluation of content:\n{sample}...\n\nCriteria:\n");
        for criterion in &criteria {
            text.push_str(&format!(
                "- {}: {PLACEHOLDER_SCORE}/5\n",
                capitalize(criterion)
            ));
        }
        text.push_str(
            "\nStrengths:\n\
             1. The content is well-structured.\n\
             2. Key points are addressed.\n\
             \nAreas for improvement:\n\
             1. Could provide more detailed examples.\n\
             2. Consider alternative perspectives.\n",
        );

        let evaluation = Evaluation {
            id: short_id("eval"),
            content: content.to_string(),
            criteria,
            evaluation: text,
            created_at: Utc::now(),
        };
        self.core
            .record(
                MemoryType::Evaluation,
                &evaluation.evaluation,
                json!({
                    "content_sample": sample,
                    "criteria": evaluation.criteria,
                    "eval_id": evaluation.id,
                }),
            )
            .await?;
        self.evaluations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(evaluation.id.clone(), evaluation.clone());
        Ok(evaluation)
    }

    pub fn evaluation(&self, eval_id: &str) -> Option<Evaluation> {
        self.evaluations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(eval_id)
            .cloned()
    }

    fn reply(body: &str) -> &'static str {
        if mentions(body, "evaluate") {
            "I'll evaluate that for you and provide feedback."
        } else if mentions(body, "review") {
            "I can review that and give you my assessment."
        } else if mentions(body, "feedback") {
            "I'll provide detailed feedback on that."
        } else {
            "I'm a critic agent. I can evaluate plans, review results, and provide constructive feedback."
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl Worker for CriticWorker {
    fn info(&self) -> &AgentInfo {
        self.core.info()
    }

    async fn receive(&self, sender_id: &str, body: &str) -> HubResult<String> {
        self.core.note_inbound(sender_id, body);
        let response = match strip_lead_in(body, LEAD_INS) {
            Some(_) => self.evaluate(body, None).await?.evaluation,
            None => Self::reply(body).to_string(),
        };
        self.think(&format!(
            "Received message from {sender_id}: '{body}'. This seems to be about evaluation. I'll offer my critical analysis."
        ))
        .await?;
        self.core.note_exchange(sender_id, body, &response).await?;
        Ok(response)
    }

    async fn think(&self, context: &str) -> HubResult<String> {
        let thoughts = format!(
            "Critical analysis: {context}\nI need to consider strengths, weaknesses, and areas for improvement."
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentType, MemorySettings};
    use crate::store::PersistentLog;

    async fn critic() -> (CriticWorker, PersistentLog) {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        let info = AgentInfo::new(AgentType::Critic, Some("c1".into()), None);
        (
            CriticWorker::new(WorkerCore::new(info, log.clone(), MemorySettings::default())),
            log,
        )
    }

    #[tokio::test]
    async fn evaluate_uses_default_criteria_and_is_retrievable() {
        let (critic, log) = critic().await;
        let evaluation = critic.evaluate("draft text", None).await.expect("evaluate");
        assert!(evaluation.id.starts_with("eval_"));
        assert!(evaluation.evaluation.contains("- Accuracy: 3/5"));
        assert!(evaluation.evaluation.contains("- Clarity: 3/5"));
        assert_eq!(
            critic.evaluation(&evaluation.id).map(|e| e.criteria.len()),
            Some(3)
        );

        let custom = vec!["style".to_string()];
        let styled = critic
            .evaluate("x", Some(&custom))
            .await
            .expect("evaluate");
        assert!(styled.evaluation.contains("- Style: 3/5"));

        let rows = log
            .memories_for_agent("c1", Some(MemoryType::Evaluation), 10)
            .await
            .expect("query");
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn critique_requests_return_an_evaluation() {
        let (critic, _log) = critic().await;
        let reply = critic
            .receive("system", "Critique the following task results:\n\nTask ID: t")
            .await
            .expect("receive");
        assert!(reply.starts_with("Evaluation of content:"));

        let reply = critic.receive("u", "any feedback?").await.expect("receive");
        assert_eq!(reply, "I'll provide detailed feedback on that.");
    }
}
