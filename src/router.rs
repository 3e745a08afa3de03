use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use crate::agents::short_id;
use crate::error::{EntityKind, HubError, HubResult};
use crate::registry::AgentRegistry;
use crate::store::PersistentLog;

pub type DeliveryReport = BTreeMap<String, HubResult<String>>;

#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Delivers messages between registered agents and logs every exchange.
pub struct MessageRouter {
    registry: Arc<AgentRegistry>,
    log: PersistentLog,
    groups: RwLock<HashMap<String, Group>>,
}

impl MessageRouter {
    pub fn new(registry: Arc<AgentRegistry>, log: PersistentLog) -> Self {
        Self {
            registry,
            log,
            groups: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Logs the outgoing message, then delivers it. An unknown recipient
    /// yields `NotFound` and no response row; storage failures propagate.
    pub async fn send(&self, sender_id: &str, recipient_id: &str, body: &str) -> HubResult<String> {
        self.log.append_message(sender_id, recipient_id, body).await?;

        let Some(recipient) = self.registry.lookup(recipient_id) else {
            tracing::debug!(sender = %sender_id, recipient = %recipient_id, "recipient not registered");
            return Err(HubError::not_found(EntityKind::Agent, recipient_id));
        };

        let response = recipient.receive(sender_id, body).await?;
        self.log
            .append_message(recipient_id, sender_id, &response)
            .await?;
        tracing::debug!(sender = %sender_id, recipient = %recipient_id, "message delivered");
        Ok(response)
    }

    /// Sends `body` to every registered agent except the sender and the
    /// excluded ids. Each recipient gets its own entry; one failure does
    /// not stop the others.
    pub async fn broadcast(&self, sender_id: &str, body: &str, exclude: &[String]) -> DeliveryReport {
        let excluded = exclude.iter().map(String::as_str).collect::<HashSet<_>>();
        let recipients = self
            .registry
            .list_all()
            .into_iter()
            .map(|worker| worker.id().to_string())
            .filter(|id| id != sender_id && !excluded.contains(id.as_str()))
            .collect::<Vec<_>>();
        self.deliver_all(sender_id, recipients, body).await
    }

    pub fn create_group(&self, name: &str, members: Vec<String>) -> HubResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HubError::InvalidInput("group name cannot be empty".into()));
        }
        let mut unique = Vec::with_capacity(members.len());
        for member in members {
            if !member.trim().is_empty() && !unique.contains(&member) {
                unique.push(member);
            }
        }
        if unique.is_empty() {
            return Err(HubError::InvalidInput(format!("group '{name}' needs at least one member")));
        }

        let group = Group {
            id: short_id("group"),
            name: name.to_string(),
            members: unique,
            created_at: Utc::now(),
        };
        let id = group.id.clone();
        tracing::info!(group_id = %id, members = group.members.len(), "group created");
        self.groups
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), group);
        Ok(id)
    }

    pub fn group(&self, group_id: &str) -> Option<Group> {
        self.groups
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_id)
            .cloned()
    }

    /// Delivers `[Group: <name>] <body>` to every member but the sender.
    pub async fn send_group_message(
        &self,
        sender_id: &str,
        group_id: &str,
        body: &str,
    ) -> HubResult<DeliveryReport> {
        let group = self
            .group(group_id)
            .ok_or_else(|| HubError::not_found(EntityKind::Group, group_id))?;
        let tagged = format!("[Group: {}] {body}", group.name);
        let recipients = group
            .members
            .into_iter()
            .filter(|member| member != sender_id)
            .collect::<Vec<_>>();
        Ok(self.deliver_all(sender_id, recipients, &tagged).await)
    }

    async fn deliver_all(&self, sender_id: &str, recipients: Vec<String>, body: &str) -> DeliveryReport {
        let deliveries = recipients.iter().map(|recipient| async move {
            let outcome = self.send(sender_id, recipient, body).await;
            if let Err(err) = &outcome {
                tracing::warn!(recipient = %recipient, error = %err, "delivery failed");
            }
            (recipient.clone(), outcome)
        });
        join_all(deliveries).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;
    use crate::tests::ScriptedWorker;

    async fn router_with(workers: &[(&str, AgentType)]) -> (MessageRouter, PersistentLog) {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        let registry = Arc::new(AgentRegistry::new());
        for (id, agent_type) in workers {
            registry.register(ScriptedWorker::arc(id, *agent_type));
        }
        (MessageRouter::new(registry, log.clone()), log)
    }

    #[tokio::test]
    async fn send_logs_request_and_response() {
        let (router, log) = router_with(&[("r1", AgentType::Research)]).await;
        let reply = router.send("user", "r1", "hi").await.expect("send");
        assert_eq!(reply, "r1 handled: hi");

        let rows = log.conversation_between("user", "r1", 10).await.expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].sender_id, "user");
        assert_eq!(rows[0].sender_id, "r1");
        assert_eq!(rows[0].message, reply);
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_found_and_logs_only_the_request() {
        let (router, log) = router_with(&[]).await;
        let err = router.send("user", "ghost", "anyone?").await.unwrap_err();
        assert!(err.is_not_found());
        let rows = log.conversation_history(None, 10).await.expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient_id, "ghost");
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_excluded_and_keeps_partial_results() {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        let registry = Arc::new(AgentRegistry::new());
        registry.register(ScriptedWorker::arc("a", AgentType::Research));
        registry.register(ScriptedWorker::arc("b", AgentType::Planning));
        registry.register(ScriptedWorker::arc("c", AgentType::Execution));
        registry.register(ScriptedWorker::new("d", AgentType::Critic).failing().into_arc());
        let router = MessageRouter::new(registry, log);

        let report = router
            .broadcast("a", "status?", &["c".to_string()])
            .await;
        assert_eq!(report.keys().cloned().collect::<Vec<_>>(), vec!["b", "d"]);
        assert_eq!(report["b"].as_deref().ok(), Some("b handled: status?"));
        assert!(report["d"].is_err());
    }

    #[tokio::test]
    async fn group_messages_are_tagged_and_skip_sender() {
        let (router, _log) =
            router_with(&[("a", AgentType::Research), ("b", AgentType::Planning)]).await;
        let group = router
            .create_group("core", vec!["a".into(), "b".into(), "b".into(), "z".into()])
            .expect("group");
        assert_eq!(router.group(&group).map(|g| g.members.len()), Some(3));

        let report = router
            .send_group_message("a", &group, "sync")
            .await
            .expect("group exists");
        assert_eq!(report.len(), 2);
        assert_eq!(report["b"].as_deref().ok(), Some("b handled: [Group: core] sync"));
        assert!(report["z"].as_ref().is_err_and(HubError::is_not_found));

        let missing = router.send_group_message("a", "group_nope", "x").await;
        assert!(missing.is_err_and(|e| e.is_not_found()));
        assert!(router.create_group("empty", Vec::new()).is_err());
    }
}
