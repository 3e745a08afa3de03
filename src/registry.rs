use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::agents::{AgentInfo, AgentType, Worker};

struct Registered {
    seq: u64,
    worker: Arc<dyn Worker>,
}

/// Single source of truth for which agent ids are routable.
///
/// Listings come back in registration order so "first agent of a type" is
/// stable across calls.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Registered>>,
    next_seq: AtomicU64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Registered>> {
        self.agents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Registered>> {
        self.agents.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Rejects empty or whitespace-padded ids and ids that are already
    /// registered. Workers are keyed by `worker.id()` exactly.
    pub fn register(&self, worker: Arc<dyn Worker>) -> bool {
        let id = worker.id().to_string();
        if id.trim().is_empty() {
            tracing::warn!("refusing to register agent with empty id");
            return false;
        }
        if id.trim() != id {
            tracing::warn!(agent_id = %id, "refusing to register agent id with surrounding whitespace");
            return false;
        }

        let mut agents = self.write();
        if agents.contains_key(&id) {
            tracing::warn!(agent_id = %id, "agent id already registered");
            return false;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        tracing::info!(agent_id = %id, agent_type = %worker.agent_type(), "agent registered");
        agents.insert(id, Registered { seq, worker });
        true
    }

    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.write().remove(id);
        if let Some(entry) = &removed {
            entry.worker.shutdown();
            tracing::info!(agent_id = %id, "agent unregistered");
        }
        removed.is_some()
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<dyn Worker>> {
        self.read().get(id).map(|entry| entry.worker.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn lookup_by_type(&self, agent_type: AgentType) -> Vec<Arc<dyn Worker>> {
        self.sorted(|worker| worker.agent_type() == agent_type)
    }

    pub fn first_of_type(&self, agent_type: AgentType) -> Option<Arc<dyn Worker>> {
        self.lookup_by_type(agent_type).into_iter().next()
    }

    pub fn list_all(&self) -> Vec<Arc<dyn Worker>> {
        self.sorted(|_| true)
    }

    pub fn infos(&self) -> Vec<AgentInfo> {
        self.list_all()
            .iter()
            .map(|worker| worker.info().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn sorted(&self, keep: impl Fn(&Arc<dyn Worker>) -> bool) -> Vec<Arc<dyn Worker>> {
        let agents = self.read();
        let mut matched = agents
            .values()
            .filter(|entry| keep(&entry.worker))
            .map(|entry| (entry.seq, entry.worker.clone()))
            .collect::<Vec<_>>();
        matched.sort_by_key(|(seq, _)| *seq);
        matched.into_iter().map(|(_, worker)| worker).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ScriptedWorker;

    #[test]
    fn register_rejects_empty_and_duplicate_ids() {
        let registry = AgentRegistry::new();
        assert!(!registry.register(ScriptedWorker::arc("", AgentType::Research)));
        assert!(registry.register(ScriptedWorker::arc("r1", AgentType::Research)));
        assert!(!registry.register(ScriptedWorker::arc("r1", AgentType::Planning)));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup("r1").map(|w| w.agent_type()),
            Some(AgentType::Research)
        );
    }

    #[test]
    fn register_rejects_padded_ids() {
        let registry = AgentRegistry::new();
        assert!(!registry.register(ScriptedWorker::arc(" r1 ", AgentType::Research)));
        assert!(!registry.contains("r1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn type_lookup_preserves_registration_order() {
        let registry = AgentRegistry::new();
        registry.register(ScriptedWorker::arc("e2", AgentType::Execution));
        registry.register(ScriptedWorker::arc("p1", AgentType::Planning));
        registry.register(ScriptedWorker::arc("e1", AgentType::Execution));

        let ids = registry
            .lookup_by_type(AgentType::Execution)
            .iter()
            .map(|w| w.id().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["e2", "e1"]);
        assert_eq!(
            registry.first_of_type(AgentType::Execution).map(|w| w.id().to_string()),
            Some("e2".to_string())
        );
        assert!(registry.first_of_type(AgentType::Critic).is_none());
        assert_eq!(registry.infos()[1].id, "p1");
    }

    #[test]
    fn unregister_frees_the_id() {
        let registry = AgentRegistry::new();
        registry.register(ScriptedWorker::arc("c1", AgentType::Critic));
        assert!(registry.unregister("c1"));
        assert!(!registry.unregister("c1"));
        assert!(registry.is_empty());
        assert!(registry.register(ScriptedWorker::arc("c1", AgentType::Critic)));
    }
}
