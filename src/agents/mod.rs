//! Worker agents routed by the hub.
//!
//! Every worker exposes the same capability surface ([`Worker`]):
//! `receive` for routed messages plus `think`, `plan` and `execute` for
//! direct invocation. Variants differ only in how they answer:
//!
//! - `base`: echo-style defaults
//! - `research`: topic research, expertise areas
//! - `planning`: numbered plans
//! - `execution`: plan execution reports, skills
//! - `critic`: criteria-based evaluations
//!
//! Workers are built through [`create_worker`], keyed by [`AgentType`].

pub mod base;
pub mod critic;
pub mod execution;
pub mod planning;
pub mod research;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cache::TtlCache;
use crate::config::RuntimeConfig;
use crate::error::HubResult;
use crate::store::PersistentLog;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Base,
    Research,
    Planning,
    Execution,
    Critic,
}

impl AgentType {
    pub const TEAM: [AgentType; 4] = [
        AgentType::Research,
        AgentType::Planning,
        AgentType::Execution,
        AgentType::Critic,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AgentType::Base => "base",
            AgentType::Research => "research",
            AgentType::Planning => "planning",
            AgentType::Execution => "execution",
            AgentType::Critic => "critic",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            AgentType::Base => "Base",
            AgentType::Research => "Research",
            AgentType::Planning => "Planning",
            AgentType::Execution => "Execution",
            AgentType::Critic => "Critic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "base" => Some(AgentType::Base),
            "research" => Some(AgentType::Research),
            "planning" => Some(AgentType::Planning),
            "execution" => Some(AgentType::Execution),
            "critic" => Some(AgentType::Critic),
            _ => None,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub created_at: DateTime<Utc>,
}

impl AgentInfo {
    pub fn new(agent_type: AgentType, id: Option<String>, name: Option<String>) -> Self {
        let id = id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| short_id("agent"));
        let name = name.unwrap_or_else(|| format!("{} Agent", agent_type.title()));
        Self {
            id,
            name,
            agent_type,
            created_at: Utc::now(),
        }
    }
}

/// Short-term memory settings shared by every worker a hub creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySettings {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl MemorySettings {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            ttl: Duration::from_secs(cfg.cache_ttl_secs),
            sweep_interval: Duration::from_secs(cfg.cache_sweep_interval_secs),
        }
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn info(&self) -> &AgentInfo;

    fn id(&self) -> &str {
        &self.info().id
    }

    fn agent_type(&self) -> AgentType {
        self.info().agent_type
    }

    /// Answers a routed message. Business-level outcomes are always text;
    /// errors are reserved for storage failures.
    async fn receive(&self, sender_id: &str, body: &str) -> HubResult<String>;

    async fn think(&self, context: &str) -> HubResult<String>;

    async fn plan(&self, task: &str) -> HubResult<String>;

    async fn execute(&self, plan: &str) -> HubResult<String>;

    fn memory(&self) -> Option<&TtlCache<Value>> {
        None
    }

    fn describe(&self) -> Value {
        json!(self.info())
    }

    /// Stops background work owned by the worker (the memory sweep).
    fn shutdown(&self) {
        if let Some(memory) = self.memory() {
            memory.shutdown();
        }
    }
}

pub fn short_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..8])
}

pub fn create_worker(
    agent_type: AgentType,
    id: Option<String>,
    name: Option<String>,
    log: PersistentLog,
    settings: MemorySettings,
) -> Arc<dyn Worker> {
    let info = AgentInfo::new(agent_type, id, name);
    let core = base::WorkerCore::new(info, log, settings);
    match agent_type {
        AgentType::Base => Arc::new(base::BaseWorker::new(core)),
        AgentType::Research => Arc::new(research::ResearchWorker::new(core, Vec::new())),
        AgentType::Planning => Arc::new(planning::PlanningWorker::new(core)),
        AgentType::Execution => Arc::new(execution::ExecutionWorker::new(core, Vec::new())),
        AgentType::Critic => Arc::new(critic::CriticWorker::new(core)),
    }
}

/// Builds one worker per requested type, named `<team> <Type> Agent`.
pub fn create_team(
    team_name: &str,
    types: &[AgentType],
    log: &PersistentLog,
    settings: MemorySettings,
) -> Vec<Arc<dyn Worker>> {
    types
        .iter()
        .map(|agent_type| {
            let name = format!("{team_name} {} Agent", agent_type.title());
            create_worker(*agent_type, None, Some(name), log.clone(), settings)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_short_hex() {
        let info = AgentInfo::new(AgentType::Critic, None, None);
        assert!(info.id.starts_with("agent_"));
        assert_eq!(info.id.len(), "agent_".len() + 8);
        assert_eq!(info.name, "Critic Agent");

        let blank = AgentInfo::new(AgentType::Base, Some("  ".into()), None);
        assert!(blank.id.starts_with("agent_"));
    }

    #[test]
    fn agent_type_parses_labels_case_insensitively() {
        for agent_type in AgentType::TEAM {
            assert_eq!(AgentType::parse(agent_type.label()), Some(agent_type));
        }
        assert_eq!(AgentType::parse(" Critic "), Some(AgentType::Critic));
        assert_eq!(AgentType::parse("oracle"), None);
    }

    #[tokio::test]
    async fn factory_builds_variant_per_type() {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        let team = create_team("Alpha", &AgentType::TEAM, &log, MemorySettings::default());
        let types = team.iter().map(|w| w.agent_type()).collect::<Vec<_>>();
        assert_eq!(types, AgentType::TEAM.to_vec());
        assert_eq!(team[0].info().name, "Alpha Research Agent");
        assert!(team.iter().all(|w| w.memory().is_some()));
        for worker in &team {
            worker.shutdown();
        }
    }

    #[test]
    fn info_ids_are_trimmed_or_generated() {
        let padded = AgentInfo::new(AgentType::Research, Some("  r1 ".to_string()), None);
        assert_eq!(padded.id, "r1");
        let blank = AgentInfo::new(AgentType::Critic, Some("   ".to_string()), None);
        assert!(blank.id.starts_with("agent_"));
    }
}
