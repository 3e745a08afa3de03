//! Wires the log, registry, router, ledger, orchestrator and executor
//! together. One hub per process; everything hangs off shared `Arc`s.

use std::sync::Arc;

use crate::agents::{self, AgentInfo, AgentType, MemorySettings, Worker};
use crate::config::RuntimeConfig;
use crate::error::{HubError, HubResult};
use crate::executor::PlanExecutor;
use crate::ledger::TaskLedger;
use crate::orchestrator::{OrchestratorConfig, TaskOrchestrator};
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;
use crate::store::PersistentLog;
use crate::telemetry::TelemetrySink;

pub struct AgentHub {
    log: PersistentLog,
    registry: Arc<AgentRegistry>,
    router: Arc<MessageRouter>,
    ledger: Arc<TaskLedger>,
    orchestrator: Arc<TaskOrchestrator>,
    executor: Arc<PlanExecutor>,
    memory: MemorySettings,
}

impl AgentHub {
    pub async fn open(cfg: &RuntimeConfig, telemetry: Option<TelemetrySink>) -> HubResult<Self> {
        let log = PersistentLog::open(&cfg.db_url).await?;
        Ok(Self::with_log(
            log,
            MemorySettings::from_config(cfg),
            OrchestratorConfig::from_config(cfg),
            telemetry,
        ))
    }

    pub fn with_log(
        log: PersistentLog,
        memory: MemorySettings,
        orchestrator_config: OrchestratorConfig,
        telemetry: Option<TelemetrySink>,
    ) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let router = Arc::new(MessageRouter::new(registry.clone(), log.clone()));
        let ledger = Arc::new(TaskLedger::new(log.clone()));
        let mut orchestrator =
            TaskOrchestrator::new(orchestrator_config, registry.clone(), router.clone(), ledger.clone());
        if let Some(telemetry) = telemetry {
            orchestrator = orchestrator.with_telemetry(telemetry);
        }
        let executor = Arc::new(PlanExecutor::new(registry.clone(), router.clone(), ledger.clone()));
        Self {
            log,
            registry,
            router,
            ledger,
            orchestrator: Arc::new(orchestrator),
            executor,
            memory,
        }
    }

    /// Creates and registers one research, planning, execution and critic
    /// agent. Returns their infos in that order.
    pub fn initialize_team(&self) -> Vec<AgentInfo> {
        let team = agents::create_team("Hub", &AgentType::TEAM, &self.log, self.memory);
        team.into_iter()
            .filter_map(|worker| {
                let info = worker.info().clone();
                self.registry.register(worker).then_some(info)
            })
            .collect()
    }

    pub fn create_agent(
        &self,
        agent_type: AgentType,
        id: Option<String>,
        name: Option<String>,
    ) -> HubResult<AgentInfo> {
        let id = id.map(|id| id.trim().to_string());
        if let Some(id) = id.as_deref()
            && self.registry.contains(id)
        {
            return Err(HubError::InvalidInput(format!("agent id '{id}' is already registered")));
        }
        let worker = agents::create_worker(agent_type, id, name, self.log.clone(), self.memory);
        let info = worker.info().clone();
        if !self.registry.register(worker) {
            return Err(HubError::InvalidInput(format!("agent id '{}' is already registered", info.id)));
        }
        Ok(info)
    }

    pub fn register(&self, worker: Arc<dyn Worker>) -> bool {
        self.registry.register(worker)
    }

    pub fn unregister(&self, agent_id: &str) -> bool {
        self.registry.unregister(agent_id)
    }

    pub fn log(&self) -> &PersistentLog {
        &self.log
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn ledger(&self) -> &Arc<TaskLedger> {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }

    pub fn executor(&self) -> &Arc<PlanExecutor> {
        &self.executor
    }

    /// Stops every worker's memory sweep and closes the database pool.
    pub async fn shutdown(&self) {
        for worker in self.registry.list_all() {
            worker.shutdown();
        }
        self.log.close().await;
        tracing::debug!("hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn hub() -> AgentHub {
        let log = PersistentLog::open("sqlite::memory:")
            .await
            .expect("in-memory log should open");
        AgentHub::with_log(log, MemorySettings::default(), OrchestratorConfig::default(), None)
    }

    #[tokio::test]
    async fn team_has_one_agent_per_role() {
        let hub = hub().await;
        let team = hub.initialize_team();
        assert_eq!(
            team.iter().map(|info| info.agent_type).collect::<Vec<_>>(),
            AgentType::TEAM.to_vec()
        );
        assert_eq!(team[0].name, "Hub Research Agent");
        for agent_type in AgentType::TEAM {
            assert!(hub.registry().first_of_type(agent_type).is_some());
        }
    }

    #[tokio::test]
    async fn create_agent_rejects_taken_ids() {
        let hub = hub().await;
        let info = hub
            .create_agent(AgentType::Base, Some("b1".into()), None)
            .expect("create");
        assert_eq!(info.name, "Base Agent");
        let err = hub
            .create_agent(AgentType::Critic, Some("b1".into()), None)
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidInput(_)));
        assert!(hub.unregister("b1"));
    }

    #[tokio::test]
    async fn padded_agent_id_is_routable_under_its_info_id() {
        let hub = hub().await;
        let info = hub
            .create_agent(AgentType::Research, Some(" r1 ".into()), None)
            .expect("create");
        assert_eq!(info.id, "r1");
        assert!(hub.registry().lookup(&info.id).is_some());
        hub.router()
            .send("user", &info.id, "hello")
            .await
            .expect("padded id should still route");

        let err = hub
            .create_agent(AgentType::Planning, Some("r1  ".into()), None)
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidInput(_)));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn real_team_completes_a_task_end_to_end() {
        let hub = hub().await;
        hub.initialize_team();
        let orchestrator = hub.orchestrator();
        let id = orchestrator
            .create_task("Summarize AI trends", Some("user"))
            .await
            .expect("create");
        let results = orchestrator.execute_task(&id).await.expect("execute");

        assert_eq!(results.len(), 4);
        assert!(results.values().all(|slot| !slot.is_degraded()));
        let planning = results[&AgentType::Planning].text();
        assert!(planning.starts_with("Plan for task: Summarize AI trends"));
        let task = orchestrator.task(&id).expect("task");
        assert!(task.quality_score.is_some_and(|s| (0.0..=1.0).contains(&s)));

        let rows = hub.log().conversation_history(None, 100).await.expect("history");
        assert_eq!(rows.len(), 8);
        hub.shutdown().await;
    }
}
