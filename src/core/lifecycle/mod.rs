use anyhow::{Result, bail};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::config::Settings;
use crate::core::error::GatewayError;
use crate::core::plugin::{PluginCatalog, PluginDeps};
use crate::core::report;
use crate::core::scheduler::{RestoreReport, SchedulerCoordinator, TriggerEngine};
use crate::core::storage::JobStore;
use crate::interfaces::gateway::MessagingGateway;

const RECEIVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    PluginsLoad,
    ConnectChannels,
    Ready,
    Shutdown,
}

/// Bootstrap and ordered shutdown of one bot process.
pub struct LifecycleManager {
    state: LifecycleState,
    settings: Arc<Settings>,
    triggers: Arc<dyn TriggerEngine>,
    gateway: Arc<dyn MessagingGateway>,
    coordinator: Arc<SchedulerCoordinator>,
    catalog: Arc<PluginCatalog>,
    receiver: Option<JoinHandle<Result<(), GatewayError>>>,
}

impl LifecycleManager {
    /// `build_catalog` gets dependencies wired to this manager's coordinator.
    pub fn new<F>(
        settings: Arc<Settings>,
        store: Arc<JobStore>,
        triggers: Arc<dyn TriggerEngine>,
        gateway: Arc<dyn MessagingGateway>,
        build_catalog: F,
    ) -> Self
    where
        F: FnOnce(PluginDeps) -> PluginCatalog,
    {
        let coordinator = Arc::new(SchedulerCoordinator::new(
            store,
            triggers.clone(),
            gateway.clone(),
        ));
        let deps = PluginDeps {
            gateway: gateway.clone(),
            coordinator: Arc::downgrade(&coordinator),
            settings: settings.clone(),
        };
        Self {
            state: LifecycleState::Init,
            settings,
            triggers,
            gateway,
            coordinator,
            catalog: Arc::new(build_catalog(deps)),
            receiver: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn coordinator(&self) -> &Arc<SchedulerCoordinator> {
        &self.coordinator
    }

    pub async fn start(&mut self) -> Result<RestoreReport> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;

        info!("Lifecycle Phase: Plugins Load");
        self.state = LifecycleState::PluginsLoad;
        let report = self.coordinator.restore_all(self.catalog.clone()).await?;
        if report.is_total_failure() {
            bail!(
                "none of the {} stored jobs could be restored; refusing to start",
                report.failed
            );
        }
        self.seed_builtins().await;

        info!("Lifecycle Phase: Connect Channels");
        self.state = LifecycleState::ConnectChannels;
        let gateway = self.gateway.clone();
        self.receiver = Some(tokio::spawn(async move {
            let result = gateway.run_receive_loop().await;
            if let Err(e) = &result {
                error!("Receive loop ended with error: {}", e);
            }
            result
        }));

        info!("Lifecycle Phase: Ready (Starting Scheduler)");
        self.triggers.start().await?;
        self.state = LifecycleState::Ready;
        self.log_startup_report().await;

        Ok(report)
    }

    /// Registers catalog plugins that have no record yet.
    async fn seed_builtins(&self) {
        let store = self.coordinator.store();
        for entry in self.catalog.entries() {
            if !entry.seed_on_first_run {
                continue;
            }
            let job_id = entry.job_id();
            if store.exists(&job_id).await {
                continue;
            }
            let instance = self.catalog.construct(entry);
            match self.coordinator.register_plugin(instance).await {
                Ok(_) => info!("Seeded built-in plugin {}", job_id),
                Err(e) => warn!("Could not seed built-in plugin {}: {}", job_id, e),
            }
        }
    }

    async fn log_startup_report(&self) {
        let live = self.coordinator.live_jobs().await;
        info!("{} live timer(s)", live.len());
        for job in &live {
            let next = match (&job.next_fire_time, job.paused) {
                (_, true) => "paused".to_string(),
                (Some(ts), false) => report::format_time(ts),
                (None, false) => "not scheduled".to_string(),
            };
            info!("  {} next run: {}", job.job_id, next);
        }
        match self.coordinator.list().await {
            Ok(records) => {
                info!("{} persisted job record(s)", records.len());
                for record in records {
                    info!(
                        "  {} ({}, {}) runs={} errors={}",
                        record.job_id,
                        record.plugin_kind,
                        if record.is_active() { "enabled" } else { "disabled" },
                        record.metadata.execution_count,
                        record.metadata.error_count
                    );
                }
            }
            Err(e) => warn!("Could not list job records: {}", e),
        }
    }

    /// Stop intake, drain in-flight plugin runs, stop timers, join the receiver.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        self.gateway.stop();
        self.coordinator.drain(self.settings.shutdown_grace()).await;
        if let Err(e) = self.triggers.shutdown().await {
            warn!("Trigger engine shutdown error: {}", e);
        }

        if let Some(receiver) = self.receiver.take() {
            match tokio::time::timeout(RECEIVER_STOP_TIMEOUT, receiver).await {
                Ok(Ok(_)) => {}
                Ok(Err(join_err)) => warn!("Receive loop task failed: {}", join_err),
                Err(_) => warn!("Receive loop did not stop within {:?}", RECEIVER_STOP_TIMEOUT),
            }
        }
        info!("Shutdown complete");
        Ok(())
    }
}
