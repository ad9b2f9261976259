use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::engine::{LiveJob, TriggerEngine};
use crate::core::error::{CoordinatorError, Result, SchedulingError};
use crate::core::plugin::{
    HandlerConfig, InvocationContext, LifecycleWrapper, PluginInstance, PluginLoader,
};
use crate::core::storage::{JobRecord, JobStore, PluginKind, TriggerSpec};
use crate::interfaces::gateway::MessagingGateway;

/// Counts returned by [`SchedulerCoordinator::restore_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub outgoing: usize,
    pub incoming: usize,
    pub hybrid: usize,
    pub inactive_skipped: usize,
    /// Active one-shot jobs whose run date had passed; now stored as inactive.
    pub expired: usize,
    pub failed: usize,
}

impl RestoreReport {
    pub fn restored(&self) -> usize {
        self.outgoing + self.incoming + self.hybrid
    }

    /// Records existed but none could be brought back.
    pub fn is_total_failure(&self) -> bool {
        self.failed > 0 && self.restored() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescheduleOutcome {
    Applied,
    /// The live timer runs on the new schedule but the record still has the old one.
    StoreNotUpdated(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    AlreadyInState,
    /// A live registration was paused/resumed (or, for handlers, gated).
    Live,
    /// Enable brought an unloaded record up through the loader.
    Started,
    /// Only the stored flag changed; nothing is live for this job.
    StoredOnly,
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub record: JobRecord,
    pub loaded: bool,
    /// `Some` only for timed jobs that are registered with the trigger engine.
    pub timer: Option<TimerState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub next_fire_time: Option<DateTime<Utc>>,
}

/// Composes the store, the trigger engine and the gateway into operations
/// that leave them consistent. Owns the job_id → plugin registry.
pub struct SchedulerCoordinator {
    store: Arc<JobStore>,
    triggers: Arc<dyn TriggerEngine>,
    gateway: Arc<dyn MessagingGateway>,
    ctx: Arc<InvocationContext>,
    registry: Mutex<HashMap<String, Arc<LifecycleWrapper>>>,
    loader: RwLock<Option<Arc<dyn PluginLoader>>>,
}

impl SchedulerCoordinator {
    pub fn new(
        store: Arc<JobStore>,
        triggers: Arc<dyn TriggerEngine>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Self {
        let ctx = Arc::new(InvocationContext::new(store.clone(), gateway.clone()));
        Self {
            store,
            triggers,
            gateway,
            ctx,
            registry: Mutex::new(HashMap::new()),
            loader: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub async fn registry_len(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn is_loaded(&self, job_id: &str) -> bool {
        self.registry.lock().await.contains_key(job_id)
    }

    /// Registers a plugin with a fresh record built from its own defaults.
    pub async fn register_plugin(&self, instance: PluginInstance) -> Result<JobRecord> {
        let record = instance.new_record();
        self.register(instance, record).await
    }

    /// Timer/handler first, store second; any failure undoes what was done.
    pub async fn register(&self, instance: PluginInstance, record: JobRecord) -> Result<JobRecord> {
        let mut registry = self.registry.lock().await;
        self.register_locked(&mut registry, instance, record).await
    }

    async fn register_locked(
        &self,
        registry: &mut HashMap<String, Arc<LifecycleWrapper>>,
        instance: PluginInstance,
        record: JobRecord,
    ) -> Result<JobRecord> {
        let job_id = instance.job_id().to_string();
        if !instance.validate_config() {
            return Err(CoordinatorError::Validation(format!(
                "configuration check failed for {}",
                job_id
            )));
        }
        if record.job_id != job_id
            || record.plugin_kind != instance.kind()
            || record.plugin_class != instance.plugin_class_name()
        {
            return Err(CoordinatorError::Validation(format!(
                "record {} ({}/{}) does not describe plugin {}",
                record.job_id, record.plugin_kind, record.plugin_class, job_id
            )));
        }
        record.validate()?;
        if registry.contains_key(&job_id) {
            return Err(CoordinatorError::AlreadyLoaded(job_id));
        }

        let kind = instance.kind();
        let handler = instance.handler_config();
        let wrapper = Arc::new(LifecycleWrapper::new(instance, self.ctx.clone()));
        registry.insert(job_id.clone(), wrapper.clone());

        if kind.has_timer() {
            if let Err(e) = self
                .triggers
                .schedule(&job_id, &record.schedule, wrapper.fire_callback())
                .await
            {
                registry.remove(&job_id);
                error!("Failed to schedule {}: {}", job_id, e);
                return Err(e.into());
            }
            if !record.is_active()
                && let Err(e) = self.triggers.pause(&job_id).await
            {
                warn!("Could not pause inactive job {}: {}", job_id, e);
            }
        }

        if let Some(config) = handler {
            let callback = wrapper.event_callback();
            let result = match config {
                HandlerConfig::Command {
                    command,
                    description,
                } => self
                    .gateway
                    .register_command_handler(&job_id, &command, &description, callback),
                HandlerConfig::Message { filter } => {
                    self.gateway.register_message_handler(&job_id, filter, callback)
                }
            };
            if let Err(e) = result {
                self.rollback(registry, &job_id, kind).await;
                error!("Failed to register handler for {}: {}", job_id, e);
                return Err(e.into());
            }
        }

        match self.store.create(record).await {
            Ok(saved) => {
                info!("Registered {} plugin {}", kind, job_id);
                Ok(saved)
            }
            Err(e) => {
                self.rollback(registry, &job_id, kind).await;
                error!("Failed to persist {}: {}", job_id, e);
                Err(e.into())
            }
        }
    }

    async fn rollback(
        &self,
        registry: &mut HashMap<String, Arc<LifecycleWrapper>>,
        job_id: &str,
        kind: PluginKind,
    ) {
        if kind.has_timer()
            && let Err(e) = self.triggers.unschedule(job_id).await
        {
            warn!("Rollback of timer for {} failed: {}", job_id, e);
        }
        if kind.has_handler() {
            self.gateway.remove_handlers(job_id);
        }
        registry.remove(job_id);
        debug!("Rolled back registration of {}", job_id);
    }

    /// Best effort on every side; reports what could not be cleared.
    pub async fn unregister(&self, job_id: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let mut failures = Vec::new();
        let mut found = false;

        match self.triggers.unschedule(job_id).await {
            Ok(()) => found = true,
            Err(SchedulingError::NotFound(_)) => {}
            Err(e) => failures.push(format!("trigger engine: {}", e)),
        }
        if self.gateway.remove_handlers(job_id) > 0 {
            found = true;
        }
        match self.store.delete(job_id).await {
            Ok(deleted) => found |= deleted,
            Err(e) => failures.push(format!("store: {}", e)),
        }
        if registry.remove(job_id).is_some() {
            found = true;
        }

        if !failures.is_empty() {
            warn!("Partial removal of {}: {}", job_id, failures.join("; "));
            return Err(CoordinatorError::Partial {
                job_id: job_id.to_string(),
                failures,
            });
        }
        if !found {
            return Err(CoordinatorError::NotFound(job_id.to_string()));
        }
        info!("Unregistered {}", job_id);
        Ok(())
    }

    /// A failed store write after a successful timer update is reported, not undone.
    pub async fn reschedule(&self, job_id: &str, spec: TriggerSpec) -> Result<RescheduleOutcome> {
        let _registry = self.registry.lock().await;
        if !spec.is_timed() {
            return Err(SchedulingError::UnsupportedTrigger(spec.kind_name().into()).into());
        }
        self.triggers.reschedule(job_id, &spec).await?;
        match self.store.set_schedule(job_id, spec).await {
            Ok(_) => Ok(RescheduleOutcome::Applied),
            Err(e) => {
                warn!(
                    "{} runs on the new schedule but the record was not updated: {}",
                    job_id, e
                );
                Ok(RescheduleOutcome::StoreNotUpdated(e.to_string()))
            }
        }
    }

    pub async fn enable(&self, job_id: &str) -> Result<ToggleOutcome> {
        let mut registry = self.registry.lock().await;
        let record = self
            .store
            .read(job_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(job_id.to_string()))?;
        if record.is_active() {
            return Ok(ToggleOutcome::AlreadyInState);
        }

        let record = self.store.set_active(job_id, true).await?;
        let kind = record.plugin_kind;

        if registry.contains_key(job_id) {
            if kind.has_timer()
                && let Err(e) = self.triggers.resume(job_id).await
            {
                self.revert_active(job_id, false).await;
                return Err(e.into());
            }
            info!("Enabled {}", job_id);
            return Ok(ToggleOutcome::Live);
        }

        let loader = self
            .loader
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(loader) = loader else {
            info!("Enabled {} in storage only", job_id);
            return Ok(ToggleOutcome::StoredOnly);
        };

        let started = match loader.load(&record) {
            Ok(instance) => self.register_locked(&mut registry, instance, record).await,
            Err(e) => Err(e.into()),
        };
        match started {
            Ok(_) => {
                info!("Enabled and started {}", job_id);
                Ok(ToggleOutcome::Started)
            }
            Err(e) => {
                self.revert_active(job_id, false).await;
                Err(e)
            }
        }
    }

    /// Timers are paused, handlers stay registered; the wrapper's gate stops both.
    pub async fn disable(&self, job_id: &str) -> Result<ToggleOutcome> {
        let registry = self.registry.lock().await;
        let record = self
            .store
            .read(job_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(job_id.to_string()))?;
        if !record.is_active() {
            return Ok(ToggleOutcome::AlreadyInState);
        }

        self.store.set_active(job_id, false).await?;
        if !registry.contains_key(job_id) {
            info!("Disabled {} in storage only", job_id);
            return Ok(ToggleOutcome::StoredOnly);
        }
        if record.plugin_kind.has_timer()
            && let Err(e) = self.triggers.pause(job_id).await
        {
            warn!("Disabled {} but its timer could not be paused: {}", job_id, e);
        }
        info!("Disabled {}", job_id);
        Ok(ToggleOutcome::Live)
    }

    async fn revert_active(&self, job_id: &str, active: bool) {
        if let Err(e) = self.store.set_active(job_id, active).await {
            error!("Could not revert active flag of {}: {}", job_id, e);
        }
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatus> {
        let record = self
            .store
            .read(job_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(job_id.to_string()))?;
        let loaded = self.is_loaded(job_id).await;
        let timer = if record.plugin_kind.has_timer() {
            match self.triggers.next_fire_time(job_id).await {
                Ok(next_fire_time) => Some(TimerState { next_fire_time }),
                Err(SchedulingError::NotFound(_)) => None,
                Err(e) => {
                    warn!("Could not read next fire time of {}: {}", job_id, e);
                    Some(TimerState {
                        next_fire_time: None,
                    })
                }
            }
        } else {
            None
        };
        Ok(JobStatus {
            record,
            loaded,
            timer,
        })
    }

    pub async fn list(&self) -> Result<Vec<JobRecord>> {
        Ok(self.store.list().await?)
    }

    pub async fn live_jobs(&self) -> Vec<LiveJob> {
        self.triggers.list_live().await
    }

    /// Brings every active record back. Per-record failures are counted, never
    /// fatal; an unreadable store is. The loader is kept for later enables.
    pub async fn restore_all(&self, loader: Arc<dyn PluginLoader>) -> Result<RestoreReport> {
        *self.loader.write().unwrap_or_else(|e| e.into_inner()) = Some(loader.clone());

        let records = self.store.list().await?;
        let now = Utc::now();
        let mut report = RestoreReport::default();
        let mut registry = self.registry.lock().await;

        for record in records {
            let job_id = record.job_id.clone();
            if !record.is_active() {
                debug!("Skipping inactive job {}", job_id);
                report.inactive_skipped += 1;
                continue;
            }
            if record.schedule.is_expired(now) {
                info!("Job {} had a one-shot run date in the past, disabling it", job_id);
                if let Err(e) = self.store.set_active(&job_id, false).await {
                    warn!("Could not mark expired job {} inactive: {}", job_id, e);
                }
                report.expired += 1;
                continue;
            }
            let kind = record.plugin_kind;
            let instance = match loader.load(&record) {
                Ok(instance) => instance,
                Err(e) => {
                    warn!("Cannot restore {}: {}", job_id, e);
                    report.failed += 1;
                    continue;
                }
            };
            match self.register_locked(&mut registry, instance, record).await {
                Ok(_) => match kind {
                    PluginKind::Outgoing => report.outgoing += 1,
                    PluginKind::Incoming => report.incoming += 1,
                    PluginKind::Hybrid => report.hybrid += 1,
                },
                Err(e) => {
                    warn!("Failed to re-register {}: {}", job_id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Restored {} jobs ({} outgoing, {} incoming, {} hybrid), {} inactive, {} expired, {} failed",
            report.restored(),
            report.outgoing,
            report.incoming,
            report.hybrid,
            report.inactive_skipped,
            report.expired,
            report.failed
        );
        Ok(report)
    }

    /// Stops new invocations and waits up to `grace` for running ones.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.ctx.begin_drain();
        let in_flight = self.ctx.in_flight();
        if in_flight > 0 {
            info!("Waiting for {} running plugin invocations", in_flight);
        }
        let idle = self.ctx.wait_idle(grace).await;
        if !idle {
            warn!(
                "Abandoning {} plugin invocations after {:?}",
                self.ctx.in_flight(),
                grace
            );
        }
        idle
    }
}
