//! In-memory fakes for the trigger engine and the chat network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::core::config::Settings;
use crate::core::error::{GatewayError, SchedulingError};
use crate::core::plugin::PluginDeps;
use crate::core::scheduler::{FireCallback, LiveJob, SchedulerCoordinator, TriggerEngine};
use crate::core::storage::{JobStore, TriggerSpec};
use crate::interfaces::gateway::{
    EventCallback, HandlerRoutes, InboundEvent, MessageFilter, MessagingGateway, RecipientId,
};

struct ManualJob {
    spec: TriggerSpec,
    callback: FireCallback,
    paused: bool,
}

/// Trigger engine that only fires when a test calls [`ManualTriggerEngine::fire`].
#[derive(Default)]
pub struct ManualTriggerEngine {
    jobs: Mutex<HashMap<String, ManualJob>>,
    fail_schedule: AtomicBool,
    fail_unschedule: AtomicBool,
    started: AtomicBool,
}

impl ManualTriggerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_schedule(&self) {
        self.fail_schedule.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_unschedule(&self) {
        self.fail_unschedule.store(true, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn spec_of(&self, job_id: &str) -> Option<TriggerSpec> {
        self.jobs.lock().unwrap().get(job_id).map(|j| j.spec.clone())
    }

    /// Runs the callback to completion, paused or not. False if unknown.
    pub async fn fire(&self, job_id: &str) -> bool {
        let callback = self.jobs.lock().unwrap().get(job_id).map(|j| j.callback.clone());
        match callback {
            Some(callback) => {
                callback().await;
                true
            }
            None => false,
        }
    }

    fn with_job<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut ManualJob) -> T,
    ) -> Result<T, SchedulingError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::NotFound(job_id.to_string()))?;
        Ok(f(job))
    }

    fn next_fire(job: &ManualJob) -> Option<DateTime<Utc>> {
        (!job.paused).then(|| Utc::now() + Duration::minutes(1))
    }
}

#[async_trait]
impl TriggerEngine for ManualTriggerEngine {
    async fn schedule(
        &self,
        job_id: &str,
        spec: &TriggerSpec,
        callback: FireCallback,
    ) -> Result<(), SchedulingError> {
        if self.fail_schedule.swap(false, Ordering::SeqCst) {
            return Err(SchedulingError::Engine("injected schedule failure".into()));
        }
        spec.check()?;
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(job_id) {
            return Err(SchedulingError::Duplicate(job_id.to_string()));
        }
        jobs.insert(
            job_id.to_string(),
            ManualJob {
                spec: spec.clone(),
                callback,
                paused: false,
            },
        );
        Ok(())
    }

    async fn unschedule(&self, job_id: &str) -> Result<(), SchedulingError> {
        if self.fail_unschedule.swap(false, Ordering::SeqCst) {
            return Err(SchedulingError::Engine("injected unschedule failure".into()));
        }
        self.jobs
            .lock()
            .unwrap()
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| SchedulingError::NotFound(job_id.to_string()))
    }

    async fn reschedule(&self, job_id: &str, spec: &TriggerSpec) -> Result<(), SchedulingError> {
        spec.check()?;
        self.with_job(job_id, |job| job.spec = spec.clone())
    }

    async fn pause(&self, job_id: &str) -> Result<(), SchedulingError> {
        self.with_job(job_id, |job| job.paused = true)
    }

    async fn resume(&self, job_id: &str) -> Result<(), SchedulingError> {
        self.with_job(job_id, |job| job.paused = false)
    }

    async fn next_fire_time(
        &self,
        job_id: &str,
    ) -> Result<Option<DateTime<Utc>>, SchedulingError> {
        self.with_job(job_id, |job| Self::next_fire(job))
    }

    async fn list_live(&self) -> Vec<LiveJob> {
        let jobs = self.jobs.lock().unwrap();
        let mut live: Vec<LiveJob> = jobs
            .iter()
            .map(|(id, job)| LiveJob {
                job_id: id.clone(),
                next_fire_time: Self::next_fire(job),
                paused: job.paused,
            })
            .collect();
        live.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        live
    }

    async fn start(&self) -> Result<(), SchedulingError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SchedulingError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Gateway that records outgoing text and dispatches injected messages.
#[derive(Default)]
pub struct RecordingGateway {
    routes: HandlerRoutes,
    sent: Mutex<Vec<(RecipientId, String)>>,
    fail_sends: AtomicBool,
    shutdown: CancellationToken,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(RecipientId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn handler_count(&self, owner: &str) -> usize {
        self.routes.owned_by(owner)
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.routes.commands()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Dispatches as if the message came from the network.
    pub async fn deliver(&self, chat_id: RecipientId, text: &str) -> bool {
        self.routes.dispatch(InboundEvent::from_text(chat_id, text)).await
    }

    fn record(&self, recipient: RecipientId, text: String) -> Result<(), GatewayError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(GatewayError::Send {
                recipient,
                reason: "injected send failure".into(),
            });
        }
        self.sent.lock().unwrap().push((recipient, text));
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_text(&self, recipient: RecipientId, text: &str) -> Result<(), GatewayError> {
        self.record(recipient, text.to_string())
    }

    async fn send_binary(
        &self,
        recipient: RecipientId,
        payload: Vec<u8>,
        filename: &str,
    ) -> Result<(), GatewayError> {
        self.record(recipient, format!("<file {} ({} bytes)>", filename, payload.len()))
    }

    async fn send_photo(
        &self,
        recipient: RecipientId,
        payload: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.record(
            recipient,
            format!("<photo {} bytes> {}", payload.len(), caption.unwrap_or_default()),
        )
    }

    fn register_command_handler(
        &self,
        owner: &str,
        command: &str,
        description: &str,
        callback: EventCallback,
    ) -> Result<(), GatewayError> {
        self.routes.add_command(owner, command, description, callback)
    }

    fn register_message_handler(
        &self,
        owner: &str,
        filter: MessageFilter,
        callback: EventCallback,
    ) -> Result<(), GatewayError> {
        self.routes.add_message(owner, filter, callback);
        Ok(())
    }

    fn remove_handlers(&self, owner: &str) -> usize {
        self.routes.remove_owner(owner)
    }

    async fn run_receive_loop(&self) -> Result<(), GatewayError> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Stopped);
        }
        self.shutdown.cancelled().await;
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }
}

pub fn settings_with(admin: Option<RecipientId>) -> Settings {
    Settings {
        admin_chat_id: admin,
        log_to_file: false,
        ..Settings::default()
    }
}

/// Plugin dependencies with no coordinator behind them.
pub fn deps_with(gateway: Arc<RecordingGateway>, admin: Option<RecipientId>) -> PluginDeps {
    PluginDeps {
        gateway,
        coordinator: std::sync::Weak::new(),
        settings: Arc::new(settings_with(admin)),
    }
}

/// A coordinator over a temp store, the manual engine and the recording gateway.
pub struct TestBot {
    pub store: Arc<JobStore>,
    pub triggers: Arc<ManualTriggerEngine>,
    pub gateway: Arc<RecordingGateway>,
    pub coordinator: Arc<SchedulerCoordinator>,
    pub deps: PluginDeps,
    _tmp: TempDir,
}

impl TestBot {
    pub async fn new(admin: Option<RecipientId>) -> Self {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(tmp.path().join("jobs")).await.unwrap());
        let triggers = Arc::new(ManualTriggerEngine::new());
        let gateway = Arc::new(RecordingGateway::new());
        let coordinator = Arc::new(SchedulerCoordinator::new(
            store.clone(),
            triggers.clone(),
            gateway.clone(),
        ));
        let deps = PluginDeps {
            gateway: gateway.clone(),
            coordinator: Arc::downgrade(&coordinator),
            settings: Arc::new(settings_with(admin)),
        };
        Self {
            store,
            triggers,
            gateway,
            coordinator,
            deps,
            _tmp: tmp,
        }
    }

    /// Delivers `text` from `chat_id` and returns what was sent in response.
    pub async fn say(&self, chat_id: RecipientId, text: &str) -> Vec<(RecipientId, String)> {
        self.gateway.clear();
        self.gateway.deliver(chat_id, text).await;
        self.gateway.sent()
    }
}
