use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::contract::PluginInstance;
use crate::core::scheduler::{FireCallback, FireFuture};
use crate::core::storage::{JobStore, LastError};
use crate::interfaces::gateway::{
    EventCallback, HandlerFuture, InboundEvent, MessagingGateway, RecipientId,
};

pub const ERROR_NOTICE: &str = "An error occurred while processing your request.";

/// Shared by every wrapper: where counters go, where error notices go, and
/// the in-flight tracking used for a bounded shutdown.
pub struct InvocationContext {
    store: Arc<JobStore>,
    gateway: Arc<dyn MessagingGateway>,
    tracker: TaskTracker,
    draining: CancellationToken,
}

impl InvocationContext {
    pub fn new(store: Arc<JobStore>, gateway: Arc<dyn MessagingGateway>) -> Self {
        Self {
            store,
            gateway,
            tracker: TaskTracker::new(),
            draining: CancellationToken::new(),
        }
    }

    /// New invocations are skipped from here on.
    pub fn begin_drain(&self) {
        self.draining.cancel();
        self.tracker.close();
    }

    pub fn is_draining(&self) -> bool {
        self.draining.is_cancelled()
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for in-flight invocations. False if `grace` ran out first.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Inactive,
    /// No valid record in the store.
    Unregistered,
    AlreadyRunning,
    ShuttingDown,
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Completed,
    Failed(String),
    Skipped(SkipReason),
}

/// The entry point the trigger engine and gateway actually call. Never
/// propagates a plugin failure.
pub struct LifecycleWrapper {
    instance: Arc<PluginInstance>,
    ctx: Arc<InvocationContext>,
    running: Mutex<()>,
}

impl LifecycleWrapper {
    pub fn new(instance: PluginInstance, ctx: Arc<InvocationContext>) -> Self {
        Self {
            instance: Arc::new(instance),
            ctx,
            running: Mutex::new(()),
        }
    }

    pub fn instance(&self) -> &PluginInstance {
        &self.instance
    }

    pub fn job_id(&self) -> &str {
        self.instance.job_id()
    }

    pub async fn run_send(&self) -> Invocation {
        let instance = Arc::clone(&self.instance);
        self.invoke("sending scheduled message", None, async move {
            instance.send().await
        })
        .await
    }

    pub async fn run_handle(&self, event: InboundEvent) -> Invocation {
        let instance = Arc::clone(&self.instance);
        let chat_id = event.chat_id;
        self.invoke("handling incoming message", Some(chat_id), async move {
            instance.handle(&event).await
        })
        .await
    }

    pub fn fire_callback(self: &Arc<Self>) -> FireCallback {
        let wrapper = Arc::clone(self);
        Arc::new(move || -> FireFuture {
            let wrapper = wrapper.clone();
            Box::pin(async move {
                wrapper.run_send().await;
            })
        })
    }

    pub fn event_callback(self: &Arc<Self>) -> EventCallback {
        let wrapper = Arc::clone(self);
        Arc::new(move |event: InboundEvent| -> HandlerFuture {
            let wrapper = wrapper.clone();
            Box::pin(async move {
                wrapper.run_handle(event).await;
            })
        })
    }

    async fn invoke<F>(&self, context: &str, reply_to: Option<RecipientId>, body: F) -> Invocation
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job_id = self.instance.job_id();
        if self.ctx.is_draining() {
            debug!("Shutting down, skipping {}", job_id);
            return Invocation::Skipped(SkipReason::ShuttingDown);
        }
        let Ok(_running) = self.running.try_lock() else {
            warn!("{} is still running, skipping this invocation", job_id);
            return Invocation::Skipped(SkipReason::AlreadyRunning);
        };
        let _token = self.ctx.tracker.token();

        match self.ctx.store.is_active(job_id).await {
            Ok(Some(true)) => {}
            Ok(Some(false)) => {
                debug!("Plugin {} is disabled, skipping execution", job_id);
                return Invocation::Skipped(SkipReason::Inactive);
            }
            Ok(None) => {
                warn!("Plugin {} has no stored record, skipping execution", job_id);
                return Invocation::Skipped(SkipReason::Unregistered);
            }
            Err(e) => {
                error!("Error checking plugin status for {}: {}", job_id, e);
                return Invocation::Skipped(SkipReason::StoreUnavailable);
            }
        }

        // Spawned so a panicking plugin only takes down its own task.
        let outcome = match self.ctx.tracker.spawn(body).await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::anyhow!("plugin task aborted: {}", join_err)),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.ctx.store.record_success(job_id).await {
                    warn!("Could not record execution of {}: {}", job_id, e);
                }
                info!("Plugin {} executed successfully", job_id);
                Invocation::Completed
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Error {} in {}: {}", context, job_id, message);
                if let Err(store_err) = self
                    .ctx
                    .store
                    .record_failure(job_id, LastError::new(message.clone(), context))
                    .await
                {
                    warn!("Could not record failure of {}: {}", job_id, store_err);
                }
                if let Some(chat_id) = reply_to
                    && let Err(notice_err) = self.ctx.gateway.send_text(chat_id, ERROR_NOTICE).await
                {
                    debug!("Error notice to {} failed: {}", chat_id, notice_err);
                }
                Invocation::Failed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plugin::contract::{Handler, HandlerConfig, Plugin, Sender};
    use crate::core::storage::TriggerSpec;
    use crate::testing::RecordingGateway;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Flaky {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl Flaky {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::ZERO,
            }
        }
    }

    impl Plugin for Flaky {
        fn plugin_group(&self) -> &str {
            "flaky"
        }
        fn plugin_class_name(&self) -> &str {
            "Flaky"
        }
    }

    #[async_trait]
    impl Sender for Flaky {
        fn schedule(&self) -> TriggerSpec {
            TriggerSpec::every_minutes(1)
        }
        fn recipients(&self) -> Vec<RecipientId> {
            vec![42]
        }
        async fn send(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("upstream unavailable");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Handler for Flaky {
        fn handler_config(&self) -> HandlerConfig {
            HandlerConfig::command("flaky", "")
        }
        async fn handle(&self, _event: &InboundEvent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("cannot handle")
        }
    }

    struct Harness {
        store: Arc<JobStore>,
        gateway: Arc<RecordingGateway>,
        ctx: Arc<InvocationContext>,
        _tmp: TempDir,
    }

    async fn harness() -> Harness {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(tmp.path()).await.unwrap());
        let gateway = Arc::new(RecordingGateway::new());
        let ctx = Arc::new(InvocationContext::new(store.clone(), gateway.clone()));
        Harness {
            store,
            gateway,
            ctx,
            _tmp: tmp,
        }
    }

    async fn wrapped(h: &Harness, plugin: Arc<Flaky>, hybrid: bool) -> Arc<LifecycleWrapper> {
        let instance = if hybrid {
            PluginInstance::hybrid(plugin)
        } else {
            PluginInstance::outgoing(plugin)
        };
        h.store.create(instance.new_record()).await.unwrap();
        Arc::new(LifecycleWrapper::new(instance, h.ctx.clone()))
    }

    #[tokio::test]
    async fn success_and_failure_counters() {
        let h = harness().await;
        let plugin = Arc::new(Flaky::new());
        let wrapper = wrapped(&h, plugin.clone(), false).await;

        assert_eq!(wrapper.run_send().await, Invocation::Completed);
        plugin.fail.store(true, Ordering::SeqCst);
        assert!(matches!(wrapper.run_send().await, Invocation::Failed(_)));
        assert!(matches!(wrapper.run_send().await, Invocation::Failed(_)));
        plugin.fail.store(false, Ordering::SeqCst);
        assert_eq!(wrapper.run_send().await, Invocation::Completed);

        let record = h.store.read("Flaky_job").await.unwrap().unwrap();
        assert_eq!(record.metadata.execution_count, 2);
        assert_eq!(record.metadata.error_count, 2);
        let last_error = record.metadata.last_error.unwrap();
        assert!(last_error.message.contains("upstream unavailable"));
        assert_eq!(last_error.context, "sending scheduled message");
    }

    #[tokio::test]
    async fn inactive_job_body_never_runs() {
        let h = harness().await;
        let plugin = Arc::new(Flaky::new());
        let wrapper = wrapped(&h, plugin.clone(), false).await;
        h.store.set_active("Flaky_job", false).await.unwrap();

        assert_eq!(
            wrapper.run_send().await,
            Invocation::Skipped(SkipReason::Inactive)
        );
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
        let record = h.store.read("Flaky_job").await.unwrap().unwrap();
        assert_eq!(record.metadata.execution_count, 0);
        assert_eq!(record.metadata.error_count, 0);
    }

    #[tokio::test]
    async fn missing_record_skips() {
        let h = harness().await;
        let plugin = Arc::new(Flaky::new());
        let wrapper = wrapped(&h, plugin.clone(), false).await;
        h.store.delete("Flaky_job").await.unwrap();

        assert_eq!(
            wrapper.run_send().await,
            Invocation::Skipped(SkipReason::Unregistered)
        );
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_failure_sends_notice() {
        let h = harness().await;
        let wrapper = wrapped(&h, Arc::new(Flaky::new()), true).await;

        let outcome = wrapper.run_handle(InboundEvent::from_text(7, "/flaky")).await;
        assert!(matches!(outcome, Invocation::Failed(_)));
        assert_eq!(h.gateway.sent(), vec![(7, ERROR_NOTICE.to_string())]);
    }

    #[tokio::test]
    async fn notice_failure_is_swallowed() {
        let h = harness().await;
        h.gateway.fail_sends(true);
        let wrapper = wrapped(&h, Arc::new(Flaky::new()), true).await;

        let outcome = wrapper.run_handle(InboundEvent::from_text(7, "/flaky")).await;
        assert!(matches!(outcome, Invocation::Failed(_)));
        let record = h.store.read("Flaky_job").await.unwrap().unwrap();
        assert_eq!(record.metadata.error_count, 1);
    }

    #[tokio::test]
    async fn overlapping_fire_is_skipped() {
        let h = harness().await;
        let plugin = Arc::new(Flaky {
            delay: Duration::from_millis(200),
            ..Flaky::new()
        });
        let wrapper = wrapped(&h, plugin.clone(), false).await;

        let first = {
            let wrapper = wrapper.clone();
            tokio::spawn(async move { wrapper.run_send().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            wrapper.run_send().await,
            Invocation::Skipped(SkipReason::AlreadyRunning)
        );
        assert_eq!(first.await.unwrap(), Invocation::Completed);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn draining_rejects_new_invocations() {
        let h = harness().await;
        let plugin = Arc::new(Flaky::new());
        let wrapper = wrapped(&h, plugin.clone(), false).await;

        h.ctx.begin_drain();
        assert_eq!(
            wrapper.run_send().await,
            Invocation::Skipped(SkipReason::ShuttingDown)
        );
        assert!(h.ctx.wait_idle(Duration::from_millis(100)).await);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fire_callback_runs_wrapper() {
        let h = harness().await;
        let plugin = Arc::new(Flaky::new());
        let wrapper = wrapped(&h, plugin.clone(), false).await;

        let fire = wrapper.fire_callback();
        fire().await;
        fire().await;
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 2);
    }
}
