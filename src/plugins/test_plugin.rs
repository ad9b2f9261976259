use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::core::config::Settings;
use crate::core::plugin::{Plugin, PluginDeps, PluginInstance, Sender};
use crate::core::storage::TriggerSpec;
use crate::interfaces::gateway::{MessagingGateway, RecipientId};

pub const TEST_MESSAGE: &str = "Test message - Bot core is working! (sent every 5 min)";

/// Heartbeat: proves the scheduler and the gateway work end to end.
pub struct TestPlugin {
    gateway: Arc<dyn MessagingGateway>,
    settings: Arc<Settings>,
}

impl TestPlugin {
    pub const GROUP: &'static str = "tests";
    pub const CLASS: &'static str = "TestPlugin";

    pub fn new(deps: &PluginDeps) -> Self {
        Self {
            gateway: deps.gateway.clone(),
            settings: deps.settings.clone(),
        }
    }

    pub fn instance(deps: &PluginDeps) -> PluginInstance {
        PluginInstance::outgoing(Arc::new(Self::new(deps)))
    }
}

impl Plugin for TestPlugin {
    fn plugin_group(&self) -> &str {
        Self::GROUP
    }

    fn plugin_class_name(&self) -> &str {
        Self::CLASS
    }

    fn description(&self) -> Option<String> {
        Some("Test plugin - sends message every 5 minutes to verify core functionality".into())
    }

    fn validate_config(&self) -> bool {
        if self.recipients().is_empty() {
            error!("TestPlugin: no valid recipients configured (ADMIN_CHAT_ID)");
            return false;
        }
        true
    }
}

#[async_trait]
impl Sender for TestPlugin {
    fn schedule(&self) -> TriggerSpec {
        TriggerSpec::every_minutes(5)
    }

    fn recipients(&self) -> Vec<RecipientId> {
        self.settings.admin_recipients()
    }

    async fn send(&self) -> anyhow::Result<()> {
        let mut failed = 0;
        for chat_id in self.recipients() {
            match self.gateway.send_text(chat_id, TEST_MESSAGE).await {
                Ok(()) => info!("Test message sent to {}", chat_id),
                Err(e) => {
                    error!("Failed to send test message to {}: {}", chat_id, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("test message not delivered to {} recipient(s)", failed);
        }
        Ok(())
    }
}
