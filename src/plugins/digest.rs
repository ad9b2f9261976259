use std::sync::{Arc, Weak};

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use super::plugin_manager::UNAUTHORIZED;
use crate::core::config::Settings;
use crate::core::plugin::{Handler, HandlerConfig, Plugin, PluginDeps, PluginInstance, Sender};
use crate::core::report;
use crate::core::scheduler::SchedulerCoordinator;
use crate::core::storage::TriggerSpec;
use crate::interfaces::gateway::{InboundEvent, MessagingGateway, RecipientId};

/// Daily plugin summary for the admin chat, also available on `/digest`.
pub struct StatusDigest {
    gateway: Arc<dyn MessagingGateway>,
    coordinator: Weak<SchedulerCoordinator>,
    settings: Arc<Settings>,
}

impl StatusDigest {
    pub const GROUP: &'static str = "digest";
    pub const CLASS: &'static str = "StatusDigest";

    pub fn new(deps: &PluginDeps) -> Self {
        Self {
            gateway: deps.gateway.clone(),
            coordinator: deps.coordinator.clone(),
            settings: deps.settings.clone(),
        }
    }

    pub fn instance(deps: &PluginDeps) -> PluginInstance {
        PluginInstance::hybrid(Arc::new(Self::new(deps)))
    }

    async fn digest(&self) -> anyhow::Result<String> {
        let coordinator = self
            .coordinator
            .upgrade()
            .context("coordinator is gone")?;
        let records = coordinator.list().await?;
        Ok(report::format_digest(&records))
    }
}

impl Plugin for StatusDigest {
    fn plugin_group(&self) -> &str {
        Self::GROUP
    }

    fn plugin_class_name(&self) -> &str {
        Self::CLASS
    }

    fn description(&self) -> Option<String> {
        Some("Daily plugin digest for the admin chat, also on /digest".into())
    }

    fn validate_config(&self) -> bool {
        !self.recipients().is_empty()
    }
}

#[async_trait]
impl Sender for StatusDigest {
    fn schedule(&self) -> TriggerSpec {
        TriggerSpec::daily_at(8, 0)
    }

    fn recipients(&self) -> Vec<RecipientId> {
        self.settings.admin_recipients()
    }

    async fn send(&self) -> anyhow::Result<()> {
        let text = self.digest().await?;
        for chat_id in self.recipients() {
            self.gateway.send_text(chat_id, &text).await?;
        }
        info!("Digest sent to {} recipient(s)", self.recipients().len());
        Ok(())
    }
}

#[async_trait]
impl Handler for StatusDigest {
    fn handler_config(&self) -> HandlerConfig {
        HandlerConfig::command("digest", "Show a plugin summary")
    }

    async fn handle(&self, event: &InboundEvent) -> anyhow::Result<()> {
        let reply = if self.settings.is_admin(event.chat_id) {
            self.digest().await?
        } else {
            UNAUTHORIZED.to_string()
        };
        self.gateway.send_text(event.chat_id, &reply).await?;
        Ok(())
    }
}
