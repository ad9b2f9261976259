use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::error;

use crate::core::config::Settings;
use crate::core::plugin::{Handler, HandlerConfig, Plugin, PluginDeps, PluginInstance};
use crate::core::report;
use crate::core::scheduler::{SchedulerCoordinator, ToggleOutcome};
use crate::interfaces::gateway::{InboundEvent, MessagingGateway};

pub const UNAUTHORIZED: &str = "You are not authorized to use this command.";

const USAGE: &str = "Invalid usage. Try:\n\
/plugins - List all plugins\n\
/plugins enable <job_id> - Enable a plugin\n\
/plugins disable <job_id> - Disable a plugin\n\
/plugins status <job_id> - Show plugin status";

/// `/plugins` admin command: list, enable, disable, status.
pub struct PluginManagerCommand {
    gateway: Arc<dyn MessagingGateway>,
    coordinator: Weak<SchedulerCoordinator>,
    settings: Arc<Settings>,
}

impl PluginManagerCommand {
    pub const GROUP: &'static str = "plugin_manager";
    pub const CLASS: &'static str = "PluginManagerCommand";

    pub fn new(deps: &PluginDeps) -> Self {
        Self {
            gateway: deps.gateway.clone(),
            coordinator: deps.coordinator.clone(),
            settings: deps.settings.clone(),
        }
    }

    pub fn instance(deps: &PluginDeps) -> PluginInstance {
        PluginInstance::incoming(Arc::new(Self::new(deps)))
    }

    /// Always produces a reply; coordinator errors become text.
    async fn reply_for(&self, event: &InboundEvent) -> String {
        if !self.settings.is_admin(event.chat_id) {
            return UNAUTHORIZED.to_string();
        }
        let Some(coordinator) = self.coordinator.upgrade() else {
            return "Plugin manager is not available right now.".to_string();
        };

        match event.args.as_slice() {
            [] => match coordinator.list().await {
                Ok(records) => report::format_listing(&records),
                Err(e) => {
                    error!("Error listing plugins: {}", e);
                    format!("Error listing plugins: {}", e)
                }
            },
            [_] => USAGE.to_string(),
            [action, job_id, ..] => match action.to_lowercase().as_str() {
                "enable" => enable_reply(&coordinator, job_id).await,
                "disable" => disable_reply(&coordinator, job_id).await,
                "status" => match coordinator.status(job_id).await {
                    Ok(status) => report::format_status(&status),
                    Err(e) if e.is_not_found() => format!("Plugin {} not found.", job_id),
                    Err(e) => {
                        error!("Error showing status for {}: {}", job_id, e);
                        format!("Error showing status: {}", e)
                    }
                },
                other => format!("Unknown action: {}", other),
            },
        }
    }
}

async fn enable_reply(coordinator: &SchedulerCoordinator, job_id: &str) -> String {
    match coordinator.enable(job_id).await {
        Ok(ToggleOutcome::AlreadyInState) => format!("Plugin {} is already enabled.", job_id),
        Ok(ToggleOutcome::Live) => format!("Plugin {} enabled and resumed.", job_id),
        Ok(ToggleOutcome::Started) => format!("Plugin {} enabled and started.", job_id),
        Ok(ToggleOutcome::StoredOnly) => format!(
            "Plugin {} enabled in storage but not running in scheduler. Restart the bot to activate it.",
            job_id
        ),
        Err(e) if e.is_not_found() => format!("Plugin {} not found.", job_id),
        Err(e) => {
            error!("Error enabling plugin {}: {}", job_id, e);
            format!("Error enabling plugin: {}", e)
        }
    }
}

async fn disable_reply(coordinator: &SchedulerCoordinator, job_id: &str) -> String {
    match coordinator.disable(job_id).await {
        Ok(ToggleOutcome::AlreadyInState) => format!("Plugin {} is already disabled.", job_id),
        Ok(ToggleOutcome::Live) | Ok(ToggleOutcome::Started) => {
            format!("Plugin {} disabled and paused.", job_id)
        }
        Ok(ToggleOutcome::StoredOnly) => {
            format!("Plugin {} disabled in storage but not found in scheduler.", job_id)
        }
        Err(e) if e.is_not_found() => format!("Plugin {} not found.", job_id),
        Err(e) => {
            error!("Error disabling plugin {}: {}", job_id, e);
            format!("Error disabling plugin: {}", e)
        }
    }
}

impl Plugin for PluginManagerCommand {
    fn plugin_group(&self) -> &str {
        Self::GROUP
    }

    fn plugin_class_name(&self) -> &str {
        Self::CLASS
    }

    fn description(&self) -> Option<String> {
        Some("Plugin management commands (list, enable, disable)".into())
    }
}

#[async_trait]
impl Handler for PluginManagerCommand {
    fn handler_config(&self) -> HandlerConfig {
        HandlerConfig::command("plugins", "Manage bot plugins")
    }

    async fn handle(&self, event: &InboundEvent) -> anyhow::Result<()> {
        let reply = self.reply_for(event).await;
        self.gateway.send_text(event.chat_id, &reply).await?;
        Ok(())
    }
}
