use std::sync::Arc;

use async_trait::async_trait;

use crate::core::storage::{JobRecord, PluginKind, TriggerSpec};
use crate::interfaces::gateway::{InboundEvent, MessageFilter, RecipientId};

/// Identity shared by every plugin kind.
pub trait Plugin: Send + Sync + 'static {
    /// Logical group, persisted as `plugin_name`.
    fn plugin_group(&self) -> &str;

    /// Concrete class name; also the stem of the job id.
    fn plugin_class_name(&self) -> &str;

    fn description(&self) -> Option<String> {
        None
    }

    fn validate_config(&self) -> bool {
        true
    }
}

/// Outgoing capability: fires on a timer and pushes messages.
#[async_trait]
pub trait Sender: Plugin {
    fn schedule(&self) -> TriggerSpec;

    fn recipients(&self) -> Vec<RecipientId>;

    async fn send(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Command,
    Message,
}

#[derive(Debug, Clone)]
pub enum HandlerConfig {
    Command { command: String, description: String },
    Message { filter: MessageFilter },
}

impl HandlerConfig {
    pub fn command(command: impl Into<String>, description: impl Into<String>) -> Self {
        HandlerConfig::Command {
            command: command.into(),
            description: description.into(),
        }
    }

    pub fn handler_type(&self) -> HandlerType {
        match self {
            HandlerConfig::Command { .. } => HandlerType::Command,
            HandlerConfig::Message { .. } => HandlerType::Message,
        }
    }
}

/// Incoming capability: reacts to commands or messages.
#[async_trait]
pub trait Handler: Plugin {
    fn handler_config(&self) -> HandlerConfig;

    fn handler_type(&self) -> HandlerType {
        self.handler_config().handler_type()
    }

    async fn handle(&self, event: &InboundEvent) -> anyhow::Result<()>;
}

/// Both capabilities. Implemented for anything that is a `Sender` and a `Handler`.
pub trait Hybrid: Sender + Handler {}

impl<T: Sender + Handler> Hybrid for T {}

/// A plugin resolved to exactly one kind.
#[derive(Clone)]
pub enum PluginBody {
    Outgoing(Arc<dyn Sender>),
    Incoming(Arc<dyn Handler>),
    Hybrid(Arc<dyn Hybrid>),
}

macro_rules! with_plugin {
    ($body:expr, $p:ident => $e:expr) => {
        match $body {
            PluginBody::Outgoing($p) => $e,
            PluginBody::Incoming($p) => $e,
            PluginBody::Hybrid($p) => $e,
        }
    };
}

/// `<Class>_job` for outgoing and hybrid plugins, `<Class>_handler` for incoming.
pub fn derive_job_id(kind: PluginKind, class_name: &str) -> String {
    match kind {
        PluginKind::Outgoing | PluginKind::Hybrid => format!("{}_job", class_name),
        PluginKind::Incoming => format!("{}_handler", class_name),
    }
}

/// Live plugin object held by the coordinator's registry.
#[derive(Clone)]
pub struct PluginInstance {
    job_id: String,
    body: PluginBody,
}

impl PluginInstance {
    pub fn new(body: PluginBody) -> Self {
        let kind = match &body {
            PluginBody::Outgoing(_) => PluginKind::Outgoing,
            PluginBody::Incoming(_) => PluginKind::Incoming,
            PluginBody::Hybrid(_) => PluginKind::Hybrid,
        };
        let job_id = derive_job_id(kind, with_plugin!(&body, p => p.plugin_class_name()));
        Self { job_id, body }
    }

    pub fn outgoing(plugin: Arc<dyn Sender>) -> Self {
        Self::new(PluginBody::Outgoing(plugin))
    }

    pub fn incoming(plugin: Arc<dyn Handler>) -> Self {
        Self::new(PluginBody::Incoming(plugin))
    }

    pub fn hybrid(plugin: Arc<dyn Hybrid>) -> Self {
        Self::new(PluginBody::Hybrid(plugin))
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn kind(&self) -> PluginKind {
        match &self.body {
            PluginBody::Outgoing(_) => PluginKind::Outgoing,
            PluginBody::Incoming(_) => PluginKind::Incoming,
            PluginBody::Hybrid(_) => PluginKind::Hybrid,
        }
    }

    pub fn plugin_group(&self) -> &str {
        with_plugin!(&self.body, p => p.plugin_group())
    }

    pub fn plugin_class_name(&self) -> &str {
        with_plugin!(&self.body, p => p.plugin_class_name())
    }

    /// The plugin's own description, or `<Class> - <KIND> plugin`.
    pub fn description(&self) -> String {
        with_plugin!(&self.body, p => p.description()).unwrap_or_else(|| {
            format!(
                "{} - {} plugin",
                self.plugin_class_name(),
                self.kind().as_str().to_uppercase()
            )
        })
    }

    pub fn validate_config(&self) -> bool {
        with_plugin!(&self.body, p => p.validate_config())
    }

    /// Default schedule; `none` for handler-only plugins.
    pub fn schedule(&self) -> TriggerSpec {
        match &self.body {
            PluginBody::Outgoing(p) => p.schedule(),
            PluginBody::Hybrid(p) => p.schedule(),
            PluginBody::Incoming(_) => TriggerSpec::Unscheduled,
        }
    }

    pub fn recipients(&self) -> Vec<RecipientId> {
        match &self.body {
            PluginBody::Outgoing(p) => p.recipients(),
            PluginBody::Hybrid(p) => p.recipients(),
            PluginBody::Incoming(_) => Vec::new(),
        }
    }

    pub fn handler_config(&self) -> Option<HandlerConfig> {
        match &self.body {
            PluginBody::Incoming(p) => Some(p.handler_config()),
            PluginBody::Hybrid(p) => Some(p.handler_config()),
            PluginBody::Outgoing(_) => None,
        }
    }

    /// A fresh, active record for first registration.
    pub fn new_record(&self) -> JobRecord {
        JobRecord::new(
            self.job_id.clone(),
            self.kind(),
            self.plugin_group(),
            self.plugin_class_name(),
            self.schedule(),
            self.description(),
            true,
        )
    }

    pub async fn send(&self) -> anyhow::Result<()> {
        match &self.body {
            PluginBody::Outgoing(p) => p.send().await,
            PluginBody::Hybrid(p) => p.send().await,
            PluginBody::Incoming(_) => {
                anyhow::bail!("{} has no outgoing capability", self.job_id)
            }
        }
    }

    pub async fn handle(&self, event: &InboundEvent) -> anyhow::Result<()> {
        match &self.body {
            PluginBody::Incoming(p) => p.handle(event).await,
            PluginBody::Hybrid(p) => p.handle(event).await,
            PluginBody::Outgoing(_) => {
                anyhow::bail!("{} has no incoming capability", self.job_id)
            }
        }
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("job_id", &self.job_id)
            .field("kind", &self.kind())
            .finish()
    }
}
