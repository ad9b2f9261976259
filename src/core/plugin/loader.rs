use std::sync::{Arc, Weak};

use tracing::debug;

use super::contract::{PluginInstance, derive_job_id};
use crate::core::config::Settings;
use crate::core::error::PluginLoadError;
use crate::core::scheduler::SchedulerCoordinator;
use crate::core::storage::{JobRecord, PluginKind};
use crate::interfaces::gateway::MessagingGateway;

/// What a plugin constructor gets wired to.
#[derive(Clone)]
pub struct PluginDeps {
    pub gateway: Arc<dyn MessagingGateway>,
    /// Weak so plugins held by the coordinator do not keep it alive.
    pub coordinator: Weak<SchedulerCoordinator>,
    pub settings: Arc<Settings>,
}

/// Turns a persisted record back into a live plugin.
pub trait PluginLoader: Send + Sync {
    fn load(&self, record: &JobRecord) -> Result<PluginInstance, PluginLoadError>;
}

pub type PluginConstructor = fn(&PluginDeps) -> PluginInstance;

pub struct CatalogEntry {
    pub kind: PluginKind,
    pub group: &'static str,
    pub class: &'static str,
    /// Registered on startup when no record exists yet.
    pub seed_on_first_run: bool,
    pub construct: PluginConstructor,
}

impl CatalogEntry {
    pub fn job_id(&self) -> String {
        derive_job_id(self.kind, self.class)
    }
}

/// Closed lookup table keyed by `(kind, group, class)`.
pub struct PluginCatalog {
    deps: PluginDeps,
    entries: Vec<CatalogEntry>,
}

impl PluginCatalog {
    pub fn new(deps: PluginDeps) -> Self {
        Self {
            deps,
            entries: Vec::new(),
        }
    }

    pub fn with(mut self, entry: CatalogEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn deps(&self) -> &PluginDeps {
        &self.deps
    }

    pub fn construct(&self, entry: &CatalogEntry) -> PluginInstance {
        (entry.construct)(&self.deps)
    }

    fn find(&self, kind: PluginKind, group: &str, class: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.group == group && e.class == class)
    }
}

impl PluginLoader for PluginCatalog {
    fn load(&self, record: &JobRecord) -> Result<PluginInstance, PluginLoadError> {
        let entry = self
            .find(record.plugin_kind, &record.plugin_group, &record.plugin_class)
            .ok_or_else(|| PluginLoadError::UnknownPlugin {
                kind: record.plugin_kind,
                group: record.plugin_group.clone(),
                class: record.plugin_class.clone(),
            })?;
        let instance = self.construct(entry);
        if instance.job_id() != record.job_id {
            return Err(PluginLoadError::Construction {
                class: record.plugin_class.clone(),
                reason: format!(
                    "built job id {} but the record is {}",
                    instance.job_id(),
                    record.job_id
                ),
            });
        }
        debug!("Loaded {} from catalog", record.job_id);
        Ok(instance)
    }
}
