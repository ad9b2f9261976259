use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::trigger::TriggerSpec;
use crate::core::error::StoreError;

pub const RECORD_VERSION: &str = "1.0";

const REQUIRED_FIELDS: [&str; 5] = [
    "job_id",
    "plugin_type",
    "plugin_name",
    "plugin_class",
    "schedule",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Outgoing,
    Incoming,
    Hybrid,
}

impl PluginKind {
    pub const ALL: [PluginKind; 3] = [PluginKind::Outgoing, PluginKind::Incoming, PluginKind::Hybrid];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Outgoing => "outgoing",
            PluginKind::Incoming => "incoming",
            PluginKind::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "outgoing" => Some(PluginKind::Outgoing),
            "incoming" => Some(PluginKind::Incoming),
            "hybrid" => Some(PluginKind::Hybrid),
            _ => None,
        }
    }

    /// Outgoing and hybrid jobs own a timer.
    pub fn has_timer(&self) -> bool {
        matches!(self, PluginKind::Outgoing | PluginKind::Hybrid)
    }

    pub fn has_handler(&self) -> bool {
        matches!(self, PluginKind::Incoming | PluginKind::Hybrid)
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detail of the most recent failed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

impl LastError {
    pub fn new(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: context.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_execution: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

fn default_active() -> bool {
    true
}

impl Default for JobMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            active: true,
            created_at: Utc::now(),
            last_execution: None,
            execution_count: 0,
            error_count: 0,
            last_error: None,
        }
    }
}

/// The durable unit: one record per job, keyed by `job_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    #[serde(rename = "plugin_type")]
    pub plugin_kind: PluginKind,
    #[serde(rename = "plugin_name")]
    pub plugin_group: String,
    pub plugin_class: String,
    pub schedule: TriggerSpec,
    #[serde(default)]
    pub metadata: JobMetadata,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    RECORD_VERSION.to_string()
}

impl JobRecord {
    /// Fresh record: counters at zero, never executed.
    pub fn new(
        job_id: impl Into<String>,
        plugin_kind: PluginKind,
        plugin_group: impl Into<String>,
        plugin_class: impl Into<String>,
        schedule: TriggerSpec,
        description: impl Into<String>,
        active: bool,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            plugin_kind,
            plugin_group: plugin_group.into(),
            plugin_class: plugin_class.into(),
            schedule,
            metadata: JobMetadata {
                description: description.into(),
                active,
                ..JobMetadata::default()
            },
            saved_at: None,
            version: default_version(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.metadata.active
    }

    /// Parses and validates a stored record.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| StoreError::Validation(format!("not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let obj = value
            .as_object()
            .ok_or_else(|| StoreError::Validation("record is not an object".into()))?;

        for field in REQUIRED_FIELDS {
            if !obj.contains_key(field) {
                return Err(StoreError::Validation(format!(
                    "missing required field: {}",
                    field
                )));
            }
        }

        let kind = obj.get("plugin_type").and_then(Value::as_str).unwrap_or("");
        if PluginKind::parse(kind).is_none() {
            return Err(StoreError::Validation(format!(
                "invalid plugin_type: {}",
                obj["plugin_type"]
            )));
        }

        match obj.get("schedule").and_then(Value::as_object) {
            Some(schedule) if schedule.contains_key("trigger") => {}
            Some(_) => {
                return Err(StoreError::Validation(
                    "schedule must contain 'trigger'".into(),
                ));
            }
            None => return Err(StoreError::Validation("schedule must be an object".into())),
        }

        let record: JobRecord =
            serde_json::from_value(value).map_err(|e| StoreError::Validation(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// Checks the invariants the typed form cannot express.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !is_valid_job_id(&self.job_id) {
            return Err(StoreError::Validation(format!(
                "invalid job_id: '{}'",
                self.job_id
            )));
        }
        if self.plugin_group.trim().is_empty() {
            return Err(StoreError::Validation("plugin_name is empty".into()));
        }
        if self.plugin_class.trim().is_empty() {
            return Err(StoreError::Validation("plugin_class is empty".into()));
        }
        Ok(())
    }
}

/// Job ids double as file names, so they stay within a safe alphabet.
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= 128
        && !job_id.starts_with('.')
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
