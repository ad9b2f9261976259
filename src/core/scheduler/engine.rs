use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::error::SchedulingError;
use crate::core::storage::TriggerSpec;

pub type FireFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked on every timer fire. Must not fail; errors stay inside the callback.
pub type FireCallback = Arc<dyn Fn() -> FireFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveJob {
    pub job_id: String,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub paused: bool,
}

/// Timer facade. Every rejection comes back as a `SchedulingError`; the
/// coordinator decides whether to roll back.
#[async_trait]
pub trait TriggerEngine: Send + Sync {
    async fn schedule(
        &self,
        job_id: &str,
        spec: &TriggerSpec,
        callback: FireCallback,
    ) -> Result<(), SchedulingError>;

    async fn unschedule(&self, job_id: &str) -> Result<(), SchedulingError>;

    async fn reschedule(&self, job_id: &str, spec: &TriggerSpec) -> Result<(), SchedulingError>;

    /// Keeps the registration but stops fires; `next_fire_time` becomes `None`.
    async fn pause(&self, job_id: &str) -> Result<(), SchedulingError>;

    async fn resume(&self, job_id: &str) -> Result<(), SchedulingError>;

    /// `Err(NotFound)` when nothing is registered under `job_id`.
    async fn next_fire_time(&self, job_id: &str)
    -> Result<Option<DateTime<Utc>>, SchedulingError>;

    async fn list_live(&self) -> Vec<LiveJob>;

    async fn start(&self) -> Result<(), SchedulingError>;

    async fn shutdown(&self) -> Result<(), SchedulingError>;
}
