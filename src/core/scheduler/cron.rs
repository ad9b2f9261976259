use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{FireCallback, LiveJob, TriggerEngine};
use crate::core::error::SchedulingError;
use crate::core::storage::TriggerSpec;

struct Registration {
    spec: TriggerSpec,
    callback: FireCallback,
    /// `None` while paused: the job is pulled from the scheduler but kept here.
    handle: Option<Uuid>,
}

/// `TriggerEngine` backed by `tokio-cron-scheduler`.
pub struct CronTriggerEngine {
    scheduler: JobScheduler,
    jobs: Mutex<HashMap<String, Registration>>,
}

impl CronTriggerEngine {
    pub async fn new() -> Result<Self, SchedulingError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulingError::Engine(e.to_string()))?;
        Ok(Self {
            scheduler,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    fn build_job(
        job_id: &str,
        spec: &TriggerSpec,
        callback: FireCallback,
    ) -> Result<Job, SchedulingError> {
        spec.check()?;
        let job = match spec {
            TriggerSpec::Interval(interval) => {
                Job::new_repeated_async(interval.period()?, move |_uuid, mut _l| {
                    let cb = callback.clone();
                    Box::pin(async move {
                        cb().await;
                    })
                })
            }
            TriggerSpec::Cron(cron) => {
                let expression = cron.to_expression()?;
                Job::new_async(expression.as_str(), move |_uuid, mut _l| {
                    let cb = callback.clone();
                    Box::pin(async move {
                        cb().await;
                    })
                })
            }
            TriggerSpec::Date { run_date } => {
                let delay = (*run_date - Utc::now()).to_std().map_err(|_| {
                    SchedulingError::InvalidSpec(format!("run date for {} is in the past", job_id))
                })?;
                Job::new_one_shot_async(delay, move |_uuid, mut _l| {
                    let cb = callback.clone();
                    Box::pin(async move {
                        cb().await;
                    })
                })
            }
            TriggerSpec::Unscheduled => {
                return Err(SchedulingError::UnsupportedTrigger("none".into()));
            }
        };
        job.map_err(|e| SchedulingError::InvalidSpec(format!("{}: {}", job_id, e)))
    }

    async fn add(
        &self,
        job_id: &str,
        spec: &TriggerSpec,
        callback: FireCallback,
    ) -> Result<Uuid, SchedulingError> {
        let job = Self::build_job(job_id, spec, callback)?;
        self.scheduler
            .add(job)
            .await
            .map_err(|e| SchedulingError::Engine(format!("{}: {}", job_id, e)))
    }

    async fn remove_handle(&self, job_id: &str, handle: Uuid) {
        if let Err(e) = self.scheduler.remove(&handle).await {
            warn!("Failed to remove timer for {}: {}", job_id, e);
        }
    }
}

#[async_trait]
impl TriggerEngine for CronTriggerEngine {
    async fn schedule(
        &self,
        job_id: &str,
        spec: &TriggerSpec,
        callback: FireCallback,
    ) -> Result<(), SchedulingError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(job_id) {
            return Err(SchedulingError::Duplicate(job_id.to_string()));
        }
        let handle = self.add(job_id, spec, callback.clone()).await?;
        jobs.insert(
            job_id.to_string(),
            Registration {
                spec: spec.clone(),
                callback,
                handle: Some(handle),
            },
        );
        info!("Scheduled {} ({})", job_id, spec);
        Ok(())
    }

    async fn unschedule(&self, job_id: &str) -> Result<(), SchedulingError> {
        let registration = self
            .jobs
            .lock()
            .await
            .remove(job_id)
            .ok_or_else(|| SchedulingError::NotFound(job_id.to_string()))?;
        if let Some(handle) = registration.handle {
            self.remove_handle(job_id, handle).await;
        }
        info!("Unscheduled {}", job_id);
        Ok(())
    }

    async fn reschedule(&self, job_id: &str, spec: &TriggerSpec) -> Result<(), SchedulingError> {
        let mut jobs = self.jobs.lock().await;
        let registration = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::NotFound(job_id.to_string()))?;

        // A paused job stays paused with the new spec.
        if let Some(old) = registration.handle {
            let new_handle = self.add(job_id, spec, registration.callback.clone()).await?;
            self.remove_handle(job_id, old).await;
            registration.handle = Some(new_handle);
        } else {
            spec.check()?;
        }
        registration.spec = spec.clone();
        info!("Rescheduled {} ({})", job_id, spec);
        Ok(())
    }

    async fn pause(&self, job_id: &str) -> Result<(), SchedulingError> {
        let mut jobs = self.jobs.lock().await;
        let registration = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::NotFound(job_id.to_string()))?;
        if let Some(handle) = registration.handle.take() {
            self.scheduler.remove(&handle).await.map_err(|e| {
                registration.handle = Some(handle);
                SchedulingError::Engine(format!("{}: {}", job_id, e))
            })?;
            debug!("Paused {}", job_id);
        }
        Ok(())
    }

    async fn resume(&self, job_id: &str) -> Result<(), SchedulingError> {
        let mut jobs = self.jobs.lock().await;
        let registration = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulingError::NotFound(job_id.to_string()))?;
        if registration.handle.is_none() {
            let handle = self
                .add(job_id, &registration.spec, registration.callback.clone())
                .await?;
            registration.handle = Some(handle);
            debug!("Resumed {}", job_id);
        }
        Ok(())
    }

    async fn next_fire_time(
        &self,
        job_id: &str,
    ) -> Result<Option<DateTime<Utc>>, SchedulingError> {
        let handle = {
            let jobs = self.jobs.lock().await;
            jobs.get(job_id)
                .ok_or_else(|| SchedulingError::NotFound(job_id.to_string()))?
                .handle
        };
        let Some(handle) = handle else {
            return Ok(None);
        };
        let mut scheduler = self.scheduler.clone();
        scheduler
            .next_tick_for_job(handle)
            .await
            .map_err(|e| SchedulingError::Engine(format!("{}: {}", job_id, e)))
    }

    async fn list_live(&self) -> Vec<LiveJob> {
        let handles: Vec<(String, Option<Uuid>)> = {
            let jobs = self.jobs.lock().await;
            jobs.iter().map(|(id, r)| (id.clone(), r.handle)).collect()
        };

        let mut live = Vec::with_capacity(handles.len());
        let mut scheduler = self.scheduler.clone();
        for (job_id, handle) in handles {
            let next_fire_time = match handle {
                Some(h) => scheduler.next_tick_for_job(h).await.ok().flatten(),
                None => None,
            };
            live.push(LiveJob {
                job_id,
                next_fire_time,
                paused: handle.is_none(),
            });
        }
        live.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        live
    }

    async fn start(&self) -> Result<(), SchedulingError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulingError::Engine(e.to_string()))?;
        info!("Trigger engine started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SchedulingError> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| SchedulingError::Engine(e.to_string()))?;
        self.jobs.lock().await.clear();
        info!("Trigger engine stopped");
        Ok(())
    }
}
