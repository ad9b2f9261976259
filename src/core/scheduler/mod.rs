mod coordinator;
mod cron;
mod engine;

pub use coordinator::{
    JobStatus, RescheduleOutcome, RestoreReport, SchedulerCoordinator, TimerState, ToggleOutcome,
};
pub use cron::CronTriggerEngine;
pub use engine::{FireCallback, FireFuture, LiveJob, TriggerEngine};
