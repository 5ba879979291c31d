use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::scheduler::{Schedule, ScheduledJob, SchedulerError, TaskScheduler};
use super::{BatchError, BatchJobSpec, BatchOrchestrator, BatchReport, CancellationFlag};

/// When a batch job should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Dispatch {
    Now,
    At {
        at: DateTime<Utc>,
    },
    Every {
        start: DateTime<Utc>,
        interval_secs: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed { report: BatchReport },
    Scheduled { task_id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Single entry point for run-now and run-later execution of a [`BatchJobSpec`].
#[derive(Clone)]
pub struct BatchDispatcher {
    orchestrator: Arc<BatchOrchestrator>,
    scheduler: Arc<dyn TaskScheduler>,
    reports: Arc<Mutex<BTreeMap<String, BatchReport>>>,
}

impl BatchDispatcher {
    pub fn new(orchestrator: Arc<BatchOrchestrator>, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            orchestrator,
            scheduler,
            reports: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub async fn dispatch(
        &self,
        spec: BatchJobSpec,
        when: Dispatch,
    ) -> Result<DispatchOutcome, DispatchError> {
        let task_id = spec.task_id();
        let schedule = match when {
            Dispatch::Now => {
                let report = self.orchestrator.run(&spec, &CancellationFlag::new()).await?;
                self.remember(report.clone());
                return Ok(DispatchOutcome::Completed { report });
            }
            Dispatch::At { at } => Schedule::Once { at },
            Dispatch::Every {
                start,
                interval_secs,
            } => Schedule::Every {
                start,
                interval: Duration::from_secs(interval_secs),
            },
        };

        self.scheduler
            .schedule(&task_id, schedule, self.job(spec))?;
        info!(task_id = %task_id, "batch job scheduled");
        Ok(DispatchOutcome::Scheduled { task_id })
    }

    pub fn cancel(&self, task_id: &str) -> bool {
        self.scheduler.cancel(task_id)
    }

    pub fn scheduled(&self) -> Vec<String> {
        self.scheduler.scheduled()
    }

    /// Report of the most recent finished run of the task.
    pub fn last_report(&self, task_id: &str) -> Option<BatchReport> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(task_id)
            .cloned()
    }

    fn remember(&self, report: BatchReport) {
        remember(&self.reports, report);
    }

    fn job(&self, spec: BatchJobSpec) -> ScheduledJob {
        let orchestrator = Arc::clone(&self.orchestrator);
        let reports = Arc::clone(&self.reports);
        Arc::new(move |cancel: CancellationFlag| {
            let orchestrator = Arc::clone(&orchestrator);
            let reports = Arc::clone(&reports);
            let spec = spec.clone();
            let run: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
                match orchestrator.run(&spec, &cancel).await {
                    Ok(report) => remember(&reports, report),
                    Err(failure) => error!(
                        task_id = %spec.task_id(),
                        error = %failure,
                        "scheduled batch run failed"
                    ),
                }
            });
            run
        })
    }
}

fn remember(reports: &Mutex<BTreeMap<String, BatchReport>>, report: BatchReport) {
    reports
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(report.task_id.clone(), report);
}
