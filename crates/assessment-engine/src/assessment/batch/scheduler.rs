use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::CancellationFlag;

/// Deferred work handed to a scheduler; called once per execution.
pub type ScheduledJob =
    Arc<dyn Fn(CancellationFlag) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// When a scheduled task executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Once { at: DateTime<Utc> },
    Every { start: DateTime<Utc>, interval: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("recurring tasks need a positive interval")]
    InvalidInterval,
    #[error("no tokio runtime is available to run scheduled tasks")]
    NoRuntime,
}

/// Named, possibly recurring, deferred jobs. Scheduling an id that is already
/// registered cancels the earlier registration first.
pub trait TaskScheduler: Send + Sync {
    fn schedule(
        &self,
        task_id: &str,
        schedule: Schedule,
        job: ScheduledJob,
    ) -> Result<(), SchedulerError>;
    /// Returns whether a registration was removed.
    fn cancel(&self, task_id: &str) -> bool;
    fn scheduled(&self) -> Vec<String>;
}

struct Registration {
    generation: u64,
    cancel: CancellationFlag,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    tasks: BTreeMap<String, Registration>,
    generation: u64,
}

/// Scheduler backed by tokio tasks.
#[derive(Clone)]
pub struct TokioTaskScheduler {
    runtime: Handle,
    registry: Arc<Mutex<Registry>>,
}

fn delay_until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

impl TokioTaskScheduler {
    /// Uses the runtime the caller is running on.
    pub fn new() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::with_handle)
            .map_err(|_| SchedulerError::NoRuntime)
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskScheduler for TokioTaskScheduler {
    fn schedule(
        &self,
        task_id: &str,
        schedule: Schedule,
        job: ScheduledJob,
    ) -> Result<(), SchedulerError> {
        if let Schedule::Every { interval, .. } = schedule {
            if interval.is_zero() {
                return Err(SchedulerError::InvalidInterval);
            }
        }

        let mut registry = self.registry();
        if let Some(previous) = registry.tasks.remove(task_id) {
            previous.cancel.cancel();
            previous.handle.abort();
            info!(task_id, "replaced scheduled task");
        }
        registry.generation += 1;
        let generation = registry.generation;

        let cancel = CancellationFlag::new();
        let flag = cancel.clone();
        let owner = Arc::clone(&self.registry);
        let id = task_id.to_string();
        let handle = self.runtime.spawn(async move {
            match schedule {
                Schedule::Once { at } => {
                    tokio::time::sleep(delay_until(at)).await;
                    if !flag.is_cancelled() {
                        job(flag.clone()).await;
                    }
                }
                Schedule::Every { start, interval } => {
                    tokio::time::sleep(delay_until(start)).await;
                    while !flag.is_cancelled() {
                        job(flag.clone()).await;
                        tokio::time::sleep(interval).await;
                    }
                }
            }

            let mut registry = owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let finished = registry
                .tasks
                .get(&id)
                .map_or(false, |registration| registration.generation == generation);
            if finished {
                registry.tasks.remove(&id);
                debug!(task_id = %id, "scheduled task finished");
            }
        });

        registry.tasks.insert(
            task_id.to_string(),
            Registration {
                generation,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    fn cancel(&self, task_id: &str) -> bool {
        match self.registry().tasks.remove(task_id) {
            Some(registration) => {
                registration.cancel.cancel();
                registration.handle.abort();
                info!(task_id, "scheduled task cancelled");
                true
            }
            None => false,
        }
    }

    fn scheduled(&self) -> Vec<String> {
        self.registry().tasks.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> ScheduledJob {
        Arc::new(move |_cancel: CancellationFlag| {
            let counter = Arc::clone(&counter);
            let run: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            run
        })
    }

    #[tokio::test]
    async fn one_shot_task_runs_and_deregisters() {
        let scheduler = TokioTaskScheduler::new().expect("runtime available");
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(
                "nightly",
                Schedule::Once { at: Utc::now() },
                counting_job(Arc::clone(&counter)),
            )
            .expect("scheduled");

        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 1 && scheduler.scheduled().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn rescheduling_replaces_instead_of_duplicating() {
        let scheduler = TokioTaskScheduler::new().expect("runtime available");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let later = Utc::now() + chrono::Duration::milliseconds(50);

        scheduler
            .schedule(
                "journals",
                Schedule::Once { at: later },
                counting_job(Arc::clone(&first)),
            )
            .expect("scheduled");
        scheduler
            .schedule(
                "journals",
                Schedule::Once { at: later },
                counting_job(Arc::clone(&second)),
            )
            .expect("rescheduled");
        assert_eq!(scheduler.scheduled(), vec!["journals".to_string()]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_stops_pending_task() {
        let scheduler = TokioTaskScheduler::new().expect("runtime available");
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(
                "theses",
                Schedule::Every {
                    start: Utc::now() + chrono::Duration::milliseconds(100),
                    interval: Duration::from_millis(10),
                },
                counting_job(Arc::clone(&counter)),
            )
            .expect("scheduled");

        assert!(scheduler.cancel("theses"));
        assert!(!scheduler.cancel("theses"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejects_zero_interval() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let scheduler = TokioTaskScheduler::with_handle(runtime.handle().clone());
        let error = scheduler
            .schedule(
                "broken",
                Schedule::Every {
                    start: Utc::now(),
                    interval: Duration::ZERO,
                },
                counting_job(Arc::new(AtomicUsize::new(0))),
            )
            .expect_err("zero interval");
        assert_eq!(error, SchedulerError::InvalidInterval);
    }
}
