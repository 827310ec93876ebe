//! Stage dispatcher and worker pool.
//!
//! A worker pops a job id, the dispatcher loads the job and routes it to
//! the handler registered for its current status. The handler returns the
//! next status and whether to re-enqueue; the dispatcher owns the single
//! compare-and-set that moves the status, so duplicate queue deliveries
//! and racing workers resolve to exactly one winner. An uncaught handler
//! error maps to FAILED with an error event and no retry.

pub mod stages;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::events::{EventBus, PresentationEvent};
use crate::queue::JobQueue;
use crate::store::{Job, SqliteStore};
use crate::types::{EngineError, JobId, JobStatus, PipelinePhase};

pub use stages::EngineContext;

/// What a stage did with the job.
#[derive(Debug)]
pub struct StageOutcome {
    pub new_status: JobStatus,
    pub reenqueue: bool,
    pub event: Option<PresentationEvent>,
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage name for logs and error events.
    fn name(&self) -> &'static str;

    /// The status this handler owns.
    fn handles(&self) -> JobStatus;

    async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError>;
}

pub struct StageDispatcher {
    store: Arc<SqliteStore>,
    queue: Arc<JobQueue>,
    bus: Arc<EventBus>,
    handlers: HashMap<JobStatus, Arc<dyn StageHandler>>,
}

impl StageDispatcher {
    pub fn new(store: Arc<SqliteStore>, queue: Arc<JobQueue>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            queue,
            bus,
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        let status = handler.handles();
        if self.handlers.insert(status, handler).is_some() {
            tracing::warn!("Stage handler for {status} replaced");
        }
    }

    /// Wire up the full stage graph.
    pub fn with_standard_stages(mut self, ctx: Arc<EngineContext>) -> Self {
        for handler in stages::standard_stages(ctx) {
            self.register(handler);
        }
        self
    }

    /// Process one delivery of a job id.
    pub async fn dispatch(&self, job_id: JobId) {
        let job = match self.store.load_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!("Dropping delivery for job {job_id}: {e}");
                return;
            }
        };

        if job.status.is_terminal() || job.status.is_awaiting_input() {
            tracing::debug!("Job {job_id} is {}; nothing to do", job.status);
            return;
        }

        let Some(handler) = self.handlers.get(&job.status) else {
            tracing::warn!("No stage handler for status {}; dropping job {job_id}", job.status);
            return;
        };

        tracing::info!("Job {job_id}: running stage {} at {}", handler.name(), job.status);
        let outcome = match handler.run(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Stage {} failed for job {job_id}: {e}", handler.name());
                self.fail_job(&job, handler.name(), &e).await;
                return;
            }
        };

        // The single point of status mutation.
        let advanced = match self
            .store
            .update_status(job_id, job.status, outcome.new_status)
            .await
        {
            Ok(advanced) => advanced,
            Err(e) => {
                tracing::error!("Status update failed for job {job_id}: {e}");
                return;
            }
        };
        if !advanced {
            // A competing worker already moved the job; drop silently.
            tracing::debug!(
                "CAS conflict for job {job_id}: {} → {} lost",
                job.status,
                outcome.new_status
            );
            return;
        }
        tracing::info!("Job {job_id}: {} → {}", job.status, outcome.new_status);

        if let Some(event) = outcome.event {
            self.bus.publish(job.user_id, event);
        }

        if outcome.reenqueue {
            if let Err(e) = self.queue.enqueue(job_id).await {
                // The queue redelivers at-least-once; a failed push here is
                // logged and left to operator requeue.
                tracing::error!("Re-enqueue failed for job {job_id}: {e}");
            }
        }
    }

    async fn fail_job(&self, job: &Job, stage: &str, error: &EngineError) {
        match self.store.update_status(job.id, job.status, JobStatus::Failed).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Job {} moved during failure handling", job.id);
                return;
            }
            Err(e) => {
                tracing::error!("Could not mark job {} failed: {e}", job.id);
                return;
            }
        }
        let event = PresentationEvent::new(job.id, job.mode, PipelinePhase::Creation)
            .with_error(format!("{stage}: {error}"));
        self.bus.publish(job.user_id, event);
    }
}

/// Fixed-size worker pool draining the job queue.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(dispatcher: Arc<StageDispatcher>, queue: Arc<JobQueue>, size: usize) -> Self {
        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let dispatcher = dispatcher.clone();
            let queue = queue.clone();
            workers.push(tokio::spawn(async move {
                tracing::debug!("Worker {worker_id} started");
                while let Some(job_id) = queue.pop().await {
                    dispatcher.dispatch(job_id).await;
                }
                tracing::debug!("Worker {worker_id} stopped");
            }));
        }
        Self { queue, workers }
    }

    /// Stop accepting work and wait for in-flight stages to finish.
    pub async fn shutdown(self) {
        self.queue.shutdown();
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::types::{JobMode, UserId};

    struct AdvanceStage;

    #[async_trait]
    impl StageHandler for AdvanceStage {
        fn name(&self) -> &'static str {
            "advance"
        }
        fn handles(&self) -> JobStatus {
            JobStatus::ReadyToIngest
        }
        async fn run(&self, _job: &Job) -> Result<StageOutcome, EngineError> {
            Ok(StageOutcome {
                new_status: JobStatus::Ingested,
                reenqueue: false,
                event: None,
            })
        }
    }

    struct FailingStage;

    #[async_trait]
    impl StageHandler for FailingStage {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn handles(&self) -> JobStatus {
            JobStatus::Ingested
        }
        async fn run(&self, job: &Job) -> Result<StageOutcome, EngineError> {
            Err(EngineError::Stage(crate::types::StageError::Execution {
                job_id: job.id,
                stage: "failing",
                reason: "boom".to_string(),
            }))
        }
    }

    async fn setup() -> (Arc<SqliteStore>, Arc<JobQueue>, StageDispatcher, JobId) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let queue = Arc::new(JobQueue::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        let dispatcher = StageDispatcher::new(store.clone(), queue.clone(), bus);
        let job = store
            .create_job(UserId(1), JobMode::Discovery, &JobConfig::default(), None, None)
            .await
            .unwrap();
        (store, queue, dispatcher, job.id)
    }

    #[tokio::test]
    async fn dispatch_advances_status() {
        let (store, _, mut dispatcher, job_id) = setup().await;
        store.set_status(job_id, JobStatus::ReadyToIngest).await.unwrap();
        dispatcher.register(Arc::new(AdvanceStage));

        dispatcher.dispatch(job_id).await;
        assert_eq!(store.load_job(job_id).await.unwrap().status, JobStatus::Ingested);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_idempotent() {
        let (store, _, mut dispatcher, job_id) = setup().await;
        store.set_status(job_id, JobStatus::ReadyToIngest).await.unwrap();
        dispatcher.register(Arc::new(AdvanceStage));

        dispatcher.dispatch(job_id).await;
        dispatcher.dispatch(job_id).await; // second delivery: no handler for INGESTED
        assert_eq!(store.load_job(job_id).await.unwrap().status, JobStatus::Ingested);
    }

    #[tokio::test]
    async fn handler_error_marks_failed() {
        let (store, _, mut dispatcher, job_id) = setup().await;
        store.set_status(job_id, JobStatus::Ingested).await.unwrap();
        dispatcher.register(Arc::new(FailingStage));

        dispatcher.dispatch(job_id).await;
        assert_eq!(store.load_job(job_id).await.unwrap().status, JobStatus::Failed);

        // Terminal: further deliveries are no-ops.
        dispatcher.dispatch(job_id).await;
        assert_eq!(store.load_job(job_id).await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn missing_handler_drops_delivery() {
        let (store, _, dispatcher, job_id) = setup().await;
        store.set_status(job_id, JobStatus::ReadyToIngest).await.unwrap();
        dispatcher.dispatch(job_id).await;
        // Unchanged: logged and dropped.
        assert_eq!(
            store.load_job(job_id).await.unwrap().status,
            JobStatus::ReadyToIngest
        );
    }

    #[tokio::test]
    async fn worker_pool_drains_queue() {
        let (store, queue, mut dispatcher, job_id) = setup().await;
        store.set_status(job_id, JobStatus::ReadyToIngest).await.unwrap();
        dispatcher.register(Arc::new(AdvanceStage));
        let dispatcher = Arc::new(dispatcher);

        let pool = WorkerPool::start(dispatcher, queue.clone(), 2);
        queue.enqueue(job_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        pool.shutdown().await;

        assert_eq!(store.load_job(job_id).await.unwrap().status, JobStatus::Ingested);
    }
}
