//! Serendip engine: iterative hypothesis discovery over scientific
//! literature.
//!
//! A job cycles through ingestion, knowledge-graph construction, path
//! reasoning, and a decision-control loop that halts with a conclusion,
//! fetches more literature, downloads promising papers for deeper
//! extraction, or asks for more input. The engine owns the durable job
//! state machine and the worker pool; LLMs, embedders, paper sources, and
//! document parsers plug in behind provider traits.

pub mod config;
pub mod decide;
pub mod dispatch;
pub mod domains;
pub mod embed;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod graph;
pub mod ingest;
pub mod input;
pub mod llm;
pub mod measure;
pub mod queue;
pub mod reasoning;
pub mod signals;
pub mod store;
pub mod triples;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use config::AdminPolicy;
use decide::handlers::HandlerRegistry;
use decide::{ControllerMode, DecisionController};
use dispatch::{EngineContext, StageDispatcher, WorkerPool};
use embed::{CachingEmbedder, Embedder, HashEmbedder, HttpEmbedder};
use events::EventBus;
use fetch::download::{ContentFetcher, FileTextExtractor, HttpContentFetcher, PassthroughTextExtractor};
use fetch::{FetchService, PaperDownloader, ProviderRegistry};
use graph::GraphCache;
use llm::{HttpLlmClient, LlmProvider};
use queue::JobQueue;
use store::SqliteStore;
use types::{EngineError, EngineResult, JobId, JobMode, JobStatus, UserId};

pub use events::PresentationEvent;
pub use types::DecisionLabel;

const DEFAULT_WORKERS: usize = 4;

/// The assembled engine: store, queue, event bus, and the dispatcher with
/// its standard stage set.
pub struct Engine {
    pub store: Arc<SqliteStore>,
    pub queue: Arc<JobQueue>,
    pub bus: Arc<EventBus>,
    pub policy: Arc<AdminPolicy>,
    dispatcher: Arc<StageDispatcher>,
    llm: Option<Arc<dyn LlmProvider>>,
    worker_count: usize,
}

impl Engine {
    pub fn builder(policy: AdminPolicy) -> EngineBuilder {
        EngineBuilder::new(policy)
    }

    /// Start the worker pool. Callers hold the returned pool and await
    /// `shutdown` for a graceful stop.
    pub fn start_workers(&self) -> WorkerPool {
        tracing::info!("Starting {} worker(s)", self.worker_count);
        WorkerPool::start(self.dispatcher.clone(), self.queue.clone(), self.worker_count)
    }

    /// Dispatch one delivery inline; used by tests and drain loops.
    pub async fn dispatch_once(&self, job_id: JobId) {
        self.dispatcher.dispatch(job_id).await;
    }

    /// Drain the queue single-threadedly until empty. Deterministic
    /// alternative to the worker pool for tests and the CLI's one-shot
    /// mode.
    pub async fn drain(&self) {
        while let Some(job_id) = self.queue.try_pop().await {
            self.dispatcher.dispatch(job_id).await;
        }
    }

    /// Create a discovery job from a research seed and enqueue it.
    pub async fn submit_seed(
        &self,
        user_id: UserId,
        seed_text: &str,
        config: config::JobConfig,
    ) -> EngineResult<JobId> {
        let job = self
            .store
            .create_job(user_id, JobMode::Discovery, &config, Some(seed_text), None)
            .await?;
        input::InputHandler::new(self.store.clone())
            .add_user_text(job.id, seed_text)
            .await?;
        self.queue.enqueue(job.id).await?;
        tracing::info!("Submitted discovery job {} for user {user_id}", job.id);
        Ok(job.id)
    }

    /// Create a verification job for an entity pair and enqueue it.
    pub async fn submit_verification(
        &self,
        user_id: UserId,
        source: &str,
        target: &str,
        config: config::JobConfig,
    ) -> EngineResult<JobId> {
        let job = self
            .store
            .create_job(
                user_id,
                JobMode::Verification,
                &config,
                None,
                Some((source, target)),
            )
            .await?;
        // Seed the graph with the pair so query-mode reasoning has its
        // endpoints from the first cycle.
        input::InputHandler::new(self.store.clone())
            .add_user_text(job.id, &format!("{source} and {target}"))
            .await?;
        self.queue.enqueue(job.id).await?;
        tracing::info!("Submitted verification job {} ({source} / {target})", job.id);
        Ok(job.id)
    }

    pub async fn job_status(&self, job_id: JobId) -> EngineResult<JobStatus> {
        Ok(self.store.load_job(job_id).await?.status)
    }

    /// Classify an inbound chat message, apply it to job state, and
    /// enqueue the job when the message produced pipeline work. Without
    /// an LLM everything lands as conversational.
    pub async fn handle_chat(
        &self,
        job_id: JobId,
        text: &str,
    ) -> EngineResult<types::ClassifierLabel> {
        let result = match &self.llm {
            Some(llm) => {
                input::TextClassifier::new(llm.clone())
                    .classify(text)
                    .await
            }
            None => input::ClassificationResult {
                label: types::ClassifierLabel::Conversational,
                payload: serde_json::json!({ "raw_text": text }),
            },
        };
        let enqueue = input::apply_classification(&self.store, job_id, &result, text).await?;
        if enqueue {
            self.queue.enqueue(job_id).await?;
        }
        Ok(result.label)
    }
}

/// Builder wiring the service graph. Every provider can be replaced,
/// which is how tests install deterministic doubles.
pub struct EngineBuilder {
    policy: AdminPolicy,
    store_path: Option<PathBuf>,
    llm: Option<Arc<dyn LlmProvider>>,
    llm_from_env: bool,
    embedder: Option<Arc<dyn Embedder>>,
    providers: Option<ProviderRegistry>,
    content_fetcher: Option<Arc<dyn ContentFetcher>>,
    file_extractor: Option<Arc<dyn FileTextExtractor>>,
    download_dir: PathBuf,
    controller_mode: ControllerMode,
    worker_count: usize,
}

impl EngineBuilder {
    fn new(policy: AdminPolicy) -> Self {
        Self {
            policy,
            store_path: None,
            llm: None,
            llm_from_env: true,
            embedder: None,
            providers: None,
            content_fetcher: None,
            file_extractor: None,
            download_dir: PathBuf::from("downloads"),
            controller_mode: ControllerMode::RuleBased,
            worker_count: DEFAULT_WORKERS,
        }
    }

    /// Persist to a file instead of the in-memory default.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self.llm_from_env = false;
        self
    }

    /// Run without any LLM; stages that require one fail their jobs.
    pub fn no_llm(mut self) -> Self {
        self.llm = None;
        self.llm_from_env = false;
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn content_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.content_fetcher = Some(fetcher);
        self
    }

    pub fn file_extractor(mut self, extractor: Arc<dyn FileTextExtractor>) -> Self {
        self.file_extractor = Some(extractor);
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn controller_mode(mut self, mode: ControllerMode) -> Self {
        self.controller_mode = mode;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn build(self) -> EngineResult<Engine> {
        let policy = Arc::new(self.policy);
        policy.validate()?;

        let store = Arc::new(match &self.store_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_in_memory()?,
        });
        let queue = Arc::new(JobQueue::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        let cache = Arc::new(GraphCache::new());

        let llm: Option<Arc<dyn LlmProvider>> = match (self.llm, self.llm_from_env) {
            (Some(llm), _) => Some(llm),
            (None, true) => {
                HttpLlmClient::from_policy(&policy.llm).map(|c| Arc::new(c) as Arc<dyn LlmProvider>)
            }
            (None, false) => None,
        };
        if llm.is_none() {
            tracing::warn!("No LLM provider configured; LLM-dependent stages will fail jobs");
        }

        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => match HttpEmbedder::from_policy(&policy.embedding) {
                Some(client) => Arc::new(client),
                None => {
                    tracing::warn!("No embedding provider configured; using hash embedder");
                    Arc::new(HashEmbedder::default())
                }
            },
        };
        let embedder: Arc<dyn Embedder> = Arc::new(CachingEmbedder::new(embedder));

        let providers = Arc::new(
            self.providers
                .unwrap_or_else(|| ProviderRegistry::from_policy(&policy.fetch)),
        );
        let fetch = Arc::new(FetchService::new(store.clone(), providers, policy.clone()));

        let content_fetcher: Arc<dyn ContentFetcher> = self.content_fetcher.unwrap_or_else(|| {
            Arc::new(HttpContentFetcher::new(
                policy.query_orchestrator.request_timeout,
                policy.query_orchestrator.retry_attempts,
            ))
        });
        let file_extractor: Arc<dyn FileTextExtractor> = self
            .file_extractor
            .unwrap_or_else(|| Arc::new(PassthroughTextExtractor));
        let downloader = Arc::new(PaperDownloader::new(
            store.clone(),
            content_fetcher,
            file_extractor,
            self.download_dir,
        ));

        let controller = Arc::new(DecisionController::new(self.controller_mode, llm.clone()));
        let decision_handlers = Arc::new(HandlerRegistry::standard());
        decision_handlers.validate().map_err(|e| {
            EngineError::Internal(format!("decision handler registry incomplete: {e}"))
        })?;

        let ctx = Arc::new(EngineContext {
            store: store.clone(),
            policy: policy.clone(),
            llm: llm.clone(),
            embedder,
            cache,
            fetch,
            downloader,
            controller,
            decision_handlers,
        });

        let dispatcher = Arc::new(
            StageDispatcher::new(store.clone(), queue.clone(), bus.clone())
                .with_standard_stages(ctx),
        );

        Ok(Engine {
            store,
            queue,
            bus,
            policy,
            dispatcher,
            llm,
            worker_count: self.worker_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_assembles_an_engine() {
        let engine = Engine::builder(AdminPolicy::default())
            .no_llm()
            .embedder(Arc::new(HashEmbedder::default()))
            .workers(1)
            .build()
            .unwrap();
        let job_id = engine
            .submit_seed(UserId(1), "investigate widgets", Default::default())
            .await
            .unwrap();
        assert_eq!(engine.job_status(job_id).await.unwrap(), JobStatus::ReadyToIngest);
        assert_eq!(engine.queue.len().await, 1);
    }
}
