//! End-to-end pipeline scenarios over an in-memory engine with
//! deterministic providers: scripted LLM, hash embedder, static paper
//! source, static downloads.

use std::sync::Arc;

use serendip_engine::config::{AdminPolicy, JobConfig, MaxPapers};
use serendip_engine::decide::ControllerMode;
use serendip_engine::embed::HashEmbedder;
use serendip_engine::fetch::download::{PassthroughTextExtractor, StaticContentFetcher};
use serendip_engine::fetch::{ProviderRegistry, StaticPaperProvider};
use serendip_engine::llm::ScriptedLlm;
use serendip_engine::store::PaperCandidate;
use serendip_engine::types::{DecisionLabel, JobId, JobStatus, SearchQueryStatus, UserId};
use serendip_engine::Engine;

fn repeat_line(line: &str, count: usize) -> String {
    vec![line; count].join("\n")
}

/// Step the engine until the queue drains or `stop` says to halt, with a
/// hard iteration cap against accidental loops.
async fn run_until(engine: &Engine, job_id: JobId, stop: impl Fn(JobStatus) -> bool) -> JobStatus {
    for _ in 0..200 {
        let status = engine.job_status(job_id).await.unwrap();
        if stop(status) {
            return status;
        }
        match engine.queue.try_pop().await {
            Some(id) => engine.dispatch_once(id).await,
            None => return engine.job_status(job_id).await.unwrap(),
        }
    }
    panic!("pipeline did not settle within the step budget");
}

fn base_engine(llm: ScriptedLlm, policy: AdminPolicy) -> Engine {
    Engine::builder(policy)
        .llm(Arc::new(llm))
        .embedder(Arc::new(HashEmbedder::default()))
        .providers(ProviderRegistry::new())
        .content_fetcher(Arc::new(StaticContentFetcher::new()))
        .file_extractor(Arc::new(PassthroughTextExtractor))
        .controller_mode(ControllerMode::RuleBased)
        .workers(1)
        .build()
        .unwrap()
}

/// Scenario: one uploaded document yields two well-supported paths for a
/// single pair, a clear dominant, and a confident halt.
#[tokio::test]
async fn single_document_reaches_confident_halt() {
    let triples = [
        repeat_line("genea | regulates | proteinb", 9),
        repeat_line("proteinb | causes | pathwayc", 10),
        repeat_line("genea | binds | factord", 2),
        repeat_line("factord | causes | pathwayc", 3),
    ]
    .join("\n");

    let llm = ScriptedLlm::new()
        .route("cleaning text", "Gene chain studies.")
        .route("Gene chain studies", &triples)
        .route("Classify the research domain", "");

    let engine = base_engine(llm, AdminPolicy::default());
    let job_id = engine
        .submit_seed(UserId(1), "Gene chain studies.", JobConfig::default())
        .await
        .unwrap();

    let status = run_until(&engine, job_id, |s| s.is_terminal()).await;
    assert_eq!(status, JobStatus::Completed);

    // Exactly one decision cycle, ending in HALT_CONFIDENT.
    let decisions = engine.store.decisions_for_job(job_id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision_label, DecisionLabel::HaltConfident);

    let snapshot = &decisions[0].measurements_snapshot;
    assert_eq!(snapshot["passed_hypothesis_count"], 2);
    assert_eq!(snapshot["max_paths_per_pair"], 2);
    assert_eq!(snapshot["is_dominant_clear"], true);
    assert!(snapshot["max_normalized_confidence"].as_f64().unwrap() >= 0.7);
    assert_eq!(snapshot["mean_path_length"].as_f64().unwrap(), 2.0);

    // Final output carries the dominant pair and its evidence.
    let job = engine.store.load_job(job_id).await.unwrap();
    let result = job.result.expect("terminal result");
    assert_eq!(result["conclusion"], "hypothesis_found_confident");
    assert_eq!(result["dominant_pair"]["source"], "genea");
    assert_eq!(result["dominant_pair"]["target"], "pathwayc");
    assert!(!result["final_evidence"].as_array().unwrap().is_empty());

    // One active graph, one active hypothesis set.
    assert_eq!(engine.store.count_active_graphs(job_id).await.unwrap(), 1);
    let hypotheses = engine.store.active_hypotheses(job_id).await.unwrap();
    assert_eq!(hypotheses.len(), 2);
    assert!(hypotheses.iter().all(|h| h.passed_filter));
}

/// Scenario: a thin seed leads to a fetch cycle; the fetched abstracts
/// grow the graph, the growth rule fires, and unevaluated ledger papers
/// send the job to DOWNLOAD_QUEUED. The fetch run gets its signal
/// attributed when the second decision lands.
#[tokio::test]
async fn seed_fetch_cycle_then_strategic_download() {
    // Cycle 1: a single weak chain → promising-only → FETCH_MORE.
    let weak_triples = "alpha | activates | beta\nbeta | causes | gamma";

    let mut llm = ScriptedLlm::new()
        .route("cleaning text", "Weak seed statement.")
        .route("Weak seed statement", weak_triples)
        .route("Classify the research domain", "");

    // Cycle 2: five abstracts, each adding a strong independent path.
    let mut papers = Vec::new();
    for i in 1..=5 {
        let abstract_text = format!("Abstract {i}: metabolite{i} links alpha to gamma.");
        let triples = format!(
            "{}\n{}",
            repeat_line(&format!("alpha | activates | metabolite{i}"), 3),
            repeat_line(&format!("metabolite{i} | causes | gamma"), 3),
        );
        llm = llm.route(format!("metabolite{i} links alpha"), triples);
        papers.push(PaperCandidate {
            title: format!("Paper {i}"),
            abstract_text: Some(abstract_text),
            doi: Some(format!("10.1000/p{i}")),
            pdf_url: Some(format!("https://host/p{i}.pdf")),
            source: "static".to_string(),
            ..Default::default()
        });
    }

    let mut registry = ProviderRegistry::new();
    registry.register(
        "static",
        Arc::new(StaticPaperProvider::new().route("relationship between", papers)),
    );
    registry.route("default", "static");

    let engine = Engine::builder(AdminPolicy::default())
        .llm(Arc::new(llm))
        .embedder(Arc::new(HashEmbedder::default()))
        .providers(registry)
        .content_fetcher(Arc::new(StaticContentFetcher::new()))
        .file_extractor(Arc::new(PassthroughTextExtractor))
        .workers(1)
        .build()
        .unwrap();

    let job_id = engine
        .submit_seed(UserId(1), "Weak seed statement.", JobConfig::default())
        .await
        .unwrap();

    let status = run_until(&engine, job_id, |s| {
        s == JobStatus::DownloadQueued || s.is_terminal()
    })
    .await;
    assert_eq!(status, JobStatus::DownloadQueued);

    // Two decision cycles: fetch, then strategic download.
    let decisions = engine.store.decisions_for_job(job_id).await.unwrap();
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[0].decision_label, DecisionLabel::FetchMoreLiterature);
    assert_eq!(
        decisions[1].decision_label,
        DecisionLabel::StrategicDownloadTargeted
    );
    assert!(decisions[1].measurements_snapshot["growth_score"]
        .as_f64()
        .unwrap()
        > 0.0);

    // Five papers landed in the ledger, none evaluated yet.
    assert_eq!(engine.store.count_evidence(job_id).await.unwrap(), 5);
    assert_eq!(
        engine.store.count_unevaluated_evidence(job_id).await.unwrap(),
        5
    );

    // The fetch run between the two decisions has its signal applied.
    let runs = engine.store.runs_for_job(job_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].signal_delta.is_some());
    assert_eq!(runs[0].reason, "initial_attempt");

    // The parent query left `new` status during attribution.
    let queries = engine.store.queries_for_job(job_id).await.unwrap();
    assert_eq!(queries.len(), 1);
    assert_ne!(queries[0].status, SearchQueryStatus::New);
}

/// Scenario: no indirect paths at all → INSUFFICIENT_SIGNAL → the job
/// pauses at NEED_MORE_INPUT with empty suggestions.
#[tokio::test]
async fn exhausted_signal_asks_for_more_input() {
    let llm = ScriptedLlm::new()
        .route("cleaning text", "Isolated fact.")
        .route("Isolated fact", "thing | touches | other")
        .route("Classify the research domain", "");

    let engine = base_engine(llm, AdminPolicy::default());
    let job_id = engine
        .submit_seed(UserId(1), "Isolated fact.", JobConfig::default())
        .await
        .unwrap();

    let status = run_until(&engine, job_id, |s| s.is_awaiting_input() || s.is_terminal()).await;
    assert_eq!(status, JobStatus::NeedMoreInput);

    let decisions = engine.store.decisions_for_job(job_id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision_label, DecisionLabel::InsufficientSignal);
    assert_eq!(decisions[0].measurements_snapshot["passed_hypothesis_count"], 0);
    assert_eq!(
        decisions[0].measurements_snapshot["promising_hypothesis_count"],
        0
    );
}

/// Scenario: the paper cap refuses a fetch transition and finalizes the
/// job instead.
#[tokio::test]
async fn paper_cap_finalizes_instead_of_fetching() {
    // A weak chain (promising only) that would normally fetch.
    let llm = ScriptedLlm::new()
        .route("cleaning text", "Weak capped statement.")
        .route("Weak capped statement", "a | activates | b\nb | causes | c")
        .route("Classify the research domain", "");

    let mut policy = AdminPolicy::default();
    policy.max_papers_per_job = MaxPapers(0);

    let engine = base_engine(llm, policy);
    let job_id = engine
        .submit_seed(UserId(1), "Weak capped statement.", JobConfig::default())
        .await
        .unwrap();

    let status = run_until(&engine, job_id, |s| s.is_terminal()).await;
    assert_eq!(status, JobStatus::Completed);

    let decisions = engine.store.decisions_for_job(job_id).await.unwrap();
    assert_eq!(decisions[0].decision_label, DecisionLabel::FetchMoreLiterature);

    let job = engine.store.load_job(job_id).await.unwrap();
    assert_eq!(job.result.unwrap()["conclusion"], "max_papers_reached");
}

/// Scenario: verification job finds an indirect connection and completes
/// with a VerificationResult row.
#[tokio::test]
async fn verification_job_finds_indirect_connection() {
    let triples = format!(
        "{}\n{}",
        repeat_line("genex | activates | proteinp", 5),
        repeat_line("proteinp | causes | diseasey", 5),
    );
    let llm = ScriptedLlm::new()
        .route("cleaning text", "genex and diseasey evidence.")
        .route("genex and diseasey", &triples)
        .route("Classify the research domain", "");

    let engine = base_engine(llm, AdminPolicy::default());
    let job_id = engine
        .submit_verification(UserId(1), "genex", "diseasey", JobConfig::default())
        .await
        .unwrap();

    let status = run_until(&engine, job_id, |s| s.is_terminal()).await;
    assert_eq!(status, JobStatus::Completed);

    let decisions = engine.store.decisions_for_job(job_id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision_label, DecisionLabel::VerificationFound);
    assert_eq!(decisions[0].measurements_snapshot["verification_found"], true);

    let record = engine
        .store
        .verification_for_job(job_id)
        .await
        .unwrap()
        .expect("verification row written");
    assert_eq!(record.connection_found, Some(true));
    assert_eq!(record.connection_type.as_deref(), Some("indirect"));
    assert_eq!(
        record.path,
        vec!["genex".to_string(), "proteinp".to_string(), "diseasey".to_string()]
    );

    let job = engine.store.load_job(job_id).await.unwrap();
    assert_eq!(job.result.unwrap()["verification_status"], "found");
}

/// Replaying a stage at the same status leaves the same row counts: the
/// monotone guards make repeated delivery a no-op.
#[tokio::test]
async fn replayed_stage_produces_same_state() {
    let llm = ScriptedLlm::new()
        .route("cleaning text", "Idempotency statement.")
        .route("Idempotency statement", "x | activates | y\ny | causes | z")
        .route("Classify the research domain", "");

    let engine = base_engine(llm, AdminPolicy::default());
    let job_id = engine
        .submit_seed(UserId(1), "Idempotency statement.", JobConfig::default())
        .await
        .unwrap();

    // First delivery ingests the source.
    let first = engine.queue.try_pop().await.unwrap();
    engine.dispatch_once(first).await;
    assert_eq!(engine.job_status(job_id).await.unwrap(), JobStatus::Ingested);
    let blocks_after_first = engine.store.blocks_for_job(job_id).await.unwrap().len();
    assert!(blocks_after_first > 0);

    // Simulate redelivery at the same status: the source is already
    // processed, so no new blocks appear.
    engine
        .store
        .set_status(job_id, JobStatus::ReadyToIngest)
        .await
        .unwrap();
    engine.dispatch_once(job_id).await;
    assert_eq!(engine.job_status(job_id).await.unwrap(), JobStatus::Ingested);
    let blocks_after_second = engine.store.blocks_for_job(job_id).await.unwrap().len();
    assert_eq!(blocks_after_first, blocks_after_second);
}
