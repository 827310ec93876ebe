//! The FETCH_MORE executor: source creation only.
//!
//! Selects top-K diverse leads, runs their search queries through the
//! domain-routed provider, deduplicates globally and per job, persists new
//! papers and ledger rows, creates abstract ingestion sources, and records
//! one SearchQueryRun per executed query with `signal_delta` left unset.
//! Status transitions belong to the dispatcher, never to this service.

use std::collections::HashSet;
use std::sync::Arc;

use super::orchestrator::{get_or_create_search_query, should_run_query};
use super::selection::select_top_diverse_leads;
use super::{dedup, FetchRequest, ProviderRegistry};
use crate::config::AdminPolicy;
use crate::domains::DomainResolver;
use crate::store::{Hypothesis, SqliteStore};
use crate::types::{EngineError, JobId, PaperId, SourceType};

/// Outcome of one FETCH_MORE cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub queries_executed: usize,
    pub papers_fetched_new: usize,
    pub papers_accepted: usize,
    pub papers_rejected: usize,
    pub sources_created: usize,
}

pub struct FetchService {
    store: Arc<SqliteStore>,
    providers: Arc<ProviderRegistry>,
    policy: Arc<AdminPolicy>,
}

impl FetchService {
    pub fn new(
        store: Arc<SqliteStore>,
        providers: Arc<ProviderRegistry>,
        policy: Arc<AdminPolicy>,
    ) -> Self {
        Self {
            store,
            providers,
            policy,
        }
    }

    pub async fn execute_fetch_more(
        &self,
        job_id: JobId,
        hypotheses: &[Hypothesis],
        domains: &DomainResolver,
    ) -> Result<FetchSummary, EngineError> {
        // Fetch configuration is resolved once here and used throughout;
        // selection and providers read the same values.
        let query_policy = &self.policy.query_orchestrator;

        let leads = select_top_diverse_leads(hypotheses, query_policy.top_k_hypotheses);
        if leads.is_empty() {
            tracing::info!("No leads selected for job {job_id}; nothing to fetch");
            return Ok(FetchSummary::default());
        }

        // Papers already fetched for this job, for job-scoped dedup.
        let mut seen: HashSet<PaperId> =
            self.store.all_fetched_paper_ids(job_id).await?.into_iter().collect();
        tracing::debug!("Job {job_id}: {} previously fetched paper(s)", seen.len());

        let mut summary = FetchSummary::default();

        for lead in &leads {
            let query =
                get_or_create_search_query(&self.store, job_id, lead, domains, query_policy)
                    .await?;

            let (run, reason) = should_run_query(&self.store, &query, query_policy).await?;
            if !run {
                tracing::info!("Skipping search query {}: {reason}", query.id);
                continue;
            }

            let Some((provider_name, provider)) =
                self.providers.for_domain(query.resolved_domain.as_deref())
            else {
                tracing::warn!(
                    "No provider for domain {:?}; skipping query {}",
                    query.resolved_domain,
                    query.id
                );
                continue;
            };

            let request = FetchRequest {
                query: query.query_text.clone(),
                domain: query.resolved_domain.clone(),
                batch_size: query_policy.fetch_batch_size,
            };
            let candidates = match provider.fetch(&request).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    // An empty fetch is a dropped unit, not a failed stage.
                    tracing::error!("Fetch failed for query {}: {e}", query.id);
                    continue;
                }
            };
            tracing::info!(
                "Fetched {} candidate(s) from {provider_name} for query {}",
                candidates.len(),
                query.id
            );

            // Global dedup, then persistence.
            let mut accepted: Vec<PaperId> = Vec::new();
            let mut rejected: Vec<PaperId> = Vec::new();
            let mut accepted_with_abstract: Vec<(PaperId, String)> = Vec::new();
            for candidate in &candidates {
                match dedup::check_duplicate(&self.store, candidate, &self.policy.fetch).await? {
                    Some(matched) => {
                        tracing::debug!(
                            "Rejecting duplicate ({}): {:?}",
                            matched.match_type,
                            candidate.title
                        );
                        rejected.push(matched.paper_id);
                    }
                    None => {
                        let fingerprint =
                            dedup::compute_fingerprint(candidate, &self.policy.fetch);
                        match self.store.insert_paper(candidate, &fingerprint).await {
                            Ok(paper) => {
                                if let Some(abstract_text) = &paper.abstract_text {
                                    accepted_with_abstract
                                        .push((paper.id, abstract_text.clone()));
                                }
                                accepted.push(paper.id);
                            }
                            Err(e) => {
                                tracing::error!("Failed to persist paper: {e}");
                            }
                        }
                    }
                }
            }

            // Job-scoped dedup: the run's fetched set is the ids new to
            // this job, accepted or rejected-duplicate alike.
            let mut run_fetched = Vec::new();
            for paper_id in accepted.iter().chain(rejected.iter()) {
                if seen.insert(*paper_id) {
                    run_fetched.push(*paper_id);
                }
            }

            let run = self
                .store
                .record_search_run(
                    query.id,
                    job_id,
                    provider_name,
                    &reason,
                    &run_fetched,
                    &accepted,
                    &rejected,
                )
                .await?;

            // Ledger entries for papers new to this job.
            for paper_id in &run_fetched {
                self.store.upsert_evidence(job_id, *paper_id, Some(run.id)).await?;
            }

            // Abstract sources for newly persisted papers.
            for (paper_id, abstract_text) in &accepted_with_abstract {
                if abstract_text.trim().is_empty() {
                    continue;
                }
                self.store
                    .create_source(
                        job_id,
                        SourceType::PaperAbstract,
                        &format!("paper:{paper_id}"),
                        abstract_text,
                    )
                    .await?;
                summary.sources_created += 1;
            }

            summary.queries_executed += 1;
            summary.papers_fetched_new += run_fetched.len();
            summary.papers_accepted += accepted.len();
            summary.papers_rejected += rejected.len();
        }

        tracing::info!(
            "FETCH_MORE for job {job_id}: {} quer(ies), {} new paper(s), {} source(s)",
            summary.queries_executed,
            summary.papers_fetched_new,
            summary.sources_created
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DomainPolicy, JobConfig};
    use crate::fetch::StaticPaperProvider;
    use crate::store::PaperCandidate;
    use crate::types::{JobMode, ReasoningMode, UserId};
    use chrono::Utc;

    fn hyp(source: &str, target: &str, confidence: i64) -> Hypothesis {
        Hypothesis {
            id: crate::types::HypothesisId(0),
            job_id: JobId(1),
            source: source.into(),
            target: target.into(),
            path: vec![source.into(), "mid".into(), target.into()],
            predicates: vec![],
            explanation: String::new(),
            confidence,
            mode: ReasoningMode::Explore,
            passed_filter: true,
            filter_reason: None,
            triple_ids: vec![],
            source_ids: vec![],
            block_ids: vec![],
            domain: None,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
        }
    }

    fn candidate(title: &str, doi: &str) -> PaperCandidate {
        PaperCandidate {
            title: title.to_string(),
            abstract_text: Some(format!("Abstract of {title}.")),
            doi: Some(doi.to_string()),
            source: "static".to_string(),
            ..Default::default()
        }
    }

    async fn service_with(
        provider: StaticPaperProvider,
    ) -> (FetchService, Arc<SqliteStore>, JobId) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = store
            .create_job(UserId(1), JobMode::Discovery, &JobConfig::default(), None, None)
            .await
            .unwrap();
        let mut registry = ProviderRegistry::new();
        registry.register("static", Arc::new(provider));
        registry.route("default", "static");
        let service = FetchService::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(AdminPolicy::default()),
        );
        (service, store, job.id)
    }

    #[tokio::test]
    async fn fetch_persists_papers_sources_and_runs() {
        let provider = StaticPaperProvider::new().route(
            "relationship between crispr and autism",
            vec![candidate("Paper One", "10.1/a"), candidate("Paper Two", "10.1/b")],
        );
        let (service, store, job_id) = service_with(provider).await;
        let domains = DomainResolver::new(DomainPolicy::default(), None);

        let summary = service
            .execute_fetch_more(job_id, &[hyp("crispr", "autism", 5)], &domains)
            .await
            .unwrap();

        assert_eq!(summary.queries_executed, 1);
        assert_eq!(summary.papers_accepted, 2);
        assert_eq!(summary.papers_fetched_new, 2);
        assert_eq!(summary.sources_created, 2);

        assert_eq!(store.count_evidence(job_id).await.unwrap(), 2);
        let runs = store.runs_for_job(job_id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].signal_delta, None);
        assert_eq!(runs[0].fetched_paper_ids.len(), 2);
        assert_eq!(store.unprocessed_sources(job_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn repeat_fetch_sees_no_new_papers() {
        let provider = StaticPaperProvider::new().route(
            "relationship between crispr and autism",
            vec![candidate("Paper One", "10.1/a")],
        );
        let (service, store, job_id) = service_with(provider).await;
        let domains = DomainResolver::new(DomainPolicy::default(), None);
        let hyps = vec![hyp("crispr", "autism", 5)];

        let first = service.execute_fetch_more(job_id, &hyps, &domains).await.unwrap();
        assert_eq!(first.papers_fetched_new, 1);

        // Mark the query reusable so the second cycle runs it again.
        let query = store.queries_for_job(job_id).await.unwrap().pop().unwrap();
        store
            .update_query_learning_state(query.id, crate::types::SearchQueryStatus::Reusable, 10)
            .await
            .unwrap();

        let second = service.execute_fetch_more(job_id, &hyps, &domains).await.unwrap();
        // The same paper comes back, rejected as a DOI duplicate and
        // already seen by this job.
        assert_eq!(second.papers_accepted, 0);
        assert_eq!(second.papers_rejected, 1);
        assert_eq!(second.papers_fetched_new, 0);
        assert_eq!(store.count_evidence(job_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blocked_query_is_skipped() {
        let provider = StaticPaperProvider::new()
            .route("relationship between", vec![candidate("P", "10.1/p")]);
        let (service, store, job_id) = service_with(provider).await;
        let domains = DomainResolver::new(DomainPolicy::default(), None);
        let hyps = vec![hyp("a", "b", 5)];

        // Pre-create the query and block it.
        let query = get_or_create_search_query(
            &store,
            job_id,
            &hyps[0],
            &domains,
            &AdminPolicy::default().query_orchestrator,
        )
        .await
        .unwrap();
        store
            .update_query_learning_state(query.id, crate::types::SearchQueryStatus::Blocked, -20)
            .await
            .unwrap();

        let summary = service.execute_fetch_more(job_id, &hyps, &domains).await.unwrap();
        assert_eq!(summary.queries_executed, 0);
        assert!(store.runs_for_job(job_id).await.unwrap().is_empty());
    }
}
