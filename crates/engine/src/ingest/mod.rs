//! Ingestion: unprocessed sources → canonical raw text → text blocks.
//!
//! Layers, in order: extraction adapter (regions), refinery (LLM
//! cleaning, conditional on source type), canonical raw_text write-back,
//! sentence slicing, block persistence. The write-back is the contract:
//! every downstream stage reads `IngestionSource.raw_text` and nothing
//! else. Each source commits independently so a retry after a crash
//! resumes exactly where it stopped.

pub mod refinery;
pub mod slice;

use std::sync::Arc;

use crate::config::AdminPolicy;
use crate::extract::extractor_for;
use crate::llm::LlmProvider;
use crate::store::SqliteStore;
use crate::types::{EngineError, JobId};

pub use refinery::TextRefinery;

/// Outcome summary of one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub blocks_created: usize,
}

pub struct IngestionService {
    store: Arc<SqliteStore>,
    llm: Option<Arc<dyn LlmProvider>>,
    policy: Arc<AdminPolicy>,
}

impl IngestionService {
    pub fn new(
        store: Arc<SqliteStore>,
        llm: Option<Arc<dyn LlmProvider>>,
        policy: Arc<AdminPolicy>,
    ) -> Self {
        Self { store, llm, policy }
    }

    /// Process every unprocessed source for the job. A failing source is
    /// skipped (logged, left unprocessed) rather than aborting the batch.
    pub async fn ingest_job(&self, job_id: JobId) -> Result<IngestionSummary, EngineError> {
        let sources = self.store.unprocessed_sources(job_id).await?;
        tracing::info!("Ingesting {} unprocessed source(s) for job {job_id}", sources.len());

        let mut summary = IngestionSummary::default();
        for source in sources {
            match self.ingest_source(job_id, &source).await {
                Ok(blocks) => {
                    summary.sources_processed += 1;
                    summary.blocks_created += blocks;
                }
                Err(e) => {
                    tracing::error!("Source {} failed during ingestion: {e}", source.id);
                    summary.sources_failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn ingest_source(
        &self,
        job_id: JobId,
        source: &crate::store::IngestionSource,
    ) -> Result<usize, EngineError> {
        // 1. Adapter layer: regions from the source's raw text.
        let extractor = extractor_for(source.source_type);
        let regions = extractor
            .extract_regions(&source.raw_text, &self.policy.extraction)
            .await?;

        // 2. Refinery layer, for source types that carry extraction noise.
        let needs_refinement = self
            .policy
            .refinery
            .needs_refinement_types
            .iter()
            .any(|t| t == source.source_type.as_str());

        let parts: Vec<String> = match (&self.llm, needs_refinement) {
            (Some(llm), true) => {
                let refinery = TextRefinery::new(llm.clone(), self.policy.refinery.clone());
                let mut refined = Vec::new();
                for region in &regions {
                    tracing::debug!(
                        "Refining {} region ({} chars) of source {}",
                        region.region_type,
                        region.text.len(),
                        source.id
                    );
                    let clean = refinery.refine(&region.text).await?;
                    if clean.is_empty() {
                        tracing::warn!(
                            "Refinery rejected {} region of source {}",
                            region.region_type,
                            source.id
                        );
                    } else {
                        refined.push(clean);
                    }
                }
                refined
            }
            (None, true) => {
                tracing::debug!(
                    "No LLM configured; passing {} region(s) through unrefined",
                    regions.len()
                );
                regions.iter().map(|r| r.text.clone()).collect()
            }
            (_, false) => regions.iter().map(|r| r.text.clone()).collect(),
        };

        // 3. Canonical write-back: slicing reads only raw_text.
        let full_text = parts.join("\n\n");
        self.store.update_source_text(source.id, &full_text).await?;

        // 4. Slice and persist blocks in order.
        let blocks = slice::slice_text(&full_text, &self.policy.slicing);
        for (idx, block_text) in blocks.iter().enumerate() {
            self.store
                .create_block(job_id, source.id, block_text, (idx + 1) as i64, "sentences")
                .await?;
        }

        // 5. Mark processed last so a crash before this point re-runs the
        // source on redelivery.
        self.store.mark_source_processed(source.id).await?;
        tracing::info!(
            "Source {} ingested: {} region(s) → {} block(s)",
            source.id,
            regions.len(),
            blocks.len()
        );
        Ok(blocks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::llm::ScriptedLlm;
    use crate::types::{JobMode, SourceType, UserId};

    async fn setup() -> (Arc<SqliteStore>, JobId) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = store
            .create_job(UserId(1), JobMode::Discovery, &JobConfig::default(), None, None)
            .await
            .unwrap();
        (store, job.id)
    }

    #[tokio::test]
    async fn abstract_source_is_sliced_without_refinement() {
        let (store, job_id) = setup().await;
        store
            .create_source(
                job_id,
                SourceType::PaperAbstract,
                "paper:1",
                "Gene A regulates protein B. Protein B inhibits pathway C. Pathway C drives disease D.",
            )
            .await
            .unwrap();

        let service = IngestionService::new(store.clone(), None, Arc::new(AdminPolicy::default()));
        let summary = service.ingest_job(job_id).await.unwrap();
        assert_eq!(summary.sources_processed, 1);
        assert_eq!(summary.blocks_created, 1);
        assert!(store.unprocessed_sources(job_id).await.unwrap().is_empty());

        let blocks = store.blocks_for_job(job_id).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].block_text.contains("Gene A regulates protein B."));
    }

    #[tokio::test]
    async fn user_text_goes_through_refinery() {
        let (store, job_id) = setup().await;
        store
            .create_source(job_id, SourceType::UserText, "user_text_1", "raw noisy text.")
            .await
            .unwrap();

        let llm: Arc<dyn LlmProvider> =
            Arc::new(ScriptedLlm::new().route("cleaning text", "Cleaned sentence one."));
        let service =
            IngestionService::new(store.clone(), Some(llm), Arc::new(AdminPolicy::default()));
        let summary = service.ingest_job(job_id).await.unwrap();
        assert_eq!(summary.sources_processed, 1);

        // Canonical raw_text now holds the refined text.
        let sources = store.sources_by_ids(&[crate::types::SourceId(1)]).await.unwrap();
        assert_eq!(sources[0].raw_text, "Cleaned sentence one.");
    }

    #[tokio::test]
    async fn repeated_delivery_is_idempotent() {
        let (store, job_id) = setup().await;
        store
            .create_source(job_id, SourceType::PaperAbstract, "paper:1", "One sentence.")
            .await
            .unwrap();
        let service = IngestionService::new(store.clone(), None, Arc::new(AdminPolicy::default()));
        service.ingest_job(job_id).await.unwrap();
        let second = service.ingest_job(job_id).await.unwrap();
        assert_eq!(second.sources_processed, 0);
        assert_eq!(store.blocks_for_job(job_id).await.unwrap().len(), 1);
    }
}
