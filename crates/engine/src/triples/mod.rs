//! Triple extraction over text blocks.
//!
//! Format contract with the LLM: one triple per line, pipe-delimited
//! `subject | predicate | object`. Parsing recovers what it can: head and
//! tail commentary is trimmed to the contiguous run of triple-shaped
//! lines, malformed lines are dropped individually, and fields are capped.

use std::sync::Arc;

use crate::llm::{GenerateOptions, LlmProvider};
use crate::store::SqliteStore;
use crate::types::{EngineError, JobId};

const TRIPLE_PROMPT: &str = "Extract factual (subject, predicate, object) triples from the text. \
Output one triple per line in exactly this format:\n\
subject | predicate | object\n\
Use short noun phrases for subject and object and a single verb phrase for the predicate. \
Output nothing but triple lines.\n\nText:\n{block_text}";

/// Field length cap catching hallucinated run-on values.
const MAX_FIELD_LEN: usize = 300;

const EXTRACTOR_NAME: &str = "llm_pipe_v1";

/// Summary of one triple-extraction pass over a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripleSummary {
    pub blocks_processed: usize,
    pub triples_created: usize,
    pub blocks_without_triples: usize,
}

pub struct TripleExtractor {
    llm: Arc<dyn LlmProvider>,
}

impl TripleExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Run extraction over every block not yet extracted. Blocks are marked
    /// `triples_extracted` regardless of outcome — the flag is monotone and
    /// a block with no recoverable triples is never retried.
    pub async fn process_job(
        &self,
        store: &SqliteStore,
        job_id: JobId,
    ) -> Result<TripleSummary, EngineError> {
        let blocks = store.unextracted_blocks(job_id).await?;
        tracing::info!("Extracting triples from {} block(s) for job {job_id}", blocks.len());

        let mut summary = TripleSummary::default();
        for block in blocks {
            let triples = self.extract(&block.block_text).await;
            match &triples {
                Some(list) if !list.is_empty() => {
                    let count = store
                        .insert_triples(job_id, block.id, block.source_id, list, EXTRACTOR_NAME)
                        .await?;
                    summary.triples_created += count;
                }
                _ => {
                    summary.blocks_without_triples += 1;
                }
            }
            store.mark_block_extracted(block.id).await?;
            summary.blocks_processed += 1;
        }

        tracing::info!(
            "Triple extraction for job {job_id}: {} triples from {} blocks ({} empty)",
            summary.triples_created,
            summary.blocks_processed,
            summary.blocks_without_triples
        );
        Ok(summary)
    }

    /// Extract triples from one block. Returns `None` when the LLM call
    /// fails or nothing valid survives parsing.
    pub async fn extract(&self, block_text: &str) -> Option<Vec<(String, String, String)>> {
        if block_text.trim().is_empty() {
            return None;
        }
        let prompt = TRIPLE_PROMPT.replace("{block_text}", block_text);
        let raw = match self
            .llm
            .generate(&prompt, &GenerateOptions::default().with_temperature(0.0))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Triple extraction LLM call failed: {e}");
                return None;
            }
        };

        let triples = parse_response(&raw);
        if triples.is_empty() {
            tracing::debug!("No valid triples recovered from block");
            None
        } else {
            Some(triples)
        }
    }
}

fn is_triple_line(line: &str) -> bool {
    line.matches('|').count() == 2
}

/// Keep only the contiguous run from the first to the last triple-shaped
/// line, discarding commentary the model wrapped around them.
fn trim_comment_noise<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    let first = lines.iter().position(|l| is_triple_line(l));
    let last = lines.iter().rposition(|l| is_triple_line(l));
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].to_vec(),
        _ => Vec::new(),
    }
}

fn parse_line(line: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() != 3 {
        return None;
    }
    let subject = parts[0].trim();
    let predicate = parts[1].trim();
    let object = parts[2].trim();
    if subject.is_empty() || predicate.is_empty() || object.is_empty() {
        return None;
    }
    for field in [subject, predicate, object] {
        if field.contains('\n') || field.len() > MAX_FIELD_LEN {
            return None;
        }
    }
    Some((subject.to_string(), predicate.to_string(), object.to_string()))
}

/// Full recovery pipeline: split lines, trim surrounding noise, parse each
/// line independently.
pub fn parse_response(raw: &str) -> Vec<(String, String, String)> {
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let candidates = trim_comment_noise(&lines);

    let mut triples = Vec::new();
    let mut dropped = 0usize;
    for line in candidates {
        match parse_line(line) {
            Some(triple) => triples.push(triple),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!("Partial recovery: kept {}, dropped {} line(s)", triples.len(), dropped);
    }
    triples
}
