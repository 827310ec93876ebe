//! Search query lifecycle: stable signatures, creation, and the run gate.
//!
//! A search query represents intent, never execution — runs are logged
//! separately. The signature hashes only the hypothesis endpoints, so the
//! same (source, target) pair maps to the same query across generations
//! regardless of row ids.

use sha2::{Digest, Sha256};

use crate::config::QueryOrchestratorPolicy;
use crate::domains::DomainResolver;
use crate::store::{Hypothesis, SearchQuery, SqliteStore};
use crate::types::{EngineError, JobId, SearchQueryStatus};

/// First `signature_length` hex chars of sha256 over the lowercased
/// endpoint pair.
pub fn hypothesis_signature(source: &str, target: &str, signature_length: usize) -> String {
    let combined = format!("{}→{}", source.to_lowercase(), target.to_lowercase());
    let digest = hex::encode(Sha256::digest(combined.as_bytes()));
    digest[..signature_length.min(digest.len())].to_string()
}

/// Default query text for a hypothesis pair.
pub fn default_query_text(source: &str, target: &str) -> String {
    format!("relationship between {source} and {target}")
}

/// Look up or create the search query for a hypothesis. Domain resolution
/// runs once, at creation.
pub async fn get_or_create_search_query(
    store: &SqliteStore,
    job_id: JobId,
    hypothesis: &Hypothesis,
    domains: &DomainResolver,
    policy: &QueryOrchestratorPolicy,
) -> Result<SearchQuery, EngineError> {
    let signature = hypothesis_signature(
        &hypothesis.source,
        &hypothesis.target,
        policy.signature_length,
    );

    if let Some(existing) = store.find_search_query(job_id, &signature).await? {
        tracing::debug!(
            "Found existing search query {} (signature {signature})",
            existing.id
        );
        return Ok(existing);
    }

    let resolved_domain = domains.resolve_for_hypothesis(hypothesis).await;
    let query_text = default_query_text(&hypothesis.source, &hypothesis.target);
    let config_snapshot = serde_json::json!({
        "signature_length": policy.signature_length,
        "initial_reputation": policy.initial_reputation,
        "max_reuse_attempts": policy.max_reuse_attempts,
        "fetch_batch_size": policy.fetch_batch_size,
    });

    let query = store
        .create_search_query(
            job_id,
            &signature,
            &query_text,
            resolved_domain.as_deref(),
            policy.initial_reputation,
            &config_snapshot,
        )
        .await?;
    tracing::info!(
        "Created search query {} (signature {signature}, domain {:?})",
        query.id,
        resolved_domain
    );
    Ok(query)
}

/// Whether a query should run now, with the reason string recorded on the
/// run log.
pub async fn should_run_query(
    store: &SqliteStore,
    query: &SearchQuery,
    policy: &QueryOrchestratorPolicy,
) -> Result<(bool, String), EngineError> {
    match query.status {
        SearchQueryStatus::Blocked => Ok((false, "blocked (negative signal history)".to_string())),
        SearchQueryStatus::Exhausted => Ok((false, "exhausted (zero signal)".to_string())),
        SearchQueryStatus::New => Ok((true, "initial_attempt".to_string())),
        SearchQueryStatus::Reusable => {
            let run_count = store.count_runs_for_query(query.id).await?;
            if run_count < policy.max_reuse_attempts {
                Ok((
                    true,
                    format!("reuse attempt {}/{}", run_count + 1, policy.max_reuse_attempts),
                ))
            } else {
                Ok((
                    false,
                    format!("exceeded max reuse attempts ({})", policy.max_reuse_attempts),
                ))
            }
        }
    }
}
