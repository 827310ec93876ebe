//! Paper deduplication: DOI → external identifiers → content fingerprint.
//!
//! The hierarchy is strict and stops at the first match. Fingerprints are
//! sha256 over normalized title|abstract|authors; near-duplicates are
//! caught by a hex-digit similarity with a configured threshold.

use sha2::{Digest, Sha256};

use crate::config::FetchPolicy;
use crate::store::{PaperCandidate, SqliteStore};
use crate::types::{PaperId, StoreError};

/// How a candidate matched an existing paper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMatch {
    pub match_type: &'static str,
    pub paper_id: PaperId,
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content fingerprint over the configured components.
pub fn compute_fingerprint(candidate: &PaperCandidate, policy: &FetchPolicy) -> String {
    let mut parts = Vec::new();
    for component in &policy.fingerprint_components {
        match component.as_str() {
            "title" => parts.push(normalize_text(&candidate.title)),
            "abstract" => {
                if let Some(abstract_text) = &candidate.abstract_text {
                    parts.push(normalize_text(abstract_text));
                }
            }
            "authors" => {
                if !candidate.authors.is_empty() {
                    let joined = candidate
                        .authors
                        .iter()
                        .map(|a| normalize_text(a))
                        .collect::<Vec<_>>()
                        .join(" ");
                    parts.push(joined);
                }
            }
            other => tracing::warn!("Unknown fingerprint component {other:?}"),
        }
    }
    let combined = parts.join(" | ");
    hex::encode(Sha256::digest(combined.as_bytes()))
}

/// Fraction of matching hex digits between two equal-length fingerprints.
pub fn fingerprint_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let matching = a.chars().zip(b.chars()).filter(|(x, y)| x == y).count();
    matching as f64 / a.len() as f64
}

/// Run the full detection hierarchy against the store.
pub async fn check_duplicate(
    store: &SqliteStore,
    candidate: &PaperCandidate,
    policy: &FetchPolicy,
) -> Result<Option<DuplicateMatch>, StoreError> {
    // 1. DOI.
    if let Some(doi) = candidate.doi.as_deref().filter(|d| !d.trim().is_empty()) {
        if let Some(paper) = store.find_paper_by_doi(doi).await? {
            tracing::debug!("Duplicate by DOI {doi}: paper {}", paper.id);
            return Ok(Some(DuplicateMatch {
                match_type: "doi",
                paper_id: paper.id,
            }));
        }
    }

    // 2. External identifiers.
    if !candidate.external_ids.is_empty() {
        let known = store.paper_external_ids().await?;
        for (id_type, id_value) in &candidate.external_ids {
            let needle = id_value.trim().to_lowercase();
            if needle.is_empty() {
                continue;
            }
            for (paper_id, ids) in &known {
                if ids
                    .get(id_type)
                    .map(|v| v.trim().to_lowercase() == needle)
                    .unwrap_or(false)
                {
                    tracing::debug!("Duplicate by external id {id_type}={id_value}: paper {paper_id}");
                    return Ok(Some(DuplicateMatch {
                        match_type: "external_id",
                        paper_id: *paper_id,
                    }));
                }
            }
        }
    }

    // 3. Content fingerprint: exact, then near-duplicate scan.
    let fingerprint = compute_fingerprint(candidate, policy);
    if let Some(paper) = store.find_paper_by_fingerprint(&fingerprint).await? {
        return Ok(Some(DuplicateMatch {
            match_type: "fingerprint",
            paper_id: paper.id,
        }));
    }
    if policy.fingerprint_similarity_threshold < 1.0 {
        for (paper_id, existing) in store.paper_fingerprints().await? {
            if fingerprint_similarity(&fingerprint, &existing)
                >= policy.fingerprint_similarity_threshold
            {
                tracing::debug!("Near-duplicate fingerprint: paper {paper_id}");
                return Ok(Some(DuplicateMatch {
                    match_type: "fingerprint",
                    paper_id,
                }));
            }
        }
    }

    Ok(None)
}
