//! Signal attribution: measurement deltas between consecutive decisions
//! update search-query reputation, and impact scores rank ledger papers
//! for strategic download.
//!
//! Timing rule: a run is attributed iff
//! `previous_decision < run < current_decision` and its `signal_delta` is
//! still unset. The set-once write on the run makes re-evaluation a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::SignalParams;
use crate::store::{DecisionResult, SearchQueryRun, SqliteStore};
use crate::types::{EngineError, JobId, PaperId, SearchQueryStatus, TripleId};

/// Weighted, normalized delta between two measurement snapshots over the
/// configured measurement set.
pub fn compute_measurement_delta(
    previous: &serde_json::Value,
    current: &serde_json::Value,
    params: &SignalParams,
) -> f64 {
    let read = |snapshot: &serde_json::Value, key: &str| -> f64 {
        snapshot.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
    };

    let mut total = 0.0;
    for (name, weight) in &params.weights {
        let raw_delta = read(current, name) - read(previous, name);
        let max_delta = params.max_deltas.get(name).copied().unwrap_or(1.0);
        let normalized = if max_delta > 0.0 { raw_delta / max_delta } else { 0.0 };
        let weighted = normalized * weight;
        tracing::debug!(
            "  {name}: Δ={raw_delta:.3} normalized={normalized:.3} weighted={weighted:.3}"
        );
        total += weighted;
    }
    tracing::info!("Weighted measurement delta: {total:.3}");
    total
}

/// Classify a delta into (signal, next query status).
pub fn classify_signal(delta: f64, params: &SignalParams) -> (i64, SearchQueryStatus) {
    if delta >= params.positive_threshold {
        (1, SearchQueryStatus::Reusable)
    } else if delta <= params.negative_threshold {
        (-1, SearchQueryStatus::Blocked)
    } else {
        (0, SearchQueryStatus::Exhausted)
    }
}

/// Apply a classified signal to a run and its parent query. The run's
/// delta is set-once; when another worker already applied it, nothing
/// happens here.
pub async fn apply_signal_result(
    store: &SqliteStore,
    run: &SearchQueryRun,
    signal: i64,
    new_status: SearchQueryStatus,
    params: &SignalParams,
) -> Result<(), EngineError> {
    let applied = store.set_run_signal_delta(run.id, signal).await?;
    if !applied {
        tracing::debug!("Run {} already has a signal; skipping", run.id);
        return Ok(());
    }

    let Some(query) = store.get_search_query(run.search_query_id).await? else {
        tracing::error!("Search query {} missing for run {}", run.search_query_id, run.id);
        return Ok(());
    };

    let reputation = match signal.cmp(&0) {
        std::cmp::Ordering::Greater => query.reputation_score + params.reputation_positive_delta,
        std::cmp::Ordering::Less => query.reputation_score + params.reputation_negative_delta,
        std::cmp::Ordering::Equal => query.reputation_score,
    };
    store
        .update_query_learning_state(query.id, new_status, reputation)
        .await?;
    tracing::info!(
        "Query {}: status {} → {}, reputation {} → {reputation} (signal {signal:+})",
        query.id,
        query.status.as_str(),
        new_status.as_str(),
        query.reputation_score
    );
    Ok(())
}

/// Attribute every pending run in the window before `current`.
pub async fn evaluate_pending_runs(
    store: &SqliteStore,
    job_id: JobId,
    current: &DecisionResult,
    params: &SignalParams,
) -> Result<usize, EngineError> {
    let Some(previous) = store.decision_before(job_id, current.created_at).await? else {
        tracing::debug!("No previous decision for job {job_id}; no attribution window");
        return Ok(0);
    };

    let pending = store
        .pending_runs_between(job_id, previous.created_at, current.created_at)
        .await?;
    if pending.is_empty() {
        return Ok(0);
    }
    tracing::info!(
        "Evaluating {} pending run(s) for job {job_id} between decisions {} and {}",
        pending.len(),
        previous.id,
        current.id
    );

    let delta = compute_measurement_delta(
        &previous.measurements_snapshot,
        &current.measurements_snapshot,
        params,
    );
    let (signal, status) = classify_signal(delta, params);

    let mut applied = 0usize;
    for run in &pending {
        apply_signal_result(store, run, signal, status, params).await?;
        applied += 1;
    }
    Ok(applied)
}

// ── Impact scoring ──────────────────────────────────────────────────

/// Entity heuristic for density scoring: acronyms, proper nouns,
/// multi-word phrases, and tokens carrying digits or hyphens.
fn is_impactful_node(text: &str) -> bool {
    if text.len() < 2 {
        return false;
    }
    if text.chars().all(|c| c.is_uppercase() || c.is_numeric()) && text.chars().any(|c| c.is_alphabetic()) {
        return true;
    }
    if text.contains(' ') {
        return true;
    }
    if text.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
        return true;
    }
    text.contains('-') || text.chars().any(|c| c.is_ascii_digit())
}

/// Recompute `impact_score = hypo_ref_count + cumulative_conf +
/// entity_density` for every ledger row of the job.
///
/// Hypotheses reference papers through their triple provenance: triple →
/// ingestion source → `paper:{id}` source_ref. Every ledger row is
/// recalculated so older papers stay fairly ranked.
pub async fn calculate_impact_scores(
    store: &Arc<SqliteStore>,
    job_id: JobId,
) -> Result<usize, EngineError> {
    let hypotheses = store.active_hypotheses(job_id).await?;
    let relevant: Vec<_> = hypotheses
        .iter()
        .filter(|h| h.passed_filter || h.is_promising())
        .collect();

    let ledger = store.evidence_for_job(job_id).await?;
    if ledger.is_empty() {
        return Ok(0);
    }

    // Triple id → paper id, through the source_ref join.
    let all_triple_ids: Vec<TripleId> = {
        let mut set: HashSet<TripleId> = HashSet::new();
        for h in &relevant {
            set.extend(h.triple_ids.iter().copied());
        }
        set.into_iter().collect()
    };
    let triples = store.triples_by_ids(&all_triple_ids).await?;
    let source_ids: Vec<_> = {
        let mut set = HashSet::new();
        for t in &triples {
            set.insert(t.source_id);
        }
        set.into_iter().collect()
    };
    let sources = store.sources_by_ids(&source_ids).await?;
    let source_to_paper: HashMap<_, _> = sources
        .iter()
        .filter_map(|s| s.paper_ref().map(|p| (s.id, p)))
        .collect();
    let triple_to_paper: HashMap<TripleId, PaperId> = triples
        .iter()
        .filter_map(|t| source_to_paper.get(&t.source_id).map(|p| (t.id, *p)))
        .collect();

    #[derive(Default)]
    struct Metrics {
        refs: i64,
        conf: f64,
        entities: HashSet<String>,
    }
    let mut per_paper: HashMap<PaperId, Metrics> = HashMap::new();

    for h in &relevant {
        let papers: HashSet<PaperId> = h
            .triple_ids
            .iter()
            .filter_map(|tid| triple_to_paper.get(tid).copied())
            .collect();
        for paper_id in papers {
            let entry = per_paper.entry(paper_id).or_default();
            entry.refs += 1;
            entry.conf += h.confidence as f64;
        }
    }

    // Entity density from the papers' own triples.
    let all_triples = store.triples_for_job(job_id).await?;
    let all_sources = store
        .sources_by_ids(
            &all_triples
                .iter()
                .map(|t| t.source_id)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect::<Vec<_>>(),
        )
        .await?;
    let any_source_to_paper: HashMap<_, _> = all_sources
        .iter()
        .filter_map(|s| s.paper_ref().map(|p| (s.id, p)))
        .collect();
    for triple in &all_triples {
        if let Some(paper_id) = any_source_to_paper.get(&triple.source_id) {
            let entry = per_paper.entry(*paper_id).or_default();
            if is_impactful_node(&triple.subject) {
                entry.entities.insert(triple.subject.clone());
            }
            if is_impactful_node(&triple.object) {
                entry.entities.insert(triple.object.clone());
            }
        }
    }

    let mut updated = 0usize;
    for row in &ledger {
        let empty = Metrics::default();
        let metrics = per_paper.get(&row.paper_id).unwrap_or(&empty);
        let density = metrics.entities.len() as i64;
        let impact = metrics.refs as f64 + metrics.conf + density as f64;
        store
            .update_evidence_scores(row.id, impact, metrics.refs, metrics.conf, density)
            .await?;
        updated += 1;
    }
    tracing::info!("Recalculated impact scores for {updated} ledger paper(s) of job {job_id}");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::types::{DecisionLabel, JobMode, UserId};

    #[test]
    fn delta_is_weighted_and_normalized() {
        let params = SignalParams::default();
        let prev = serde_json::json!({
            "passed_hypothesis_count": 4,
            "mean_normalized_confidence": 0.2,
            "graph_density": 0.05,
            "filtered_to_total_ratio": 0.4,
        });
        let curr = serde_json::json!({
            "passed_hypothesis_count": 9,
            "mean_normalized_confidence": 0.2,
            "graph_density": 0.05,
            "filtered_to_total_ratio": 0.4,
        });
        // Only passed count moved: Δ=5, max=100, weight=1.0 → 0.05.
        let delta = compute_measurement_delta(&prev, &curr, &params);
        assert!((delta - 0.05).abs() < 1e-9);
    }

    #[test]
    fn classification_thresholds() {
        let params = SignalParams::default();
        assert_eq!(classify_signal(1.5, &params), (1, SearchQueryStatus::Reusable));
        assert_eq!(classify_signal(-1.5, &params), (-1, SearchQueryStatus::Blocked));
        assert_eq!(classify_signal(0.2, &params), (0, SearchQueryStatus::Exhausted));
        // Boundaries are inclusive.
        assert_eq!(classify_signal(1.0, &params), (1, SearchQueryStatus::Reusable));
        assert_eq!(classify_signal(-1.0, &params), (-1, SearchQueryStatus::Blocked));
    }

    async fn setup_window() -> (Arc<SqliteStore>, JobId, crate::store::SearchQueryRun, DecisionResult)
    {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = store
            .create_job(UserId(1), JobMode::Discovery, &JobConfig::default(), None, None)
            .await
            .unwrap();

        let d1_snapshot = serde_json::json!({"passed_hypothesis_count": 4});
        store
            .record_decision(job.id, DecisionLabel::FetchMoreLiterature, "rule_based", &d1_snapshot, false, None)
            .await
            .unwrap();

        let query = store
            .create_search_query(job.id, "sig", "q", None, 0, &serde_json::json!({}))
            .await
            .unwrap();
        let run = store
            .record_search_run(query.id, job.id, "static", "initial_attempt", &[], &[], &[])
            .await
            .unwrap();

        // Big jump in passed count: delta = 200/100 * 1.0 = 2.0 ≥ 1.0.
        let d2_snapshot = serde_json::json!({"passed_hypothesis_count": 204});
        let d2 = store
            .record_decision(job.id, DecisionLabel::HaltConfident, "rule_based", &d2_snapshot, false, None)
            .await
            .unwrap();
        (store, job.id, run, d2)
    }

    #[tokio::test]
    async fn window_attribution_updates_reputation() {
        let (store, job_id, run, d2) = setup_window().await;
        let params = SignalParams::default();

        let applied = evaluate_pending_runs(&store, job_id, &d2, &params).await.unwrap();
        assert_eq!(applied, 1);

        let runs = store.runs_for_job(job_id).await.unwrap();
        assert_eq!(runs[0].signal_delta, Some(1));
        let query = store.get_search_query(run.search_query_id).await.unwrap().unwrap();
        assert_eq!(query.status, SearchQueryStatus::Reusable);
        assert_eq!(query.reputation_score, params.reputation_positive_delta);
    }

    #[tokio::test]
    async fn re_evaluation_is_idempotent() {
        let (store, job_id, run, d2) = setup_window().await;
        let params = SignalParams::default();

        evaluate_pending_runs(&store, job_id, &d2, &params).await.unwrap();
        let applied_again = evaluate_pending_runs(&store, job_id, &d2, &params).await.unwrap();
        // The run already carries its delta, so the window is empty.
        assert_eq!(applied_again, 0);

        let query = store.get_search_query(run.search_query_id).await.unwrap().unwrap();
        assert_eq!(query.reputation_score, params.reputation_positive_delta);
    }

    #[tokio::test]
    async fn no_previous_decision_means_no_window() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = store
            .create_job(UserId(1), JobMode::Discovery, &JobConfig::default(), None, None)
            .await
            .unwrap();
        let d1 = store
            .record_decision(job.id, DecisionLabel::FetchMoreLiterature, "rule_based", &serde_json::json!({}), false, None)
            .await
            .unwrap();
        let applied = evaluate_pending_runs(&store, job.id, &d1, &SignalParams::default())
            .await
            .unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn impactful_node_heuristic() {
        assert!(is_impactful_node("CRISPR"));
        assert!(is_impactful_node("gene editing"));
        assert!(is_impactful_node("Cas9"));
        assert!(is_impactful_node("il-6"));
        assert!(!is_impactful_node("it"));
        assert!(!is_impactful_node("result"));
    }
}
