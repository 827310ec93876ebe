//! Grouped-diversity lead selection for fetching.
//!
//! The fetch cycle investigates unique (source, target) relationships
//! rather than re-fetching near-identical paths: candidates group by
//! endpoint pair, each group is led by its highest-confidence member, and
//! the K slots fill from passed groups first, then promising-only groups.

use std::collections::BTreeMap;

use crate::store::Hypothesis;

/// Select up to `k` group-leader hypotheses.
pub fn select_top_diverse_leads(hypotheses: &[Hypothesis], k: usize) -> Vec<Hypothesis> {
    struct Group {
        confidence: i64,
        passed: bool,
        leader: Hypothesis,
    }

    let mut groups: BTreeMap<(String, String), Group> = BTreeMap::new();
    for h in hypotheses {
        // Only passed hypotheses or evidence-only rejections are leads.
        if !h.passed_filter && !h.is_promising() {
            continue;
        }
        let pair = h.pair();
        match groups.get_mut(&pair) {
            Some(group) => {
                // One passing member marks the whole group as passed.
                group.passed |= h.passed_filter;
                if h.confidence > group.confidence {
                    group.confidence = h.confidence;
                    group.leader = h.clone();
                }
            }
            None => {
                groups.insert(
                    pair,
                    Group {
                        confidence: h.confidence,
                        passed: h.passed_filter,
                        leader: h.clone(),
                    },
                );
            }
        }
    }

    let mut passed_groups: Vec<&Group> = groups.values().filter(|g| g.passed).collect();
    let mut promising_groups: Vec<&Group> = groups.values().filter(|g| !g.passed).collect();
    passed_groups.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    promising_groups.sort_by(|a, b| b.confidence.cmp(&a.confidence));

    let mut selected = Vec::with_capacity(k);
    for group in passed_groups.into_iter().chain(promising_groups) {
        if selected.len() >= k {
            break;
        }
        selected.push(group.leader.clone());
    }

    tracing::info!(
        "Lead selection: {} unique relationships, {} lead(s) chosen (k={k})",
        groups.len(),
        selected.len()
    );
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HypothesisId, JobId, ReasoningMode};
    use chrono::Utc;
    use std::collections::BTreeMap as Map;

    fn hyp(source: &str, target: &str, confidence: i64, passed: bool, promising: bool) -> Hypothesis {
        let filter_reason = if passed {
            None
        } else if promising {
            Some(Map::from([(
                "evidence_threshold".to_string(),
                "low".to_string(),
            )]))
        } else {
            Some(Map::from([(
                "hub_suppression".to_string(),
                "hub".to_string(),
            )]))
        };
        Hypothesis {
            id: HypothesisId(0),
            job_id: JobId(1),
            source: source.into(),
            target: target.into(),
            path: vec![source.into(), "mid".into(), target.into()],
            predicates: vec![],
            explanation: String::new(),
            confidence,
            mode: ReasoningMode::Explore,
            passed_filter: passed,
            filter_reason,
            triple_ids: vec![],
            source_ids: vec![],
            block_ids: vec![],
            domain: None,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn groups_lead_with_highest_confidence_member() {
        let hyps = vec![
            hyp("a", "b", 3, true, false),
            hyp("a", "b", 7, true, false),
            hyp("c", "d", 5, true, false),
        ];
        let leads = select_top_diverse_leads(&hyps, 10);
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].confidence, 7);
        assert_eq!((leads[0].source.as_str(), leads[0].target.as_str()), ("a", "b"));
    }

    #[test]
    fn passed_groups_fill_before_promising() {
        let hyps = vec![
            hyp("p", "q", 9, false, true), // promising, highest confidence
            hyp("a", "b", 2, true, false),
            hyp("c", "d", 3, true, false),
        ];
        let leads = select_top_diverse_leads(&hyps, 2);
        // Both slots go to passed groups despite lower confidence.
        assert_eq!(leads.len(), 2);
        assert!(leads.iter().all(|h| h.passed_filter));

        // With room, the promising group fills the remainder.
        let leads = select_top_diverse_leads(&hyps, 3);
        assert_eq!(leads.len(), 3);
        assert!(leads.iter().any(|h| !h.passed_filter));
    }

    #[test]
    fn hard_rejections_are_never_leads() {
        let hyps = vec![hyp("a", "b", 9, false, false)];
        assert!(select_top_diverse_leads(&hyps, 5).is_empty());
    }

    #[test]
    fn one_passing_member_marks_group_passed() {
        let hyps = vec![
            hyp("a", "b", 9, false, true),
            hyp("a", "b", 1, true, false),
            hyp("c", "d", 5, false, true),
        ];
        let leads = select_top_diverse_leads(&hyps, 1);
        // Group (a, b) is passed (one member passed) and its leader is the
        // highest-confidence member, even though that member is promising.
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].confidence, 9);
        assert_eq!(leads[0].source, "a");
    }
}
