//! Structural projection: raw triples → a deterministic grouped graph.
//!
//! Subjects and objects are reduced to stable handles (parenthetical
//! acronym, then entity span, then head noun of the longest noun phrase,
//! then cleaned text) and predicates are folded onto a closed relation set
//! by substring match. Identical (subject, predicate, object) keys are
//! grouped, supports summed, and provenance carried as sorted id sets.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::{Edge, Node, SemanticGraph};
use crate::store::Triple;

fn acronym_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([A-Z0-9]{2,})s?\)").unwrap())
}

/// Closed relation map: substring → canonical predicate. Longest keys are
/// tried first so "downregulates" wins over "regulates".
fn predicate_map() -> &'static Vec<(&'static str, &'static str)> {
    static MAP: OnceLock<Vec<(&'static str, &'static str)>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut entries = vec![
            ("downregulat", "downregulates"),
            ("upregulat", "upregulates"),
            ("regulat", "regulates"),
            ("inhibit", "inhibits"),
            ("suppress", "suppresses"),
            ("activat", "activates"),
            ("caus", "causes"),
            ("treat", "treats"),
            ("prevent", "prevents"),
            ("induc", "induces"),
            ("bind", "binds"),
            ("encod", "encodes"),
            ("express", "expresses"),
            ("interact", "interacts_with"),
            ("target", "targets"),
            ("increas", "increases"),
            ("decreas", "decreases"),
            ("reduc", "reduces"),
            ("promot", "promotes"),
            ("lead", "leads_to"),
            ("result", "leads_to"),
            ("associat", "associated_with"),
            ("correlat", "associated_with"),
            ("relat", "related_to"),
            ("link", "related_to"),
            ("is a", "is_a"),
            ("part of", "part_of"),
        ];
        entries.sort_by_key(|(k, _)| std::cmp::Reverse(k.len()));
        entries
    })
}

const LEADING_FILLERS: &[&str] = &["the ", "a ", "an ", "its ", "their ", "this ", "these "];

fn extract_acronym(text: &str) -> Option<String> {
    acronym_re()
        .captures(text)
        .map(|c| c.get(1).unwrap().as_str().to_string())
}

fn strip_fillers(text: &str) -> &str {
    let mut out = text.trim();
    loop {
        let lower = out.to_lowercase();
        let mut stripped = false;
        for filler in LEADING_FILLERS {
            if lower.starts_with(filler) {
                out = out[filler.len()..].trim_start();
                stripped = true;
                break;
            }
        }
        if !stripped {
            return out;
        }
    }
}

/// A maximal run of capitalized (or all-caps) tokens, two or more words
/// long, or one all-caps token — the entity-span approximation.
fn entity_span(text: &str) -> Option<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let is_cap = |t: &str| t.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
    let is_all_caps = |t: &str| t.len() >= 2 && t.chars().all(|c| c.is_uppercase() || c.is_numeric());

    let mut best: Option<(usize, usize)> = None;
    let mut start = None;
    for (i, token) in tokens.iter().enumerate() {
        if is_cap(token) {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            if i - s > best.map(|(bs, be)| be - bs).unwrap_or(0) {
                best = Some((s, i));
            }
        }
    }
    if let Some(s) = start {
        if tokens.len() - s > best.map(|(bs, be)| be - bs).unwrap_or(0) {
            best = Some((s, tokens.len()));
        }
    }

    match best {
        // A lone capitalized word only counts when it is an acronym-like
        // all-caps token; otherwise it is usually just sentence case.
        Some((s, e)) if e - s >= 2 => Some(tokens[s..e].join(" ")),
        Some((s, e)) if e - s == 1 && is_all_caps(tokens[s]) => Some(tokens[s].to_string()),
        _ => None,
    }
}

/// Head noun of the first noun-ish chunk: chunks split on punctuation and
/// prepositions, head approximated by the final token.
fn head_noun(text: &str) -> Option<String> {
    let cleaned = strip_fillers(text);
    let first = cleaned
        .split(|c: char| c == ',' || c == ';' || c == ':')
        .flat_map(|part| part.split(" of "))
        .map(str::trim)
        .find(|p| !p.is_empty())?;
    first
        .split_whitespace()
        .last()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Reduce subject text to a stable handle.
pub fn project_subject(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    if let Some(acr) = extract_acronym(text) {
        return acr;
    }
    if let Some(span) = entity_span(text) {
        return span;
    }
    if let Some(head) = head_noun(text) {
        return head;
    }
    strip_fillers(text).to_lowercase()
}

/// Map predicate text onto the closed relation set.
pub fn project_predicate(text: &str) -> String {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return "related_to".to_string();
    }
    for (needle, label) in predicate_map() {
        if lower.contains(needle) {
            return label.to_string();
        }
    }
    // Single-word predicates pass through as their own label.
    if !lower.contains(' ') {
        return lower;
    }
    "related_to".to_string()
}

fn trailing_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+(rather than|instead of|as well as)\s+.*$").unwrap())
}

/// Reduce object text to a short concept phrase.
pub fn project_object(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    if let Some(acr) = extract_acronym(text) {
        return acr;
    }
    let cleaned = trailing_clause_re().replace(text, "");
    let cleaned = strip_fillers(&cleaned);
    let cleaned = cleaned.trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    if let Some(span) = entity_span(cleaned) {
        return span;
    }
    cleaned.to_lowercase()
}

/// Build the structural graph for a set of raw triples.
pub fn project_structural_graph(triples: &[Triple]) -> SemanticGraph {
    #[derive(Default)]
    struct Group {
        support: i64,
        triple_ids: std::collections::BTreeSet<i64>,
        block_ids: std::collections::BTreeSet<i64>,
        source_ids: std::collections::BTreeSet<i64>,
    }

    let mut grouped: BTreeMap<(String, String, String), Group> = BTreeMap::new();
    for triple in triples {
        let subject = project_subject(&triple.subject);
        let predicate = project_predicate(&triple.predicate);
        let object = project_object(&triple.object);
        if subject.is_empty() || object.is_empty() {
            continue;
        }

        let group = grouped.entry((subject, predicate, object)).or_default();
        if group.triple_ids.insert(triple.id.0) {
            group.support += 1;
        }
        group.block_ids.insert(triple.block_id.0);
        group.source_ids.insert(triple.source_id.0);
    }

    let mut node_texts = std::collections::BTreeSet::new();
    let mut edges = Vec::with_capacity(grouped.len());
    for ((subject, predicate, object), group) in grouped {
        node_texts.insert(subject.clone());
        node_texts.insert(object.clone());
        edges.push(Edge {
            subject,
            predicate,
            object,
            support: group.support,
            triple_ids: group.triple_ids.into_iter().map(crate::types::TripleId).collect(),
            block_ids: group.block_ids.into_iter().map(crate::types::BlockId).collect(),
            source_ids: group.source_ids.into_iter().map(crate::types::SourceId).collect(),
        });
    }

    SemanticGraph {
        nodes: node_texts.into_iter().map(Node::concept).collect(),
        edges,
        removed_nodes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockId, JobId, SourceId, TripleId};
    use chrono::Utc;

    fn triple(id: i64, s: &str, p: &str, o: &str) -> Triple {
        Triple {
            id: TripleId(id),
            job_id: JobId(1),
            block_id: BlockId(1),
            source_id: SourceId(1),
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
            extractor_name: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn acronym_wins_over_everything() {
        assert_eq!(project_subject("large language models (LLMs)"), "LLM");
        assert_eq!(project_subject("the clustered repeats (CRISPR) system"), "CRISPR");
    }

    #[test]
    fn entity_span_preferred_over_head_noun() {
        assert_eq!(project_subject("the Semantic Scholar index"), "Semantic Scholar");
        assert_eq!(project_subject("DNA"), "DNA");
    }

    #[test]
    fn head_noun_fallback() {
        assert_eq!(project_subject("the expression of several genes"), "expression");
        assert_eq!(project_subject("a wide variety"), "variety");
    }

    #[test]
    fn predicate_substring_map() {
        assert_eq!(project_predicate("strongly inhibits"), "inhibits");
        assert_eq!(project_predicate("is associated with"), "associated_with");
        assert_eq!(project_predicate("downregulates"), "downregulates");
        assert_eq!(project_predicate("metabolizes"), "metabolizes");
        assert_eq!(project_predicate("has some bearing on"), "related_to");
        assert_eq!(project_predicate(""), "related_to");
    }

    #[test]
    fn object_cleaning() {
        assert_eq!(project_object("the synaptic plasticity, rather than cell death"), "synaptic plasticity");
        assert_eq!(project_object("an increase in dopamine."), "increase in dopamine");
    }

    #[test]
    fn identical_triples_group_with_summed_support() {
        let triples = vec![
            triple(1, "gene A", "regulates", "protein B"),
            triple(2, "gene A", "strongly regulates", "protein B"),
            triple(3, "gene A", "inhibits", "pathway C"),
        ];
        let graph = project_structural_graph(&triples);
        assert_eq!(graph.edge_count(), 2);
        let regulated = graph
            .edges
            .iter()
            .find(|e| e.predicate == "regulates")
            .unwrap();
        assert_eq!(regulated.support, 2);
        assert_eq!(regulated.triple_ids.len(), 2);
    }

    #[test]
    fn projection_is_deterministic() {
        let triples = vec![
            triple(1, "gene A", "regulates", "protein B"),
            triple(2, "pathway C", "causes", "disease D"),
        ];
        let g1 = project_structural_graph(&triples);
        let g2 = project_structural_graph(&triples);
        assert_eq!(g1, g2);
    }
}
