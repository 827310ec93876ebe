//! Semantic merge: collapse near-synonym concept nodes via embeddings.
//!
//! Concept nodes are embedded, clustered with average-linkage
//! agglomerative clustering under a cosine-distance threshold, and each
//! cluster is replaced by a canonical node (shortest text, ties broken by
//! highest degree in the incoming graph). Edges are rewritten onto the
//! canonical endpoints; self-loops drop and collapsed duplicates sum
//! their supports. Predicates are never reinterpreted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::{Edge, Node, SemanticGraph};
use crate::embed::Embedder;
use crate::types::{EmbedError, NodeType};

/// Average-linkage agglomerative clustering over normalized vectors.
/// Merges the closest pair of clusters until no pair sits under the
/// distance threshold. Distance is `1 - cosine`.
fn cluster_vectors(vectors: &[Vec<f32>], distance_threshold: f64) -> Vec<usize> {
    let n = vectors.len();
    if n <= 1 {
        return vec![0; n];
    }

    let dot = |a: &[f32], b: &[f32]| -> f64 {
        a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
    };
    // Pairwise distances once; vectors are L2-normalized already.
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = 1.0 - dot(&vectors[i], &vectors[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                // Average linkage: mean pairwise distance between members.
                let mut sum = 0.0;
                for &i in &clusters[a] {
                    for &j in &clusters[b] {
                        sum += dist[i][j];
                    }
                }
                let avg = sum / (clusters[a].len() * clusters[b].len()) as f64;
                if best.map(|(_, _, d)| avg < d).unwrap_or(true) {
                    best = Some((a, b, avg));
                }
            }
        }
        match best {
            Some((a, b, d)) if d <= distance_threshold => {
                let merged = clusters.remove(b);
                clusters[a].extend(merged);
            }
            _ => break,
        }
    }

    let mut labels = vec![0usize; n];
    for (cluster_id, members) in clusters.iter().enumerate() {
        for &member in members {
            labels[member] = cluster_id;
        }
    }
    labels
}

fn mean_similarity_to_centroid(vectors: &[&Vec<f32>]) -> f64 {
    if vectors.len() <= 1 {
        return 1.0;
    }
    let dim = vectors[0].len();
    let mut centroid = vec![0.0f64; dim];
    for v in vectors {
        for (c, x) in centroid.iter_mut().zip(v.iter()) {
            *c += *x as f64;
        }
    }
    let norm = centroid.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for c in centroid.iter_mut() {
            *c /= norm;
        }
    }
    let mut total = 0.0;
    for v in vectors {
        total += v.iter().zip(&centroid).map(|(x, c)| (*x as f64) * c).sum::<f64>();
    }
    total / vectors.len() as f64
}

/// Merge semantically similar concept nodes of a sanitized graph.
pub async fn merge_semantically(
    sanitized: &SemanticGraph,
    embedder: Arc<dyn Embedder>,
    similarity_threshold: f64,
) -> Result<SemanticGraph, EmbedError> {
    // Only concept nodes participate; entities, and anything short or
    // malformed, pass through untouched.
    let concepts: Vec<&Node> = sanitized
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Concept)
        .filter(|n| {
            let t = n.text.trim();
            t.len() >= 2 && !t.chars().all(|c| c.is_ascii_digit()) && !t.contains("://")
        })
        .collect();

    if concepts.is_empty() {
        tracing::warn!("No concept nodes to merge; passing graph through");
        return Ok(sanitized.clone());
    }

    let texts: Vec<String> = concepts.iter().map(|n| n.text.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    let labels = cluster_vectors(&vectors, 1.0 - similarity_threshold);

    let degrees = sanitized.degrees();

    // Canonical per cluster: shortest text, then highest degree.
    let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, label) in labels.iter().enumerate() {
        clusters.entry(*label).or_default().push(idx);
    }

    let mut canonical_of: HashMap<String, String> = HashMap::new();
    let mut merged_nodes = Vec::new();
    for members in clusters.values() {
        let mut ordered: Vec<usize> = members.clone();
        ordered.sort_by(|&a, &b| {
            let (ta, tb) = (&concepts[a].text, &concepts[b].text);
            ta.len()
                .cmp(&tb.len())
                .then_with(|| {
                    degrees
                        .get(tb)
                        .unwrap_or(&0)
                        .cmp(degrees.get(ta).unwrap_or(&0))
                })
                .then_with(|| ta.cmp(tb))
        });
        let canonical_idx = ordered[0];
        let canonical_text = concepts[canonical_idx].text.clone();

        let mut aliases: Vec<String> = ordered[1..]
            .iter()
            .map(|&i| concepts[i].text.clone())
            .collect();
        // Aliases the members already carried survive the merge.
        for &i in members {
            for alias in &concepts[i].aliases {
                if alias != &canonical_text && !aliases.contains(alias) {
                    aliases.push(alias.clone());
                }
            }
        }

        let member_vectors: Vec<&Vec<f32>> = members.iter().map(|&i| &vectors[i]).collect();
        let score = mean_similarity_to_centroid(&member_vectors);

        // Attributes merge across members; the canonical's values win ties.
        let mut attributes = BTreeMap::new();
        for &i in ordered.iter().rev() {
            attributes.extend(concepts[i].attributes.clone());
        }

        for &i in members {
            canonical_of.insert(concepts[i].text.clone(), canonical_text.clone());
        }
        merged_nodes.push(Node {
            text: canonical_text,
            node_type: NodeType::Concept,
            aliases,
            attributes,
            cluster_score: Some(score),
        });
    }

    // Non-concept nodes pass through unchanged.
    for node in &sanitized.nodes {
        if node.node_type != NodeType::Concept || !canonical_of.contains_key(&node.text) {
            if node.node_type != NodeType::Concept {
                merged_nodes.push(node.clone());
            } else {
                // Concept filtered out of clustering (too short/malformed).
                canonical_of.insert(node.text.clone(), node.text.clone());
                merged_nodes.push(node.clone());
            }
        }
    }

    // Rewrite edges onto canonical endpoints, dropping self-loops and
    // summing supports of collapsed duplicates.
    let mut rewritten: BTreeMap<(String, String, String), Edge> = BTreeMap::new();
    let mut self_loops = 0usize;
    for edge in &sanitized.edges {
        let subject = canonical_of
            .get(&edge.subject)
            .cloned()
            .unwrap_or_else(|| edge.subject.clone());
        let object = canonical_of
            .get(&edge.object)
            .cloned()
            .unwrap_or_else(|| edge.object.clone());
        if subject == object {
            self_loops += 1;
            continue;
        }
        let key = (subject.clone(), edge.predicate.clone(), object.clone());
        match rewritten.get_mut(&key) {
            Some(existing) => {
                existing.support += edge.support;
                merge_ids(&mut existing.triple_ids, &edge.triple_ids);
                merge_ids(&mut existing.block_ids, &edge.block_ids);
                merge_ids(&mut existing.source_ids, &edge.source_ids);
            }
            None => {
                rewritten.insert(
                    key,
                    Edge {
                        subject,
                        predicate: edge.predicate.clone(),
                        object,
                        support: edge.support,
                        triple_ids: edge.triple_ids.clone(),
                        block_ids: edge.block_ids.clone(),
                        source_ids: edge.source_ids.clone(),
                    },
                );
            }
        }
    }

    tracing::info!(
        "Semantic merge: {} concepts → {} clusters; {} edges → {} ({} self-loop(s) dropped)",
        concepts.len(),
        clusters.len(),
        sanitized.edge_count(),
        rewritten.len(),
        self_loops
    );

    Ok(SemanticGraph {
        nodes: merged_nodes,
        edges: rewritten.into_values().collect(),
        removed_nodes: sanitized.removed_nodes.clone(),
    })
}

fn merge_ids<T: Ord + Copy>(into: &mut Vec<T>, from: &[T]) {
    let mut set: BTreeSet<T> = into.iter().copied().collect();
    set.extend(from.iter().copied());
    *into = set.into_iter().collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    fn edge(s: &str, p: &str, o: &str, support: i64) -> Edge {
        Edge {
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
            support,
            triple_ids: vec![],
            block_ids: vec![],
            source_ids: vec![],
        }
    }

    #[test]
    fn identical_vectors_cluster_together() {
        let v = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let labels = cluster_vectors(&v, 0.15);
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn clustering_respects_threshold() {
        let v = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        // Orthogonal vectors, distance 1.0 — never merge at 0.15.
        assert_ne!(cluster_vectors(&v, 0.15)[0], cluster_vectors(&v, 0.15)[1]);
        // At a huge threshold they do merge.
        let labels = cluster_vectors(&v, 1.5);
        assert_eq!(labels[0], labels[1]);
    }

    #[tokio::test]
    async fn near_duplicates_collapse_with_shortest_canonical() {
        let sanitized = SemanticGraph {
            nodes: vec![
                Node::concept("neural network"),
                Node::concept("neural networks"),
                Node::concept("zebrafish"),
            ],
            edges: vec![
                edge("neural network", "models", "zebrafish", 2),
                edge("neural networks", "models", "zebrafish", 3),
            ],
            removed_nodes: vec![],
        };
        let merged = merge_semantically(&sanitized, Arc::new(HashEmbedder::new(64)), 0.80)
            .await
            .unwrap();

        let canonical = merged.node("neural network").unwrap();
        assert_eq!(canonical.aliases, vec!["neural networks".to_string()]);
        assert!(canonical.cluster_score.unwrap() > 0.8);
        // Collapsed duplicate edges summed their supports.
        assert_eq!(merged.edge_count(), 1);
        assert_eq!(merged.edges[0].support, 5);
    }

    #[tokio::test]
    async fn self_loops_are_dropped() {
        let sanitized = SemanticGraph {
            nodes: vec![Node::concept("neural network"), Node::concept("neural networks")],
            edges: vec![edge("neural network", "extends", "neural networks", 1)],
            removed_nodes: vec![],
        };
        let merged = merge_semantically(&sanitized, Arc::new(HashEmbedder::new(64)), 0.80)
            .await
            .unwrap();
        assert_eq!(merged.edge_count(), 0);
    }

    #[tokio::test]
    async fn dissimilar_nodes_stay_separate() {
        let sanitized = SemanticGraph {
            nodes: vec![Node::concept("dopamine"), Node::concept("carburetor")],
            edges: vec![edge("dopamine", "unlike", "carburetor", 1)],
            removed_nodes: vec![],
        };
        let merged = merge_semantically(&sanitized, Arc::new(HashEmbedder::new(64)), 0.85)
            .await
            .unwrap();
        assert_eq!(merged.node_count(), 2);
        assert_eq!(merged.edge_count(), 1);
    }
}
