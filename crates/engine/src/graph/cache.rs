//! Per-job staging cache for intermediate graphs.
//!
//! The structural and sanitized graphs travel between adjacent stages
//! through this cache rather than the database: the producing stage sets
//! the entry and the consuming stage deletes it after use. Entries expire
//! after a TTL so an abandoned job does not pin memory.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::SemanticGraph;
use crate::types::JobId;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

pub struct GraphCache {
    entries: DashMap<JobId, (SemanticGraph, Instant)>,
    ttl: Duration,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn set(&self, job_id: JobId, graph: SemanticGraph) {
        self.entries.insert(job_id, (graph, Instant::now()));
    }

    pub fn get(&self, job_id: JobId) -> Option<SemanticGraph> {
        let entry = self.entries.get(&job_id)?;
        let (graph, stored_at) = entry.value();
        if stored_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&job_id);
            return None;
        }
        Some(graph.clone())
    }

    pub fn delete(&self, job_id: JobId) {
        self.entries.remove(&job_id);
    }
}

impl Default for GraphCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    #[test]
    fn set_get_delete() {
        let cache = GraphCache::new();
        let graph = SemanticGraph {
            nodes: vec![Node::concept("x")],
            edges: vec![],
            removed_nodes: vec![],
        };
        cache.set(JobId(1), graph.clone());
        assert_eq!(cache.get(JobId(1)), Some(graph));
        cache.delete(JobId(1));
        assert_eq!(cache.get(JobId(1)), None);
    }

    #[test]
    fn entries_expire() {
        let cache = GraphCache::with_ttl(Duration::from_millis(0));
        cache.set(JobId(1), SemanticGraph::default());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(JobId(1)), None);
    }
}
