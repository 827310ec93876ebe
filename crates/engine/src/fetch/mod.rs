//! Literature fetching: providers, deduplication, query orchestration,
//! lead selection, the fetch service, and the strategic downloader.

pub mod dedup;
pub mod download;
pub mod orchestrator;
pub mod providers;
pub mod selection;
pub mod service;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::FetchPolicy;
use crate::store::PaperCandidate;
use crate::types::FetchError;

pub use download::PaperDownloader;
pub use service::{FetchService, FetchSummary};

/// One fetch request against a provider. Providers honor `batch_size` at
/// the API call level; the service never trims results afterwards.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub query: String,
    pub domain: Option<String>,
    pub batch_size: usize,
}

/// Paper source contract.
#[async_trait]
pub trait PaperProvider: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<PaperCandidate>, FetchError>;

    fn name(&self) -> &str;
}

/// Provider registry with domain routing.
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn PaperProvider>>,
    domain_routing: BTreeMap<String, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
            domain_routing: BTreeMap::new(),
        }
    }

    /// Build the HTTP providers configured in policy.
    pub fn from_policy(policy: &FetchPolicy) -> Self {
        let mut registry = Self::new();
        for (name, provider_policy) in &policy.providers {
            let provider: Arc<dyn PaperProvider> = match name.as_str() {
                "semantic_scholar" => {
                    Arc::new(providers::SemanticScholarProvider::new(provider_policy))
                }
                "crossref" => Arc::new(providers::CrossrefProvider::new(provider_policy)),
                other => {
                    tracing::warn!("Unknown fetch provider {other:?} in policy; skipping");
                    continue;
                }
            };
            registry.providers.insert(name.clone(), provider);
        }
        registry.domain_routing = policy.domain_providers.clone().into_iter().collect();
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn PaperProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn route(&mut self, domain: impl Into<String>, provider_name: impl Into<String>) {
        self.domain_routing.insert(domain.into(), provider_name.into());
    }

    /// Select the provider for a resolved domain, falling back to the
    /// `default` route, then to any registered provider.
    pub fn for_domain(&self, domain: Option<&str>) -> Option<(&str, Arc<dyn PaperProvider>)> {
        let routed = domain
            .and_then(|d| self.domain_routing.get(d))
            .or_else(|| self.domain_routing.get("default"));
        if let Some(name) = routed {
            if let Some(provider) = self.providers.get(name) {
                return Some((name.as_str(), provider.clone()));
            }
        }
        self.providers
            .iter()
            .next()
            .map(|(name, provider)| (name.as_str(), provider.clone()))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic in-memory provider for tests: query substrings map to
/// candidate lists.
pub struct StaticPaperProvider {
    routes: Vec<(String, Vec<PaperCandidate>)>,
}

impl StaticPaperProvider {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn route(mut self, needle: impl Into<String>, papers: Vec<PaperCandidate>) -> Self {
        self.routes.push((needle.into(), papers));
        self
    }
}

impl Default for StaticPaperProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaperProvider for StaticPaperProvider {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<PaperCandidate>, FetchError> {
        for (needle, papers) in &self.routes {
            if request.query.contains(needle.as_str()) {
                let mut batch = papers.clone();
                batch.truncate(request.batch_size);
                return Ok(batch);
            }
        }
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_honors_batch_size() {
        let papers: Vec<PaperCandidate> = (0..5)
            .map(|i| PaperCandidate {
                title: format!("paper {i}"),
                source: "static".into(),
                ..Default::default()
            })
            .collect();
        let provider = StaticPaperProvider::new().route("crispr", papers);
        let result = provider
            .fetch(&FetchRequest {
                query: "crispr autism".into(),
                domain: None,
                batch_size: 3,
            })
            .await
            .unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn registry_routes_by_domain_with_default_fallback() {
        let mut registry = ProviderRegistry::new();
        registry.register("static", Arc::new(StaticPaperProvider::new()));
        registry.route("biomedical", "static");
        registry.route("default", "static");

        assert_eq!(registry.for_domain(Some("biomedical")).unwrap().0, "static");
        assert_eq!(registry.for_domain(Some("unknown")).unwrap().0, "static");
        assert_eq!(registry.for_domain(None).unwrap().0, "static");
    }
}
