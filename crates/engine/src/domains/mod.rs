//! Domain resolution for hypotheses.
//!
//! Resolution is one-time per search query and follows a strict order:
//! per-job override, deterministic keyword match against the admin
//! allow-list, then LLM closed-set classification. Anything else resolves
//! to `None` and routes through the default provider.

use std::sync::Arc;

use crate::config::DomainPolicy;
use crate::llm::{GenerateOptions, LlmProvider};
use crate::store::Hypothesis;

const DOMAIN_PROMPT: &str = "Classify the research domain of this hypothesis.\n\
Allowed domains: {domains}\n\n\
Source: {source}\nTarget: {target}\nPath: {path}\n\n\
Answer with exactly one domain name from the list, or nothing if uncertain.";

pub struct DomainResolver {
    policy: DomainPolicy,
    llm: Option<Arc<dyn LlmProvider>>,
    /// Per-job override; set from the job config at construction.
    override_domain: Option<String>,
}

impl DomainResolver {
    pub fn new(policy: DomainPolicy, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            policy,
            llm,
            override_domain: None,
        }
    }

    pub fn with_override(mut self, domain: Option<String>) -> Self {
        self.override_domain = domain;
        self
    }

    /// Deterministic pass: keyword containment over the hypothesis text.
    fn keyword_match(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        // Longest keywords first so "neural network" beats "network".
        let mut keywords: Vec<(&String, &String)> = self.policy.keywords.iter().collect();
        keywords.sort_by_key(|(k, _)| std::cmp::Reverse(k.len()));
        for (keyword, domain) in keywords {
            if lowered.contains(keyword.as_str()) {
                return Some(domain.clone());
            }
        }
        None
    }

    async fn llm_resolve(&self, hypothesis: &Hypothesis) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let prompt = DOMAIN_PROMPT
            .replace("{domains}", &self.policy.allowed_domains.join(", "))
            .replace("{source}", &hypothesis.source)
            .replace("{target}", &hypothesis.target)
            .replace("{path}", &hypothesis.path.join(" -> "));

        let response = match llm
            .generate(&prompt, &GenerateOptions::default().with_temperature(0.0))
            .await
        {
            Ok(text) => text.trim().to_lowercase(),
            Err(e) => {
                tracing::warn!("Domain resolution LLM call failed: {e}");
                return None;
            }
        };
        // Closed set: the answer must be an allowed domain verbatim.
        self.policy
            .allowed_domains
            .iter()
            .find(|d| d.to_lowercase() == response)
            .cloned()
    }

    /// Resolve the domain for a hypothesis.
    pub async fn resolve_for_hypothesis(&self, hypothesis: &Hypothesis) -> Option<String> {
        if let Some(domain) = &self.override_domain {
            return Some(domain.clone());
        }
        let text = format!(
            "{} {} {}",
            hypothesis.source,
            hypothesis.target,
            hypothesis.path.join(" ")
        );
        if let Some(domain) = self.keyword_match(&text) {
            tracing::debug!("Domain resolved by keyword: {domain}");
            return Some(domain);
        }
        let resolved = self.llm_resolve(hypothesis).await;
        if let Some(domain) = &resolved {
            tracing::info!("Domain resolved by LLM: {domain}");
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::types::{HypothesisId, JobId, ReasoningMode};
    use chrono::Utc;

    fn hyp(source: &str, target: &str) -> Hypothesis {
        Hypothesis {
            id: HypothesisId(1),
            job_id: JobId(1),
            source: source.into(),
            target: target.into(),
            path: vec![source.into(), target.into()],
            predicates: vec![],
            explanation: String::new(),
            confidence: 1,
            mode: ReasoningMode::Explore,
            passed_filter: true,
            filter_reason: None,
            triple_ids: vec![],
            source_ids: vec![],
            block_ids: vec![],
            domain: None,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn override_wins() {
        let resolver = DomainResolver::new(DomainPolicy::default(), None)
            .with_override(Some("chemistry".to_string()));
        assert_eq!(
            resolver.resolve_for_hypothesis(&hyp("gene X", "disease Y")).await,
            Some("chemistry".to_string())
        );
    }

    #[tokio::test]
    async fn keyword_match_is_deterministic() {
        let resolver = DomainResolver::new(DomainPolicy::default(), None);
        assert_eq!(
            resolver.resolve_for_hypothesis(&hyp("gene X", "something")).await,
            Some("biomedical".to_string())
        );
        assert_eq!(
            resolver
                .resolve_for_hypothesis(&hyp("neural network", "benchmark"))
                .await,
            Some("computer_science".to_string())
        );
    }

    #[tokio::test]
    async fn llm_fallback_constrained_to_allowed_set() {
        let llm: Arc<dyn LlmProvider> =
            Arc::new(ScriptedLlm::new().route("Classify the research domain", "physics"));
        let resolver = DomainResolver::new(DomainPolicy::default(), Some(llm));
        assert_eq!(
            resolver.resolve_for_hypothesis(&hyp("quark", "plasma")).await,
            Some("physics".to_string())
        );

        // Out-of-set answers resolve to None.
        let llm: Arc<dyn LlmProvider> =
            Arc::new(ScriptedLlm::new().route("Classify the research domain", "astrology"));
        let resolver = DomainResolver::new(DomainPolicy::default(), Some(llm));
        assert_eq!(resolver.resolve_for_hypothesis(&hyp("quark", "plasma")).await, None);
    }

    #[tokio::test]
    async fn no_llm_no_keyword_resolves_none() {
        let resolver = DomainResolver::new(DomainPolicy::default(), None);
        assert_eq!(resolver.resolve_for_hypothesis(&hyp("xq", "zr")).await, None);
    }
}
