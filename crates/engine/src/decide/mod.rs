//! Decision layer: map a measurement snapshot onto the closed decision set.
//!
//! The rule-based provider is primary and fully deterministic — identical
//! measurements always produce the identical label. The LLM provider is an
//! optional fallback constrained to the label set by substring parsing,
//! with `FETCH_MORE_LITERATURE` as the safe default on any failure.

pub mod handlers;

use std::sync::Arc;

use crate::config::DecisionThresholds;
use crate::llm::{GenerateOptions, LlmProvider};
use crate::measure::Measurements;
use crate::types::{DecisionLabel, JobMode};

/// Outcome of one decision cycle, persisted as a DecisionResult row.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub label: DecisionLabel,
    pub provider_used: String,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
}

/// Controller strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerMode {
    /// Rule-based only.
    #[default]
    RuleBased,
    /// Rule-based primary; LLM reserved for an undecided primary (the
    /// current rule set always decides, so the fallback stays idle).
    Hybrid,
    /// LLM primary with rule-based as the secondary fallback.
    Llm,
}

impl ControllerMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rule_based" => Some(ControllerMode::RuleBased),
            "hybrid" => Some(ControllerMode::Hybrid),
            "llm" => Some(ControllerMode::Llm),
            _ => None,
        }
    }
}

/// Deterministic rule-based provider. Rules apply in strict order; the
/// first match wins.
pub struct RuleBasedProvider;

impl RuleBasedProvider {
    pub fn decide(
        &self,
        measurements: &Measurements,
        mode: JobMode,
        thresholds: &DecisionThresholds,
    ) -> DecisionLabel {
        if mode == JobMode::Verification {
            return self.decide_verification(measurements);
        }

        let passed = measurements.passed_hypothesis_count;
        let promising = measurements.promising_hypothesis_count;

        // Rule 1: nothing viable at all.
        if passed == 0 && promising == 0 {
            tracing::info!("Insufficient signal: passed=0, promising=0");
            return DecisionLabel::InsufficientSignal;
        }

        // Rule 2: growth beats halting.
        if measurements.growth_score > 0.0 {
            tracing::info!(
                "Growth detected (score={:.3}): strategic download",
                measurements.growth_score
            );
            return DecisionLabel::StrategicDownloadTargeted;
        }

        let has_indirect = measurements.mean_path_length > 1.0;

        // Rule 3: confident halt.
        if has_indirect
            && measurements.max_paths_per_pair >= thresholds.path_support_threshold
            && measurements.is_dominant_clear
            && measurements.max_normalized_confidence >= thresholds.high_confidence_threshold
        {
            tracing::info!(
                "Halt confident: paths_per_pair={} dominant={} confidence={:.2}",
                measurements.max_paths_per_pair,
                measurements.is_dominant_clear,
                measurements.max_normalized_confidence
            );
            return DecisionLabel::HaltConfident;
        }

        // Rule 4: stable but weakly supported — no hypothesis will emerge.
        let growth_is_minimal = measurements.evidence_growth_rate.abs() < 0.1;
        let is_stable = measurements.graph_density > 0.0 && measurements.diversity_score > 0.0;
        if has_indirect
            && growth_is_minimal
            && measurements.max_paths_per_pair < thresholds.path_support_threshold
            && is_stable
        {
            tracing::info!(
                "Halt no hypothesis: growth_rate={:.2} paths_per_pair={} density={:.4}",
                measurements.evidence_growth_rate,
                measurements.max_paths_per_pair,
                measurements.graph_density
            );
            return DecisionLabel::HaltNoHypothesis;
        }

        // Rule 5: sparse graph needs more literature.
        if measurements.graph_density < thresholds.sparse_graph_density_threshold {
            tracing::info!(
                "Sparse graph (density={:.4} < {:.4}): fetching more",
                measurements.graph_density,
                thresholds.sparse_graph_density_threshold
            );
            return DecisionLabel::FetchMoreLiterature;
        }

        // Rule 6: default.
        DecisionLabel::FetchMoreLiterature
    }

    fn decide_verification(&self, measurements: &Measurements) -> DecisionLabel {
        let complete = measurements.verification_complete.unwrap_or(false);
        let found = measurements.verification_found.unwrap_or(false);
        if found {
            // A found connection halts immediately; no need to exhaust the
            // remaining queries.
            DecisionLabel::VerificationFound
        } else if complete {
            DecisionLabel::VerificationNotFound
        } else {
            DecisionLabel::FetchMoreLiterature
        }
    }
}

/// LLM fallback provider, constrained to the closed label set.
pub struct LlmDecisionProvider {
    llm: Arc<dyn LlmProvider>,
}

impl LlmDecisionProvider {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    fn build_prompt(measurements: &Measurements) -> String {
        let labels: Vec<&str> = DecisionLabel::all().iter().map(|d| d.as_str()).collect();
        format!(
            "You control a literature-review engine. Choose the next action.\n\
             Valid decisions: {}\n\n\
             Current measurements:\n\
             - total hypotheses: {}\n\
             - passed hypotheses: {}\n\
             - promising hypotheses: {}\n\
             - max normalized confidence: {:.2}\n\
             - mean normalized confidence: {:.2}\n\
             - dominant hypothesis clear: {}\n\
             - unique source-target pairs: {}\n\
             - max paths per pair: {}\n\
             - diversity score: {:.2}\n\
             - graph density: {:.4}\n\
             - evidence growth rate: {:.2}\n\
             - mean path length: {:.1}\n\n\
             Answer with exactly one decision label and nothing else.",
            labels.join(", "),
            measurements.total_hypothesis_count,
            measurements.passed_hypothesis_count,
            measurements.promising_hypothesis_count,
            measurements.max_normalized_confidence,
            measurements.mean_normalized_confidence,
            measurements.is_dominant_clear,
            measurements.unique_source_target_pairs,
            measurements.max_paths_per_pair,
            measurements.diversity_score,
            measurements.graph_density,
            measurements.evidence_growth_rate,
            measurements.mean_path_length,
        )
    }

    pub async fn decide(&self, measurements: &Measurements) -> DecisionLabel {
        let prompt = Self::build_prompt(measurements);
        let response = match self
            .llm
            .generate(&prompt, &GenerateOptions::default().with_temperature(0.0))
            .await
        {
            Ok(text) => text.trim().to_lowercase(),
            Err(e) => {
                tracing::warn!("LLM decision failed: {e}; defaulting to fetch");
                return DecisionLabel::FetchMoreLiterature;
            }
        };
        if response.is_empty() {
            tracing::warn!("LLM returned empty decision; defaulting to fetch");
            return DecisionLabel::FetchMoreLiterature;
        }
        // Substring match against the label set; longest labels first so
        // "verification_not_found" is not shadowed by "verification_found".
        let mut labels = DecisionLabel::all();
        labels.sort_by_key(|d| std::cmp::Reverse(d.as_str().len()));
        for label in labels {
            if response.contains(label.as_str()) {
                tracing::info!("LLM decided: {label}");
                return label;
            }
        }
        tracing::warn!("LLM response unparsable ({response:?}); defaulting to fetch");
        DecisionLabel::FetchMoreLiterature
    }
}

/// Orchestrates providers according to the configured mode.
pub struct DecisionController {
    mode: ControllerMode,
    rule: RuleBasedProvider,
    llm: Option<LlmDecisionProvider>,
}

impl DecisionController {
    pub fn new(mode: ControllerMode, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            mode,
            rule: RuleBasedProvider,
            llm: llm.map(LlmDecisionProvider::new),
        }
    }

    pub async fn decide(
        &self,
        measurements: &Measurements,
        job_mode: JobMode,
        thresholds: &DecisionThresholds,
    ) -> DecisionOutcome {
        match self.mode {
            ControllerMode::RuleBased | ControllerMode::Hybrid => {
                // The rule set is total, so hybrid's LLM fallback never
                // fires; it exists for future undecidable rule sets.
                let label = self.rule.decide(measurements, job_mode, thresholds);
                DecisionOutcome {
                    label,
                    provider_used: "rule_based".to_string(),
                    fallback_used: false,
                    fallback_reason: None,
                }
            }
            ControllerMode::Llm => match &self.llm {
                Some(provider) => {
                    let label = provider.decide(measurements).await;
                    DecisionOutcome {
                        label,
                        provider_used: "llm".to_string(),
                        fallback_used: false,
                        fallback_reason: None,
                    }
                }
                None => {
                    let label = self.rule.decide(measurements, job_mode, thresholds);
                    DecisionOutcome {
                        label,
                        provider_used: "rule_based".to_string(),
                        fallback_used: true,
                        fallback_reason: Some("LLM provider not configured".to_string()),
                    }
                }
            },
        }
    }
}
