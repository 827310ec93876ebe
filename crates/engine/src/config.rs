//! Configuration for the engine.
//!
//! Two layers, strictly separated:
//! - `AdminPolicy`: operator-controlled tuning loaded once at startup from a
//!   YAML file and immutable afterwards. Never stored in the database.
//! - `JobConfig`: per-job settings captured at job creation and frozen as a
//!   JSON snapshot on the job row.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Operator policy, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminPolicy {
    pub decision: DecisionThresholds,
    pub signals: SignalParams,
    pub query_orchestrator: QueryOrchestratorPolicy,
    pub graph_merging: GraphMergingPolicy,
    pub graph_rules: GraphRules,
    pub indirect_path: IndirectPathPolicy,
    pub extraction: ExtractionPolicy,
    pub refinery: RefineryPolicy,
    pub slicing: SlicingPolicy,
    pub fetch: FetchPolicy,
    pub domains: DomainPolicy,
    pub llm: LlmPolicy,
    pub embedding: EmbeddingPolicy,
    /// Hard cap on papers per job; reaching it finalizes the job.
    pub max_papers_per_job: MaxPapers,
}

/// Wrapper so a bare integer in YAML still deserializes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxPapers(pub usize);

impl Default for MaxPapers {
    fn default() -> Self {
        MaxPapers(100)
    }
}

impl AdminPolicy {
    /// Load and validate a policy file. Missing sections take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let policy: AdminPolicy =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decision.confidence_normalization_factor <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "decision.confidence_normalization_factor".into(),
                reason: "must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.graph_merging.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "graph_merging.similarity_threshold".into(),
                reason: "must be within [0, 1]".into(),
            });
        }
        if self.query_orchestrator.signature_length == 0
            || self.query_orchestrator.signature_length > 64
        {
            return Err(ConfigError::InvalidValue {
                key: "query_orchestrator.signature_length".into(),
                reason: "must be within 1..=64".into(),
            });
        }
        Ok(())
    }
}

/// Thresholds driving the rule-based decision provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    pub confidence_normalization_factor: f64,
    pub high_confidence_threshold: f64,
    pub dominant_gap_ratio: f64,
    pub low_diversity_unique_pairs_threshold: usize,
    pub diversity_ratio_threshold: f64,
    pub sparse_graph_density_threshold: f64,
    pub path_support_threshold: usize,
    pub minimum_hypotheses_threshold: usize,
    pub passed_to_total_ratio_threshold: f64,
    /// Configured but unused by the current rule set; kept for operators.
    pub stability_cycle_threshold: usize,
    pub top_k_hypotheses_to_store: usize,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            confidence_normalization_factor: 10.0,
            high_confidence_threshold: 0.7,
            dominant_gap_ratio: 0.3,
            low_diversity_unique_pairs_threshold: 2,
            diversity_ratio_threshold: 0.3,
            sparse_graph_density_threshold: 0.05,
            path_support_threshold: 2,
            minimum_hypotheses_threshold: 1,
            passed_to_total_ratio_threshold: 0.2,
            stability_cycle_threshold: 3,
            top_k_hypotheses_to_store: 5,
        }
    }
}

/// Signal attribution tuning: how measurement deltas convert into
/// reputation updates on search queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalParams {
    pub positive_threshold: f64,
    pub negative_threshold: f64,
    pub reputation_positive_delta: i64,
    pub reputation_negative_delta: i64,
    /// Weight per measurement name contributing to the composite delta.
    pub weights: HashMap<String, f64>,
    /// Normalization ceiling per measurement name.
    pub max_deltas: HashMap<String, f64>,
}

impl Default for SignalParams {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert("passed_hypothesis_count".to_string(), 1.0);
        weights.insert("mean_normalized_confidence".to_string(), 0.8);
        weights.insert("graph_density".to_string(), 0.5);
        weights.insert("filtered_to_total_ratio".to_string(), 0.3);

        let mut max_deltas = HashMap::new();
        max_deltas.insert("passed_hypothesis_count".to_string(), 100.0);
        max_deltas.insert("mean_normalized_confidence".to_string(), 20.0);
        max_deltas.insert("graph_density".to_string(), 0.2);
        max_deltas.insert("filtered_to_total_ratio".to_string(), 0.5);

        Self {
            positive_threshold: 1.0,
            negative_threshold: -1.0,
            reputation_positive_delta: 10,
            reputation_negative_delta: -20,
            weights,
            max_deltas,
        }
    }
}

/// Search query lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOrchestratorPolicy {
    pub signature_length: usize,
    pub initial_reputation: i64,
    pub max_reuse_attempts: usize,
    pub fetch_batch_size: usize,
    pub results_limit: usize,
    pub top_k_hypotheses: usize,
    pub min_reputation: i64,
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for QueryOrchestratorPolicy {
    fn default() -> Self {
        Self {
            signature_length: 64,
            initial_reputation: 0,
            max_reuse_attempts: 3,
            fetch_batch_size: 10,
            results_limit: 50,
            top_k_hypotheses: 3,
            min_reputation: -30,
            retry_attempts: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Semantic merge tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphMergingPolicy {
    /// Cosine similarity above which concept nodes collapse into one cluster.
    pub similarity_threshold: f64,
}

impl Default for GraphMergingPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

/// Rule lists applied during sanitization and hypothesis filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphRules {
    /// Regex patterns whose matches are removed as noise nodes.
    pub node_removal_patterns: Vec<String>,
    /// Exact (lowercased) node texts removed as noise.
    pub node_removal_exact: Vec<String>,
    /// Predicates too generic to support a hypothesis on their own.
    pub generic_predicates: Vec<String>,
    /// Intermediates with degree above this are hubs and rejected.
    pub hub_degree_threshold: usize,
    /// Minimum hypothesis confidence to pass the evidence rule.
    pub min_confidence: i64,
    /// Default stoplist for trivial intermediate concepts.
    pub stoplist: Vec<String>,
}

impl Default for GraphRules {
    fn default() -> Self {
        Self {
            node_removal_patterns: vec![
                r"^\d+$".to_string(),
                r"^[\s\p{P}]+$".to_string(),
                r"^(figure|fig\.?|table|section)\s*\d*$".to_string(),
            ],
            node_removal_exact: vec![
                "it".to_string(),
                "this".to_string(),
                "that".to_string(),
                "they".to_string(),
                "we".to_string(),
            ],
            generic_predicates: vec![
                "related_to".to_string(),
                "associated_with".to_string(),
            ],
            hub_degree_threshold: 50,
            min_confidence: 2,
            stoplist: vec![
                "study".to_string(),
                "result".to_string(),
                "finding".to_string(),
            ],
        }
    }
}

/// Indirect-path measurement tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndirectPathPolicy {
    pub enabled: bool,
    pub temporal_placeholders: bool,
    pub dominance_gap_threshold: f64,
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for IndirectPathPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            temporal_placeholders: true,
            dominance_gap_threshold: 0.2,
            min_length: 2,
            max_length: 3,
        }
    }
}

/// Region extraction tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPolicy {
    /// Region names kept after section detection.
    pub whitelisted_regions: Vec<String>,
    /// Header substrings that terminate extraction early.
    pub excluded_regions: Vec<String>,
    /// When no whitelisted region is found, fall back to the full text.
    pub fallback_to_full_text: bool,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            whitelisted_regions: vec![
                "abstract".to_string(),
                "introduction".to_string(),
                "body".to_string(),
                "methods".to_string(),
                "results".to_string(),
                "conclusion".to_string(),
            ],
            excluded_regions: vec!["references".to_string(), "bibliography".to_string()],
            fallback_to_full_text: true,
        }
    }
}

/// LLM text cleaning tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineryPolicy {
    /// Source types whose text goes through the LLM refinery.
    pub needs_refinement_types: Vec<String>,
    pub max_tokens_per_span: usize,
    pub temperature: f32,
    pub max_retries: u32,
}

impl Default for RefineryPolicy {
    fn default() -> Self {
        Self {
            needs_refinement_types: vec!["pdf_text".to_string(), "user_text".to_string()],
            max_tokens_per_span: 1024,
            temperature: 0.2,
            max_retries: 3,
        }
    }
}

/// Sentence slicing tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicingPolicy {
    pub sentences_per_block: usize,
    /// Character budget per block (token estimate proxy); blocks never end
    /// mid-sentence even when a single sentence exceeds this.
    pub max_block_chars: usize,
}

impl Default for SlicingPolicy {
    fn default() -> Self {
        Self {
            sentences_per_block: 3,
            max_block_chars: 1200,
        }
    }
}

/// Per-provider fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    pub providers: HashMap<String, FetchProviderPolicy>,
    /// Domain → provider name routing; `default` keys the fallback.
    pub domain_providers: HashMap<String, String>,
    /// Paper fields folded into the content fingerprint.
    pub fingerprint_components: Vec<String>,
    /// Similarity above which two fingerprints count as the same paper.
    pub fingerprint_similarity_threshold: f64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "semantic_scholar".to_string(),
            FetchProviderPolicy {
                base_url: "https://api.semanticscholar.org/graph/v1/paper/search".to_string(),
                rate_limit_wait: Duration::from_secs(2),
                api_key_env: Some("SEMANTIC_SCHOLAR_API_KEY".to_string()),
            },
        );
        providers.insert(
            "crossref".to_string(),
            FetchProviderPolicy {
                base_url: "https://api.crossref.org/works".to_string(),
                rate_limit_wait: Duration::from_secs(1),
                api_key_env: None,
            },
        );

        let mut domain_providers = HashMap::new();
        domain_providers.insert("biomedical".to_string(), "semantic_scholar".to_string());
        domain_providers.insert("computer_science".to_string(), "crossref".to_string());
        domain_providers.insert("physics".to_string(), "crossref".to_string());
        domain_providers.insert("default".to_string(), "semantic_scholar".to_string());

        Self {
            providers,
            domain_providers,
            fingerprint_components: vec![
                "title".to_string(),
                "abstract".to_string(),
                "authors".to_string(),
            ],
            fingerprint_similarity_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchProviderPolicy {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub rate_limit_wait: Duration,
    pub api_key_env: Option<String>,
}

/// Domain resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainPolicy {
    pub allowed_domains: Vec<String>,
    /// Keyword → domain map tried before the LLM.
    pub keywords: HashMap<String, String>,
}

impl Default for DomainPolicy {
    fn default() -> Self {
        let mut keywords = HashMap::new();
        for kw in ["gene", "protein", "disease", "drug", "cell", "clinical"] {
            keywords.insert(kw.to_string(), "biomedical".to_string());
        }
        for kw in ["algorithm", "neural network", "model", "dataset"] {
            keywords.insert(kw.to_string(), "computer_science".to_string());
        }
        Self {
            allowed_domains: vec![
                "biomedical".to_string(),
                "computer_science".to_string(),
                "physics".to_string(),
                "chemistry".to_string(),
            ],
            keywords,
        }
    }
}

/// LLM connection settings (API keys stay in the environment).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmPolicy {
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for LlmPolicy {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 3,
        }
    }
}

/// Embedding connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingPolicy {
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub dimension: usize,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for EmbeddingPolicy {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimension: 1536,
            timeout: Duration::from_secs(30),
        }
    }
}

// ── Per-job configuration ───────────────────────────────────────────

/// Settings captured at job creation; immutable for the job's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    /// Domain override: skips automatic resolution when set.
    pub domain: Option<String>,
    pub focus_areas: Vec<String>,
    pub expert_settings: ExpertSettings,
    pub path_reasoning: PathReasoningConfig,
    pub query_expansion_terms: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ExpertSettings {
    pub assumptions: Vec<String>,
    pub preferred_predicates: Vec<String>,
    pub excluded_entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathReasoningConfig {
    pub seeds: Vec<String>,
    pub stoplist: Vec<String>,
    pub allow_len3: bool,
    pub max_hops: usize,
}

impl Default for PathReasoningConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            stoplist: Vec::new(),
            allow_len3: false,
            max_hops: 2,
        }
    }
}
