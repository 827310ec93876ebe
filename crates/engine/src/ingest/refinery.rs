//! LLM text refinery: cleans messy extraction output before slicing.
//!
//! Large inputs are split into spans that fit the model's response budget,
//! preferring paragraph boundaries. A span that comes back looking
//! truncated (long input, last line without terminal punctuation) is
//! retried up to the configured limit.

use std::sync::Arc;

use crate::config::RefineryPolicy;
use crate::llm::{GenerateOptions, LlmProvider};
use crate::types::LlmError;

const REFINERY_PROMPT: &str = "You are cleaning text extracted from a scientific document. \
Remove layout artifacts, page headers and footers, broken hyphenation, and citation markers. \
Keep every factual sentence. Output only the cleaned text, one sentence per line, \
with no commentary.\n\nText:\n{text}";

/// Prefixes the model sometimes adds despite instructions.
const GARBAGE_MARKERS: &[&str] = &[
    "here is",
    "clean text:",
    "cleaned text:",
    "the following",
    "refinement:",
];

pub struct TextRefinery {
    llm: Arc<dyn LlmProvider>,
    policy: RefineryPolicy,
}

impl TextRefinery {
    pub fn new(llm: Arc<dyn LlmProvider>, policy: RefineryPolicy) -> Self {
        Self { llm, policy }
    }

    /// Refine a full region text, span by span. Spans that fail after all
    /// retries are dropped; the surviving spans are joined.
    pub async fn refine(&self, raw_text: &str) -> Result<String, LlmError> {
        if raw_text.trim().is_empty() {
            return Ok(String::new());
        }

        // Scientific text runs ~3 chars per token; leave the model room to
        // echo the whole span back.
        let max_chars = self.policy.max_tokens_per_span * 3;
        let spans = split_into_spans(raw_text, max_chars);
        let total = spans.len();

        let mut refined = Vec::new();
        for (i, span) in spans.into_iter().enumerate() {
            tracing::debug!("Refining span {}/{} ({} chars)", i + 1, total, span.len());
            match self.refine_span(&span).await {
                Ok(clean) if !clean.is_empty() => refined.push(clean),
                Ok(_) => tracing::debug!("Refinery produced nothing for span {}", i + 1),
                Err(e) => {
                    tracing::warn!("Refinery span {}/{} failed, dropping it: {e}", i + 1, total);
                }
            }
        }
        Ok(refined.join("\n"))
    }

    async fn refine_span(&self, span: &str) -> Result<String, LlmError> {
        let prompt = REFINERY_PROMPT.replace("{text}", span);
        let options = GenerateOptions::default()
            .with_temperature(self.policy.temperature)
            .with_max_tokens(self.policy.max_tokens_per_span as u32);

        let mut last_error = None;
        for attempt in 0..self.policy.max_retries.max(1) {
            let response = match self.llm.generate(&prompt, &options).await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };

            let lines: Vec<&str> = response
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();

            // A long span whose output stops mid-sentence was truncated;
            // short spans may legitimately be headers or fragments.
            if span.len() > 200 && looks_truncated(&lines) {
                tracing::warn!(
                    "Refinery output looks truncated (attempt {}/{}), retrying",
                    attempt + 1,
                    self.policy.max_retries
                );
                last_error = Some(LlmError::Unparseable("truncated span".to_string()));
                continue;
            }

            return Ok(scrub_meta_filler(&lines.join("\n")));
        }

        Err(last_error.unwrap_or(LlmError::NotConfigured))
    }
}

fn looks_truncated(lines: &[&str]) -> bool {
    match lines.last() {
        Some(last) => !last.ends_with(['.', '?', '!', '"']),
        None => false,
    }
}

/// Strip "here is your cleaned text"-style preambles.
fn scrub_meta_filler(text: &str) -> String {
    let lower = text.to_lowercase();
    for marker in GARBAGE_MARKERS {
        if lower.starts_with(marker) {
            return match text.find('\n') {
                Some(idx) => text[idx + 1..].trim().to_string(),
                None => String::new(),
            };
        }
    }
    text.to_string()
}

/// Split text into spans of at most `max_chars`, preferring paragraph
/// breaks, then line breaks, then spaces, then a hard cut.
pub fn split_into_spans(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut spans = Vec::new();
    let mut remaining = text;
    while remaining.len() > max_chars {
        let window = floor_char_boundary(remaining, max_chars);
        let head = &remaining[..window];
        let split_idx = head
            .rfind("\n\n")
            .or_else(|| head.rfind('\n'))
            .or_else(|| head.rfind(' '))
            .unwrap_or(window);
        let split_idx = if split_idx == 0 { window } else { split_idx };
        spans.push(remaining[..split_idx].trim().to_string());
        remaining = remaining[split_idx..].trim_start();
    }
    if !remaining.trim().is_empty() {
        spans.push(remaining.trim().to_string());
    }
    spans.retain(|s| !s.is_empty());
    spans
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[test]
    fn spans_respect_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let spans = split_into_spans(&text, 100);
        assert_eq!(spans.len(), 2);
        assert!(spans[0].chars().all(|c| c == 'a'));
        assert!(spans[1].chars().all(|c| c == 'b'));
    }

    #[test]
    fn short_text_is_one_span() {
        assert_eq!(split_into_spans("short", 100), vec!["short".to_string()]);
    }

    #[test]
    fn meta_filler_is_scrubbed() {
        assert_eq!(
            scrub_meta_filler("Here is the cleaned text:\nActual content."),
            "Actual content."
        );
        assert_eq!(scrub_meta_filler("Actual content."), "Actual content.");
    }

    #[tokio::test]
    async fn truncated_output_is_retried() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .enqueue("This output stops mid")
                .enqueue("This output is complete."),
        );
        let refinery = TextRefinery::new(llm, RefineryPolicy::default());
        let long_input = "sentence. ".repeat(30);
        let clean = refinery.refine(&long_input).await.unwrap();
        assert_eq!(clean, "This output is complete.");
    }

    #[tokio::test]
    async fn failing_span_is_dropped_not_fatal() {
        // Only one response scripted; the second span exhausts and drops.
        let llm = Arc::new(ScriptedLlm::new().enqueue("Cleaned first span."));
        let mut policy = RefineryPolicy::default();
        policy.max_tokens_per_span = 20; // 60-char spans
        let refinery = TextRefinery::new(llm, policy);
        let input = format!("{}\n\n{}", "first part. ".repeat(5), "second part. ".repeat(5));
        let clean = refinery.refine(&input).await.unwrap();
        assert_eq!(clean, "Cleaned first span.");
    }
}
