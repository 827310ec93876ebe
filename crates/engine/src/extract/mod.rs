//! Region extraction: turning raw document text into named regions.
//!
//! Binary format parsing (PDF, DOCX) lives outside the engine; what comes
//! through the `Extractor` interface is text plus enough layout to detect
//! section headers. The section extractor walks blocks in order, gathers
//! text under whitelisted headings, and stops dead at an excluded heading
//! (references, bibliography).

use async_trait::async_trait;

use crate::config::ExtractionPolicy;
use crate::types::ExtractError;

/// One extracted region of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub text: String,
    pub region_type: String,
    pub page: usize,
}

/// Extraction contract. `input` is either raw text or a stored file path,
/// depending on the adapter.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_regions(
        &self,
        input: &str,
        policy: &ExtractionPolicy,
    ) -> Result<Vec<Region>, ExtractError>;

    fn name(&self) -> &str;
}

/// Pass-through extractor for already-clean text (abstracts, chat text):
/// one "body" region, no section detection.
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract_regions(
        &self,
        input: &str,
        _policy: &ExtractionPolicy,
    ) -> Result<Vec<Region>, ExtractError> {
        let text = input.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Region {
            text: text.to_string(),
            region_type: "body".to_string(),
            page: 1,
        }])
    }

    fn name(&self) -> &str {
        "plain_text"
    }
}

/// Section headings that map to a named region.
fn detect_region(line: &str) -> Option<&'static str> {
    // Real headings are short; anything long is body text.
    if line.len() > 80 {
        return None;
    }
    let lower = line.trim().trim_end_matches('.').to_lowercase();
    // Tolerate numbered headings like "3. Results".
    let stripped = lower
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ')
        .trim();
    match stripped {
        "abstract" => Some("abstract"),
        "introduction" => Some("introduction"),
        "background" => Some("introduction"),
        "method" | "methods" | "methodology" | "materials and methods" => Some("methods"),
        "result" | "results" => Some("results"),
        "discussion" => Some("discussion"),
        "conclusion" | "conclusions" => Some("conclusion"),
        _ => None,
    }
}

/// Section-aware extractor for paper-shaped text. Operates on text whose
/// physical extraction already happened (one block per line or paragraph).
pub struct SectionExtractor;

impl SectionExtractor {
    fn flush(
        buffer: &mut Vec<String>,
        region: Option<&str>,
        policy: &ExtractionPolicy,
        output: &mut Vec<Region>,
        page: usize,
    ) {
        let Some(region) = region else {
            buffer.clear();
            return;
        };
        if buffer.is_empty() {
            return;
        }
        if !policy.whitelisted_regions.iter().any(|w| w == region) {
            tracing::debug!("Discarding non-whitelisted region '{region}' ({} blocks)", buffer.len());
            buffer.clear();
            return;
        }
        let text = buffer.join(" ").trim().to_string();
        buffer.clear();
        if !text.is_empty() {
            output.push(Region {
                text,
                region_type: region.to_string(),
                page,
            });
        }
    }
}

#[async_trait]
impl Extractor for SectionExtractor {
    async fn extract_regions(
        &self,
        input: &str,
        policy: &ExtractionPolicy,
    ) -> Result<Vec<Region>, ExtractError> {
        let mut regions: Vec<Region> = Vec::new();
        let mut current: Option<String> = None;
        let mut buffer: Vec<String> = Vec::new();
        let mut pruned = false;
        // Page markers are form feeds when the upstream extraction kept them.
        let mut page = 1usize;

        for raw_line in input.lines() {
            if raw_line.contains('\u{c}') {
                page += 1;
            }
            let line = raw_line.trim_matches('\u{c}').trim();
            if line.is_empty() {
                continue;
            }

            let head: String = line.to_lowercase().chars().take(80).collect();
            if policy.excluded_regions.iter().any(|exc| head.contains(exc)) {
                tracing::debug!("Exclusion marker found on page {page}; pruning");
                Self::flush(&mut buffer, current.as_deref(), policy, &mut regions, page);
                pruned = true;
                break;
            }

            if let Some(detected) = detect_region(line) {
                if current.as_deref() != Some(detected) {
                    Self::flush(&mut buffer, current.as_deref(), policy, &mut regions, page);
                    current = Some(detected.to_string());
                    // The heading line itself is not content.
                    continue;
                }
            }

            if current.is_some() {
                buffer.push(line.to_string());
            }
        }

        if !pruned {
            Self::flush(&mut buffer, current.as_deref(), policy, &mut regions, page);
        }

        if regions.is_empty() && policy.fallback_to_full_text {
            let full = input
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if !full.is_empty() {
                tracing::debug!("No whitelisted region found; falling back to full text");
                regions.push(Region {
                    text: full,
                    region_type: "body".to_string(),
                    page: 1,
                });
            }
        }

        Ok(regions)
    }

    fn name(&self) -> &str {
        "section"
    }
}

/// Pick the extractor for a source's shape: file-backed paper text gets
/// section detection, everything else passes through.
pub fn extractor_for(source_type: crate::types::SourceType) -> Box<dyn Extractor> {
    match source_type {
        crate::types::SourceType::PdfText => Box::new(SectionExtractor),
        _ => Box::new(PlainTextExtractor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAPER: &str = "\
A Study of Widgets

Abstract
Widgets are interesting. We study them.

Introduction
Widgets appeared in 1901.

Acknowledgements
Thanks to everyone.

Results
Widgets work well.

References
[1] Widget, A. et al.
This line is past the cutoff and must not appear.";

    #[tokio::test]
    async fn whitelisted_sections_are_gathered() {
        let policy = ExtractionPolicy::default();
        let regions = SectionExtractor
            .extract_regions(PAPER, &policy)
            .await
            .unwrap();
        let types: Vec<&str> = regions.iter().map(|r| r.region_type.as_str()).collect();
        assert_eq!(types, vec!["abstract", "introduction", "results"]);
        assert!(regions[0].text.contains("Widgets are interesting"));
    }

    #[tokio::test]
    async fn excluded_heading_terminates_extraction() {
        let policy = ExtractionPolicy::default();
        let regions = SectionExtractor
            .extract_regions(PAPER, &policy)
            .await
            .unwrap();
        for region in &regions {
            assert!(!region.text.contains("past the cutoff"));
        }
    }

    #[tokio::test]
    async fn falls_back_to_full_text_when_no_sections() {
        let policy = ExtractionPolicy::default();
        let regions = SectionExtractor
            .extract_regions("just a paragraph of prose with no headings", &policy)
            .await
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].region_type, "body");
    }

    #[tokio::test]
    async fn plain_text_is_one_body_region() {
        let policy = ExtractionPolicy::default();
        let regions = PlainTextExtractor
            .extract_regions("  an abstract from an api  ", &policy)
            .await
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "an abstract from an api");
    }

    #[test]
    fn numbered_headings_detected() {
        assert_eq!(detect_region("3. Results"), Some("results"));
        assert_eq!(detect_region("METHODS"), Some("methods"));
        assert_eq!(detect_region("Results show that widgets are great"), None);
    }
}
