//! Context-window shaping
//!
//! Pre-flight sizing uses a characters/4 estimate instead of the model's
//! tokenizer. It over- or under-counts by a fair margin on code and
//! non-Latin text; see `Inference::count_tokens` for the exact variant.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker spliced between the kept head and tail of truncated text
pub const TRUNCATION_MARKER: &str = "\n\n[... content truncated ...]\n\n";

const CHARS_PER_TOKEN: usize = 4;

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t\r]*\n").unwrap());

/// Estimated token count: ceil(chars / 4)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Fit `text` into roughly `max_tokens`, keeping its beginning and end.
///
/// Text within budget is returned unchanged. Otherwise
/// `max_tokens * 4 / 2 - 50` characters are kept from each end around
/// [`TRUNCATION_MARKER`].
pub fn truncate_for_context(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let keep = (max_tokens * CHARS_PER_TOKEN / 2).saturating_sub(50);
    let total_chars = text.chars().count();
    let head_end = byte_offset(text, keep);
    let tail_start = byte_offset(text, total_chars.saturating_sub(keep));

    tracing::debug!(
        "Truncating {} chars to {} + {} around marker",
        total_chars,
        keep,
        keep
    );

    let mut out = String::with_capacity(keep * 2 + TRUNCATION_MARKER.len());
    out.push_str(&text[..head_end]);
    out.push_str(TRUNCATION_MARKER);
    out.push_str(&text[tail_start..]);
    out
}

/// Split `text` into chunks of whole paragraphs, each under
/// `max_tokens_per_chunk * 4` characters where possible.
///
/// Paragraphs are separated by blank lines and never split; a single
/// paragraph larger than the budget becomes its own chunk.
pub fn chunk_text(text: &str, max_tokens_per_chunk: usize) -> Vec<String> {
    let budget = max_tokens_per_chunk * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut current = String::new();
    // Length of `current` in characters
    let mut current_chars = 0usize;

    for paragraph in PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        let paragraph_chars = paragraph.chars().count();
        let joined_chars = if current.is_empty() {
            paragraph_chars
        } else {
            current_chars + 2 + paragraph_chars
        };

        if joined_chars > budget && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
            current_chars += 2;
        }
        current.push_str(paragraph);
        current_chars += paragraph_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // Counts characters, not bytes
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_truncate_within_budget_is_identity() {
        let text = "a".repeat(3200); // exactly 800 tokens
        assert_eq!(truncate_for_context(&text, 800), text);
    }

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let text = format!("{}{}{}", "H".repeat(2000), "M".repeat(5000), "T".repeat(2000));
        let out = truncate_for_context(&text, 800);

        let keep = 800 * 4 / 2 - 50;
        assert!(out.starts_with(&"H".repeat(keep)));
        assert!(out.ends_with(&"T".repeat(keep)));
        assert!(out.contains(TRUNCATION_MARKER));
        assert!(!out.contains('M'));
        assert_eq!(out.chars().count(), keep * 2 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(10_000);
        let out = truncate_for_context(&text, 100);
        assert!(out.starts_with('é'));
        assert!(out.ends_with('é'));
    }

    #[test]
    fn test_chunk_completeness() {
        let paragraphs: Vec<String> = (0..30)
            .map(|i| format!("Paragraph {} {}", i, "word ".repeat(20 + i)))
            .map(|p| p.trim().to_string())
            .collect();
        let text = paragraphs.join("\n\n");

        let chunks = chunk_text(&text, 100);
        assert!(chunks.len() > 1);

        let rejoined: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.split("\n\n").map(str::to_string))
            .collect();
        assert_eq!(rejoined, paragraphs);

        for chunk in &chunks {
            let count = chunk.split("\n\n").count();
            assert!(chunk.len() <= 400 || count == 1);
        }
    }

    #[test]
    fn test_chunk_budget_counts_characters() {
        // 1802 characters but 3602 bytes
        let paragraph = "é".repeat(900);
        let text = format!("{}\n\n{}", paragraph, paragraph);
        let chunks = chunk_text(&text, 500);
        assert_eq!(chunks, vec![text.clone()]);

        let chunks = chunk_text(&text, 450);
        assert_eq!(chunks, vec![paragraph.clone(), paragraph]);
    }

    #[test]
    fn test_oversized_paragraph_is_not_split() {
        let big = "x".repeat(1000);
        let text = format!("small\n\n{}\n\ntail", big);
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks, vec!["small".to_string(), big, "tail".to_string()]);
    }

    #[test]
    fn test_chunk_handles_whitespace_lines() {
        let text = "one\n  \ntwo\r\n\r\nthree";
        let chunks = chunk_text(text, 1000);
        assert_eq!(chunks, vec!["one\n\ntwo\n\nthree".to_string()]);
    }

    #[test]
    fn test_chunk_empty_text() {
        assert!(chunk_text("   \n\n  ", 100).is_empty());
    }
}
