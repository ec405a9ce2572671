//! Text normalization shared by scraping, matching and cache keys.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Corporate suffixes ignored when comparing company names.
const COMPANY_SUFFIXES: &[&str] = &[" inc", " corp", " llc", " ltd", " limited", " corporation"];

/// Lowercase, replace anything but `[a-z0-9]` and whitespace with a space,
/// collapse runs of whitespace.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let cleaned = NON_ALNUM.replace_all(&lowered, " ");
    collapse_whitespace(&cleaned)
}

/// Collapse whitespace runs into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Comparison form for free-text fields: collapsed and lowercased.
pub fn comparable(text: Option<&str>) -> String {
    text.map(|t| collapse_whitespace(t).to_lowercase())
        .unwrap_or_default()
}

/// Squeeze runs of blank lines in Markdown down to one.
pub fn squeeze_blank_lines(markdown: &str) -> String {
    let trimmed: Vec<&str> = markdown.lines().map(str::trim_end).collect();
    BLANK_LINES
        .replace_all(&trimmed.join("\n"), "\n\n")
        .trim()
        .to_string()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn clean_company_name(name: &str) -> String {
    let mut name = name.trim().to_lowercase();
    for suffix in COMPANY_SUFFIXES {
        let trimmed = name.trim_end_matches(&[',', '.'][..]);
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            name = stripped.to_string();
        }
    }
    name.trim().trim_end_matches(&[',', '.'][..]).trim().to_string()
}

/// Similarity of two company names in `[0, 1]`.
///
/// Suffixes like "Inc" or "Ltd" are ignored; the score is the Jaccard
/// index of the remaining word sets.
pub fn company_name_similarity(a: &str, b: &str) -> f64 {
    let a = clean_company_name(a);
    let b = clean_company_name(b);
    if a == b {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }

    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_text("  C++ / Rust!  "), "c rust");
        assert_eq!(normalize_text("Machine\tLearning"), "machine learning");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn comparable_ignores_cosmetic_whitespace() {
        assert_eq!(comparable(Some("Senior  Engineer\n")), "senior engineer");
        assert_eq!(comparable(None), "");
    }

    #[test]
    fn company_suffixes_are_ignored() {
        assert_eq!(company_name_similarity("Acme Inc", "acme"), 1.0);
        assert_eq!(company_name_similarity("Globex Corporation", "Globex"), 1.0);
        assert_eq!(company_name_similarity("Acme, Inc.", "Acme"), 1.0);
    }

    #[test]
    fn partial_overlap_scores_below_threshold() {
        let score = company_name_similarity("Acme Robotics", "Acme Foods");
        assert!((score - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(company_name_similarity("", ""), 0.0);
    }

    #[test]
    fn blank_lines_are_squeezed() {
        assert_eq!(squeeze_blank_lines("a\n\n\n\nb  \n"), "a\n\nb");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
