//! Name normalization and lexical similarity for source account labels.

use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &["a", "an", "and", "for", "in", "of", "on", "the", "to"];

/// Lowercase, turn `&` into `and`, replace punctuation with spaces and collapse whitespace.
///
/// Two source labels that normalize to the same string are the same source account.
pub fn normalize_name(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '&' {
            cleaned.push_str(" and ");
        } else if c.is_alphanumeric() {
            cleaned.extend(c.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Significant tokens of a label, stop words removed.
pub fn token_set(raw: &str) -> BTreeSet<String> {
    normalize_name(raw)
        .split(' ')
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Sørensen–Dice coefficient of two token sets; 0.0 when either is empty.
pub fn dice(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    (2 * shared) as f64 / (a.len() + b.len()) as f64
}

/// Similarity of a source label to a category.
///
/// `category_names` holds the category's display name first, followed by its
/// ancestors' names. The result is the higher of the token overlap against the
/// whole path and the Jaro-Winkler similarity against the display name alone.
pub fn lexical_similarity(source: &str, category_names: &[&str]) -> f64 {
    let Some(display) = category_names.first() else {
        return 0.0;
    };
    let source_norm = normalize_name(source);
    if source_norm.is_empty() {
        return 0.0;
    }

    let source_tokens = token_set(source);
    let path_tokens: BTreeSet<String> = category_names
        .iter()
        .flat_map(|name| token_set(name))
        .collect();
    let overlap = dice(&source_tokens, &path_tokens);
    let jaro = strsim::jaro_winkler(&source_norm, &normalize_name(display));

    overlap.max(jaro).clamp(0.0, 1.0)
}
