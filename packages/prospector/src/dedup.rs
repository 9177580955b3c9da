//! Duplicate detection: exact content hashing and approximate repost scoring.

use sha2::{Digest, Sha256};
use strsim::levenshtein;

/// Generate a content hash for duplicate detection
///
/// Uses SHA256 of normalized text to detect identical content under
/// formatting changes. Normalization rules:
/// - Convert to lowercase
/// - Remove all non-alphanumeric characters (except spaces)
/// - Collapse multiple spaces into single spaces
/// - Trim leading/trailing whitespace
pub fn content_hash(text: &str) -> String {
    let normalized = normalize(text);

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Partial-substring similarity score in 0..=100.
///
/// Slides the shorter normalized string over windows of the longer one and
/// takes the best Levenshtein ratio. A short post embedded in a longer repost
/// still scores high, which plain whole-string distance misses.
pub fn partial_similarity(a: &str, b: &str) -> u8 {
    let a = normalize(a);
    let b = normalize(b);

    if a.is_empty() && b.is_empty() {
        return 100;
    }
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    let short_chars: Vec<char> = shorter.chars().collect();
    let long_chars: Vec<char> = longer.chars().collect();
    let window = short_chars.len();

    let mut best: f64 = 0.0;
    let mut start = 0;
    while start + window <= long_chars.len() {
        let slice: String = long_chars[start..start + window].iter().collect();
        let dist = levenshtein(shorter, &slice);
        let ratio = 1.0 - (dist as f64 / window as f64);
        if ratio > best {
            best = ratio;
        }
        if best >= 1.0 {
            break;
        }
        start += 1;
    }

    (best * 100.0).round() as u8
}

/// Flags near-identical reposts by the same author.
///
/// Exact duplicates are rejected at collect time by hash lookup; this covers
/// the slightly-reworded repost at classification time. Scoped to one author
/// within one bot, so the caller supplies only that author's prior content.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    threshold: u8,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self { threshold: 80 }
    }
}

impl DuplicateDetector {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// True when `content` scores at or above the threshold against any of
    /// the author's prior included posts.
    pub fn is_repost(&self, content: &str, priors: &[String]) -> bool {
        priors
            .iter()
            .any(|prior| partial_similarity(content, prior) >= self.threshold)
    }
}
