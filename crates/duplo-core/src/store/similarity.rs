//! Similarity index used by the duplicate finder.
//!
//! [`SimilarityIndex`] is the seam for an external embedding store;
//! [`TokenIndex`] is the in-process implementation: cosine similarity over
//! identifier-token frequency vectors with an inverted posting list so a
//! query only touches entries sharing at least one token.

use std::collections::HashMap;
use std::sync::LazyLock;

use indexmap::IndexMap;
use parking_lot::RwLock;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::DuploResult;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|[0-9]+|[^\sA-Za-z0-9_]").unwrap());

/// Capability consumed by the finder: store content under an id, then ask
/// for the nearest neighbours of other content.
pub trait SimilarityIndex: Send + Sync {
    fn insert(&self, id: &str, content: &str) -> DuploResult<()>;

    /// Up to `top_k` `(id, score)` pairs with `score >= min_score`, best first.
    fn query(&self, content: &str, top_k: usize, min_score: f64) -> DuploResult<Vec<(String, f64)>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn term_frequencies(content: &str) -> HashMap<String, f64> {
    let mut tf: HashMap<String, f64> = HashMap::new();
    for m in TOKEN_RE.find_iter(content) {
        *tf.entry(m.as_str().to_lowercase()).or_insert(0.0) += 1.0;
    }
    tf
}

fn norm(tf: &HashMap<String, f64>) -> f64 {
    tf.values().map(|w| w * w).sum::<f64>().sqrt()
}

/// Whitespace-insensitive fingerprint; identical fingerprints score exactly 1.0.
fn fingerprint(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(collapsed.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Entry {
    norm: f64,
    fingerprint: String,
}

#[derive(Default)]
struct Inner {
    entries: IndexMap<String, Entry>,
    postings: HashMap<String, Vec<(usize, f64)>>,
}

#[derive(Default)]
pub struct TokenIndex {
    inner: RwLock<Inner>,
}

impl TokenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cosine similarity of two snippets, outside of any index.
    pub fn score(a: &str, b: &str) -> f64 {
        if fingerprint(a) == fingerprint(b) {
            return 1.0;
        }
        let (ta, tb) = (term_frequencies(a), term_frequencies(b));
        let denom = norm(&ta) * norm(&tb);
        if denom == 0.0 {
            return 0.0;
        }
        let dot: f64 = ta
            .iter()
            .filter_map(|(token, w)| tb.get(token).map(|v| w * v))
            .sum();
        (dot / denom).min(1.0)
    }
}

impl SimilarityIndex for TokenIndex {
    fn insert(&self, id: &str, content: &str) -> DuploResult<()> {
        let tf = term_frequencies(content);
        let mut inner = self.inner.write();
        if inner.entries.contains_key(id) {
            // Postings reference entries by position; re-inserting an id
            // keeps the first content.
            return Ok(());
        }
        let slot = inner.entries.len();
        inner.entries.insert(
            id.to_string(),
            Entry {
                norm: norm(&tf),
                fingerprint: fingerprint(content),
            },
        );
        for (token, weight) in tf {
            inner.postings.entry(token).or_default().push((slot, weight));
        }
        Ok(())
    }

    fn query(&self, content: &str, top_k: usize, min_score: f64) -> DuploResult<Vec<(String, f64)>> {
        let tf = term_frequencies(content);
        let query_norm = norm(&tf);
        if query_norm == 0.0 || top_k == 0 {
            return Ok(vec![]);
        }
        let query_fp = fingerprint(content);

        let inner = self.inner.read();
        let mut dots: HashMap<usize, f64> = HashMap::new();
        for (token, weight) in &tf {
            if let Some(posting) = inner.postings.get(token) {
                for (slot, w) in posting {
                    *dots.entry(*slot).or_insert(0.0) += weight * w;
                }
            }
        }

        let mut scored: Vec<(String, f64)> = dots
            .into_iter()
            .filter_map(|(slot, dot)| {
                let (id, entry) = inner.entries.get_index(slot)?;
                let score = if entry.fingerprint == query_fp {
                    1.0
                } else if entry.norm == 0.0 {
                    0.0
                } else {
                    (dot / (entry.norm * query_norm)).min(1.0)
                };
                (score >= min_score).then(|| (id.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.inner.read().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARSE_A: &str = "def parse_user(raw):\n    data = json.loads(raw)\n    return User(data['name'], data['email'])\n";
    const PARSE_B: &str = "def parse_user(raw):\n    data = json.loads(raw)\n    return User(data['name'], data['mail'])\n";
    const UNRELATED: &str = "fn render(frame: &mut Frame) {\n    frame.clear();\n}\n";

    #[test]
    fn test_identical_content_scores_exactly_one() {
        let index = TokenIndex::new();
        index.insert("a", PARSE_A).unwrap();
        let spaced = PARSE_A.replace("    ", "        ");
        let hits = index.query(&spaced, 5, 0.0).unwrap();
        assert_eq!(hits, vec![("a".to_string(), 1.0)]);
    }

    #[test]
    fn test_near_duplicates_rank_above_unrelated() {
        let index = TokenIndex::new();
        index.insert("b", PARSE_B).unwrap();
        index.insert("u", UNRELATED).unwrap();
        let hits = index.query(PARSE_A, 5, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "b");
        assert!(hits[0].1 > 0.9 && hits[0].1 < 1.0);
    }

    #[test]
    fn test_top_k_and_min_score_are_respected() {
        let index = TokenIndex::new();
        for i in 0..5 {
            index.insert(&format!("copy{i}"), PARSE_A).unwrap();
        }
        assert_eq!(index.len(), 5);
        let hits = index.query(PARSE_A, 3, 0.5).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, "copy0");
        assert!(index.query(UNRELATED, 3, 0.5).unwrap().is_empty());
    }

    #[test]
    fn test_empty_content_has_no_neighbours() {
        let index = TokenIndex::new();
        index.insert("a", PARSE_A).unwrap();
        assert!(index.query("   ", 5, 0.0).unwrap().is_empty());
        assert_eq!(TokenIndex::score("", PARSE_A), 0.0);
    }

    #[test]
    fn test_reinsert_keeps_first_content() {
        let index = TokenIndex::new();
        index.insert("a", PARSE_A).unwrap();
        index.insert("a", UNRELATED).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.query(UNRELATED, 5, 0.5).unwrap().is_empty());
    }
}
