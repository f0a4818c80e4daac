//! Keyword index with BM25-lite scoring. Deterministic and fast.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tokenize text into searchable tokens (deterministic).
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .filter(|s| s.len() >= 2)
        .map(String::from)
        .collect()
}

/// Inverted index entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PostingList {
    doc_ids: Vec<String>,
    /// Term frequency per document, parallel to `doc_ids`.
    term_freqs: Vec<u32>,
}

/// Inverted index over candidate passages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordIndex {
    index: HashMap<String, PostingList>,
    doc_lengths: HashMap<String, u32>,
    avg_doc_length: f64,
    doc_count: u32,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document. Re-adding an id updates it in place.
    pub fn add_document(&mut self, doc_id: &str, text: &str) {
        let tokens = tokenize(text);
        let doc_length = tokens.len() as u32;

        self.doc_lengths.insert(doc_id.to_string(), doc_length);
        self.doc_count = self.doc_lengths.len() as u32;

        let total_len: u32 = self.doc_lengths.values().sum();
        self.avg_doc_length = if self.doc_count > 0 {
            total_len as f64 / self.doc_count as f64
        } else {
            0.0
        };

        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *term_counts.entry(token).or_insert(0) += 1;
        }

        for (token, freq) in term_counts {
            let posting = self.index.entry(token).or_default();
            if let Some(pos) = posting.doc_ids.iter().position(|id| id == doc_id) {
                posting.term_freqs[pos] = freq;
            } else {
                posting.doc_ids.push(doc_id.to_string());
                posting.term_freqs.push(freq);
            }
        }
    }

    /// Raw BM25-lite scores for every document matching the query.
    /// Unordered; the hybrid scorer normalizes and combines.
    pub fn scores(&self, query: &str) -> HashMap<String, f64> {
        let query_tokens = tokenize(query);
        let mut scores: HashMap<String, f64> = HashMap::new();
        if query_tokens.is_empty() {
            return scores;
        }

        for token in &query_tokens {
            if let Some(posting) = self.index.get(token) {
                // IDF: ln((N - n + 0.5) / (n + 0.5) + 1)
                let n = posting.doc_ids.len() as f64;
                let idf = ((self.doc_count as f64 - n + 0.5) / (n + 0.5) + 1.0).ln();

                for (doc_id, &tf) in posting.doc_ids.iter().zip(posting.term_freqs.iter()) {
                    let doc_len = *self.doc_lengths.get(doc_id).unwrap_or(&1) as f64;

                    const K1: f64 = 1.2;
                    const B: f64 = 0.75;

                    let norm = 1.0 - B + B * (doc_len / self.avg_doc_length.max(1.0));
                    let tf = tf as f64;
                    let tf_score = (tf * (K1 + 1.0)) / (tf + K1 * norm);
                    *scores.entry(doc_id.clone()).or_insert(0.0) += idf * tf_score;
                }
            }
        }
        scores
    }

    /// Search and return scored ids, score descending then id ascending.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        let mut results: Vec<(String, f64)> = self.scores(query).into_iter().collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(limit);
        results
    }

    pub fn len(&self) -> usize {
        self.doc_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }
}
