//! TF-IDF + Jaccard similarity engine
//!
//! A small inverted corpus: per-document term frequencies, a document
//! frequency counter, and per-document tag sets. Document TF-IDF vectors
//! are computed lazily at query time so inserts never trigger reindexing.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[a-z][a-z0-9_-]*\b").expect("static token pattern"))
}

/// Stop words removed by the tokenizer
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "this", "that", "these", "those", "it", "its", "i", "me", "my", "we", "us", "our", "you",
    "your", "he", "him", "his", "she", "her", "they", "them", "their", "what", "which", "who",
    "whom", "when", "where", "why", "how", "all", "each", "every", "both", "few", "more", "most",
    "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too",
    "very", "just", "also", "now", "here", "there", "then", "once", "if", "else", "any", "into",
    "out", "up", "down", "over", "under", "again", "further", "about", "through",
];

/// One scored corpus document
#[derive(Debug, Clone)]
pub struct SimilarityResult {
    /// Document (task) id
    pub task_id: String,
    /// Blended score
    pub score: f64,
    /// Cosine over TF-IDF vectors
    pub text_score: f64,
    /// Jaccard over tag sets
    pub tag_score: f64,
}

#[derive(Debug, Clone)]
struct Document {
    term_freq: HashMap<String, f64>,
    tags: HashSet<String>,
    created_at: DateTime<Utc>,
}

/// Lexical similarity over an in-memory corpus
///
/// The corpus is bounded: at most `max_corpus` documents, none older than
/// `max_age_days`. Evictions decrement the document-frequency counter so
/// IDF stays consistent.
#[derive(Debug, Clone)]
pub struct TaskSimilarity {
    text_weight: f64,
    tag_weight: f64,
    min_token_length: usize,
    max_corpus: usize,
    max_age_days: i64,
    doc_count: usize,
    doc_freq: HashMap<String, usize>,
    documents: HashMap<String, Document>,
}

impl Default for TaskSimilarity {
    fn default() -> Self {
        Self::new(0.6, 0.4)
    }
}

impl TaskSimilarity {
    /// Create with text/tag blend weights (which should sum to 1)
    #[must_use]
    pub fn new(text_weight: f64, tag_weight: f64) -> Self {
        Self {
            text_weight,
            tag_weight,
            min_token_length: 2,
            max_corpus: 10_000,
            max_age_days: 90,
            doc_count: 0,
            doc_freq: HashMap::new(),
            documents: HashMap::new(),
        }
    }

    /// Set the corpus bounds
    #[must_use]
    pub const fn with_bounds(mut self, max_corpus: usize, max_age_days: i64) -> Self {
        self.max_corpus = max_corpus;
        self.max_age_days = max_age_days;
        self
    }

    /// Text weight in the blended score
    #[must_use]
    pub const fn text_weight(&self) -> f64 {
        self.text_weight
    }

    /// Tag weight in the blended score
    #[must_use]
    pub const fn tag_weight(&self) -> f64 {
        self.tag_weight
    }

    /// Lowercase, extract `[a-z][a-z0-9_-]*` tokens of at least
    /// `min_token_length` chars, drop stop words.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        token_pattern()
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .filter(|t| t.len() >= self.min_token_length && !STOP_WORDS.contains(&t.as_str()))
            .collect()
    }

    /// Sublinear term frequency: `1 + ln(count)`
    fn compute_tf(tokens: &[String]) -> HashMap<String, f64> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for token in tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .map(|(term, count)| {
                #[allow(clippy::cast_precision_loss)]
                let tf = 1.0 + (count as f64).ln();
                (term.to_string(), tf)
            })
            .collect()
    }

    /// Inverse document frequency: `ln(N / df)`, zero when unseen
    #[must_use]
    pub fn compute_idf(&self, term: &str) -> f64 {
        if self.doc_count == 0 {
            return 0.0;
        }
        match self.doc_freq.get(term) {
            #[allow(clippy::cast_precision_loss)]
            Some(&df) if df > 0 => (self.doc_count as f64 / df as f64).ln(),
            _ => 0.0,
        }
    }

    fn compute_tfidf(&self, tokens: &[String]) -> HashMap<String, f64> {
        Self::compute_tf(tokens)
            .into_iter()
            .map(|(term, tf)| {
                let idf = self.compute_idf(&term);
                (term, tf * idf)
            })
            .collect()
    }

    /// Cosine similarity restricted to common terms
    #[must_use]
    pub fn cosine_similarity(vec1: &HashMap<String, f64>, vec2: &HashMap<String, f64>) -> f64 {
        if vec1.is_empty() || vec2.is_empty() {
            return 0.0;
        }

        let dot: f64 = vec1
            .iter()
            .filter_map(|(term, v1)| vec2.get(term).map(|v2| v1 * v2))
            .sum();
        if dot == 0.0 {
            return 0.0;
        }

        let mag1 = vec1.values().map(|v| v * v).sum::<f64>().sqrt();
        let mag2 = vec2.values().map(|v| v * v).sum::<f64>().sqrt();
        if mag1 == 0.0 || mag2 == 0.0 {
            return 0.0;
        }

        dot / (mag1 * mag2)
    }

    /// Jaccard similarity over tag sets
    #[must_use]
    pub fn jaccard_similarity(set1: &HashSet<String>, set2: &HashSet<String>) -> f64 {
        if set1.is_empty() || set2.is_empty() {
            return 0.0;
        }
        let intersection = set1.intersection(set2).count();
        let union = set1.union(set2).count();
        if union == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            intersection as f64 / union as f64
        }
    }

    /// Add (or replace) a document. Evicts the oldest document when the
    /// corpus cap is exceeded.
    pub fn add_document(
        &mut self,
        task_id: &str,
        text: &str,
        tags: &[String],
        created_at: DateTime<Utc>,
    ) {
        // Replacing an existing doc must not double-count its terms.
        self.remove_document(task_id);

        let tokens = self.tokenize(text);
        let unique: HashSet<&String> = tokens.iter().collect();
        for term in unique {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.doc_count += 1;

        self.documents.insert(
            task_id.to_string(),
            Document {
                term_freq: Self::compute_tf(&tokens),
                tags: tags.iter().cloned().collect(),
                created_at,
            },
        );

        while self.documents.len() > self.max_corpus {
            let oldest = self
                .documents
                .iter()
                .min_by(|a, b| {
                    a.1.created_at
                        .cmp(&b.1.created_at)
                        .then_with(|| a.0.cmp(b.0))
                })
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.remove_document(&id);
                }
                None => break,
            }
        }
    }

    /// Remove a document; returns whether it was present.
    ///
    /// Document frequencies are decremented so IDF reflects the remaining
    /// corpus.
    pub fn remove_document(&mut self, task_id: &str) -> bool {
        let Some(doc) = self.documents.remove(task_id) else {
            return false;
        };

        for term in doc.term_freq.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        self.doc_count = self.doc_count.saturating_sub(1);
        true
    }

    /// Drop documents older than the age bound; returns how many
    pub fn prune_aged(&mut self) -> usize {
        let cutoff = Utc::now() - Duration::days(self.max_age_days);
        let aged: Vec<String> = self
            .documents
            .iter()
            .filter(|(_, doc)| doc.created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &aged {
            self.remove_document(id);
        }
        aged.len()
    }

    /// Rank corpus documents against a query.
    ///
    /// Ordering is stable: score descending, then creation time descending,
    /// then id ascending.
    #[must_use]
    pub fn find_similar(
        &self,
        text: &str,
        tags: &[String],
        limit: usize,
        min_score: f64,
        exclude_ids: &HashSet<String>,
    ) -> Vec<SimilarityResult> {
        let query_tokens = self.tokenize(text);
        let query_tfidf = self.compute_tfidf(&query_tokens);
        let query_tags: HashSet<String> = tags.iter().cloned().collect();

        let mut results: Vec<(SimilarityResult, DateTime<Utc>)> = Vec::new();

        for (task_id, doc) in &self.documents {
            if exclude_ids.contains(task_id) {
                continue;
            }

            let doc_tfidf: HashMap<String, f64> = doc
                .term_freq
                .iter()
                .map(|(term, tf)| (term.clone(), tf * self.compute_idf(term)))
                .collect();

            let text_score = Self::cosine_similarity(&query_tfidf, &doc_tfidf);
            let tag_score = Self::jaccard_similarity(&query_tags, &doc.tags);
            let score = self.text_weight * text_score + self.tag_weight * tag_score;

            if score >= min_score {
                results.push((
                    SimilarityResult {
                        task_id: task_id.clone(),
                        score,
                        text_score,
                        tag_score,
                    },
                    doc.created_at,
                ));
            }
        }

        results.sort_by(|(a, a_created), (b, b_created)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_created.cmp(a_created))
                .then_with(|| a.task_id.cmp(&b.task_id))
        });

        results
            .into_iter()
            .take(limit)
            .map(|(result, _)| result)
            .collect()
    }

    /// Number of documents in the corpus
    #[must_use]
    pub const fn corpus_size(&self) -> usize {
        self.doc_count
    }

    /// Number of distinct terms across the corpus
    #[must_use]
    pub fn unique_terms(&self) -> usize {
        self.doc_freq.len()
    }

    /// Drop the whole corpus
    pub fn clear(&mut self) {
        self.doc_count = 0;
        self.doc_freq.clear();
        self.documents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_tags() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn tokenizer_rules() {
        let sim = TaskSimilarity::default();
        let tokens = sim.tokenize("Implement the OAuth2 login-flow for api_v2!");
        assert_eq!(tokens, vec!["implement", "oauth2", "login-flow", "api_v2"]);

        // leading digits never start a token
        let tokens = sim.tokenize("42 errors in 2fa setup");
        assert_eq!(tokens, vec!["errors", "setup"]);
    }

    #[test]
    fn stop_words_are_dropped() {
        let sim = TaskSimilarity::default();
        let tokens = sim.tokenize("the quick fix for the build");
        assert_eq!(tokens, vec!["quick", "fix", "build"]);
    }

    #[test]
    fn idf_zero_for_unseen_terms() {
        let mut sim = TaskSimilarity::default();
        assert!((sim.compute_idf("anything")).abs() < f64::EPSILON);

        sim.add_document("d1", "alpha beta", &no_tags(), Utc::now());
        sim.add_document("d2", "alpha gamma", &no_tags(), Utc::now());

        // "alpha" appears everywhere: ln(2/2) = 0
        assert!(sim.compute_idf("alpha").abs() < f64::EPSILON);
        // "beta" appears once: ln(2/1) > 0
        assert!(sim.compute_idf("beta") > 0.0);
    }

    #[test]
    fn recall_ranks_shared_terms() {
        let mut sim = TaskSimilarity::default();
        sim.add_document("d1", "implement login", &no_tags(), Utc::now());
        sim.add_document("d2", "implement logout", &no_tags(), Utc::now());
        sim.add_document("d3", "database migration", &no_tags(), Utc::now());

        let results = sim.find_similar("login flow", &[], 10, 0.0001, &HashSet::new());
        let ids: Vec<&str> = results.iter().map(|r| r.task_id.as_str()).collect();

        assert_eq!(ids[0], "d1");
        assert!(!ids.contains(&"d3"));
    }

    #[test]
    fn tags_contribute_via_jaccard() {
        let mut sim = TaskSimilarity::default();
        let api_tags = vec!["api".to_string(), "python".to_string()];
        let db_tags = vec!["database".to_string()];
        sim.add_document("api-task", "work item", &api_tags, Utc::now());
        sim.add_document("db-task", "work item", &db_tags, Utc::now());

        let results = sim.find_similar(
            "work item",
            &["api".to_string(), "python".to_string()],
            10,
            0.0,
            &HashSet::new(),
        );

        assert_eq!(results[0].task_id, "api-task");
        assert!((results[0].tag_score - 1.0).abs() < 1e-9);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn remove_decrements_document_frequency() {
        let mut sim = TaskSimilarity::default();
        sim.add_document("d1", "alpha beta", &no_tags(), Utc::now());
        sim.add_document("d2", "alpha", &no_tags(), Utc::now());

        assert!(sim.remove_document("d1"));
        assert!(!sim.remove_document("d1"));
        assert_eq!(sim.corpus_size(), 1);
        // "beta" left with d1
        assert!(sim.compute_idf("beta").abs() < f64::EPSILON);
    }

    #[test]
    fn corpus_cap_evicts_oldest() {
        let mut sim = TaskSimilarity::default().with_bounds(2, 90);
        let now = Utc::now();
        sim.add_document("old", "first doc", &no_tags(), now - Duration::hours(2));
        sim.add_document("mid", "second doc", &no_tags(), now - Duration::hours(1));
        sim.add_document("new", "third doc", &no_tags(), now);

        assert_eq!(sim.corpus_size(), 2);
        assert!(sim
            .find_similar("first", &[], 10, 0.0001, &HashSet::new())
            .is_empty());
    }

    #[test]
    fn ties_break_on_recency_then_id() {
        let mut sim = TaskSimilarity::default();
        let now = Utc::now();
        sim.add_document("b", "identical text", &no_tags(), now);
        sim.add_document("a", "identical text", &no_tags(), now);
        sim.add_document("older", "identical text", &no_tags(), now - Duration::hours(1));

        let results = sim.find_similar("identical text", &[], 10, 0.0, &HashSet::new());
        let ids: Vec<&str> = results.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "older"]);
    }
}
