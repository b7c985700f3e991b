//! Lexical similarity search over the task corpus
//!
//! TF-IDF cosine over text blended with Jaccard over tag sets. Purely
//! lexical by design; there are no embeddings here.

mod searcher;
mod similarity;

pub use searcher::{SearchResult, SearcherStatistics, TaskSearcher};
pub use similarity::{SimilarityResult, TaskSimilarity};
