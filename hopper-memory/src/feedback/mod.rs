//! Feedback memory: user verdicts on routing decisions
//!
//! Feedback is keyed 1-1 with tasks and saved as an upsert: a second save
//! updates the existing record in place, last write wins per field. Each
//! save propagates to the task's latest episode.

mod analytics;
mod store;

pub use analytics::{FeedbackAnalytics, FeedbackSummary, InstanceAccuracy};
pub use store::{FeedbackInput, FeedbackStore};
