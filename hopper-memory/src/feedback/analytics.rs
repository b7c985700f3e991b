//! Feedback analytics
//!
//! Aggregates feedback into routing-accuracy views used by operators to
//! judge how well the router is doing and where it misroutes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use hopper_core::Result;

use crate::episodic::EpisodicStore;

use super::store::FeedbackStore;

/// Routing accuracy for one target instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceAccuracy {
    /// Instance the tasks were routed to
    pub instance_id: String,
    /// Feedback records covering this instance
    pub total: usize,
    /// Judged good matches
    pub good_matches: usize,
    /// good / total
    pub accuracy: f64,
}

/// Aggregate feedback summary
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackSummary {
    /// Feedback records counted
    pub total_feedback: usize,
    /// Judged good matches
    pub good_matches: usize,
    /// Judged misroutes
    pub misroutes: usize,
    /// good / (good + misroutes)
    pub routing_accuracy: f64,
    /// Mean quality score where given
    pub average_quality: Option<f64>,
    /// Share of tasks that needed rework
    pub rework_rate: f64,
    /// Accuracy per routed-to instance, worst first
    pub by_instance: Vec<InstanceAccuracy>,
}

/// Read-side analytics over feedback and episodes
pub struct FeedbackAnalytics {
    feedback: Arc<FeedbackStore>,
    episodic: Arc<dyn EpisodicStore>,
}

impl FeedbackAnalytics {
    /// Create over the two stores
    #[must_use]
    pub fn new(feedback: Arc<FeedbackStore>, episodic: Arc<dyn EpisodicStore>) -> Self {
        Self { feedback, episodic }
    }

    /// Build the aggregate summary
    pub async fn summary(&self) -> Result<FeedbackSummary> {
        let records = self.feedback.all(usize::MAX, None);

        let total = records.len();
        let good = records
            .iter()
            .filter(|f| f.was_good_match == Some(true))
            .count();
        let bad = records
            .iter()
            .filter(|f| f.was_good_match == Some(false))
            .count();

        let judged = good + bad;
        #[allow(clippy::cast_precision_loss)]
        let routing_accuracy = if judged > 0 {
            good as f64 / judged as f64
        } else {
            0.0
        };

        let quality: Vec<f64> = records.iter().filter_map(|f| f.quality_score).collect();
        #[allow(clippy::cast_precision_loss)]
        let average_quality = if quality.is_empty() {
            None
        } else {
            Some(quality.iter().sum::<f64>() / quality.len() as f64)
        };

        let reworked = records
            .iter()
            .filter(|f| f.required_rework == Some(true))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let rework_rate = if total > 0 {
            reworked as f64 / total as f64
        } else {
            0.0
        };

        // Resolve each judged task to the instance its latest episode chose.
        let mut per_instance: HashMap<String, (usize, usize)> = HashMap::new();
        for record in &records {
            let Some(verdict) = record.was_good_match else {
                continue;
            };
            let Some(episode) = self.episodic.latest_for_task(&record.task_id).await? else {
                continue;
            };
            let entry = per_instance
                .entry(episode.chosen_instance.clone())
                .or_insert((0, 0));
            entry.0 += 1;
            if verdict {
                entry.1 += 1;
            }
        }

        let mut by_instance: Vec<InstanceAccuracy> = per_instance
            .into_iter()
            .map(|(instance_id, (total, good_matches))| {
                #[allow(clippy::cast_precision_loss)]
                let accuracy = if total > 0 {
                    good_matches as f64 / total as f64
                } else {
                    0.0
                };
                InstanceAccuracy {
                    instance_id,
                    total,
                    good_matches,
                    accuracy,
                }
            })
            .collect();
        by_instance.sort_by(|a, b| {
            a.accuracy
                .partial_cmp(&b.accuracy)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });

        Ok(FeedbackSummary {
            total_feedback: total,
            good_matches: good,
            misroutes: bad,
            routing_accuracy,
            average_quality,
            rework_rate,
            by_instance,
        })
    }
}
