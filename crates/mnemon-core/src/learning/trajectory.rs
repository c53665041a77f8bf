//! Trajectories
//!
//! A trajectory records one query's retrieved entries and scores so later
//! feedback can adapt the learners. Feedback closes a trajectory exactly
//! once; duplicates are benign no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of one query's retrieval, awaiting feedback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    /// Unique trajectory id (UUID v4)
    pub id: String,
    /// The query text as asked
    pub query_text: String,
    /// Entry ids returned, rank order
    pub matched_entry_ids: Vec<String>,
    /// Score of each returned entry, aligned with `matched_entry_ids`
    pub match_scores: Vec<f64>,
    /// Query embedding, if retained for later analysis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Route the query was answered on
    pub route: String,
    /// When the trajectory was opened
    pub created_at: DateTime<Utc>,
    /// Quality feedback, once provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<f64>,
}

impl Trajectory {
    /// Open a trajectory for a completed query
    pub fn open(
        query_text: impl Into<String>,
        matched_entry_ids: Vec<String>,
        match_scores: Vec<f64>,
        route: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query_text: query_text.into(),
            matched_entry_ids,
            match_scores,
            embedding: None,
            route: route.into(),
            created_at: Utc::now(),
            feedback: None,
        }
    }

    /// True once feedback has been recorded
    pub fn is_closed(&self) -> bool {
        self.feedback.is_some()
    }

    /// (entry_id, score) pairs in rank order
    pub fn scored_matches(&self) -> impl Iterator<Item = (&str, f64)> {
        self.matched_entry_ids
            .iter()
            .map(|s| s.as_str())
            .zip(self.match_scores.iter().copied())
    }
}
