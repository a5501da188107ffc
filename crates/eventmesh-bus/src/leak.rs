//! Listener accumulation reports.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Fan-out of one exact topic at the time of a leak check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicFanOut {
    /// The exact topic.
    pub topic: String,
    /// Listeners registered on it.
    pub listeners: usize,
    /// When the oldest of those listeners was attached.
    pub oldest_registration: DateTime<Utc>,
}

/// Result of one leak-check pass. Purely informational.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    /// Number of exact topics inspected.
    pub checked_topics: usize,
    /// Topics above the configured listener threshold.
    pub over_threshold: Vec<TopicFanOut>,
    /// Long-lived topics with a large fan-out.
    pub stale_fan_out: Vec<TopicFanOut>,
}

impl LeakReport {
    /// Returns whether nothing suspicious was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.over_threshold.is_empty() && self.stale_fan_out.is_empty()
    }
}
