//! Memory bank of insights learned from failed attempts.
//!
//! Insights are appended once per failed attempt and read back oldest first,
//! so the action prompt sees the adventurer's learning in chronological order.
//! Nothing is deduplicated or pruned within a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InsightId(pub Uuid);

impl InsightId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InsightId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InsightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A rule distilled from one failure. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInsight {
    pub id: InsightId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryInsight {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: InsightId::new(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Ordered, append-only collection of insights.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    insights: Vec<MemoryInsight>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, insight: MemoryInsight) {
        self.insights.push(insight);
    }

    /// All insights, oldest first.
    pub fn all(&self) -> &[MemoryInsight] {
        &self.insights
    }

    /// Insight texts, oldest first, ready for the action prompt.
    pub fn texts(&self) -> Vec<String> {
        self.insights.iter().map(|i| i.text.clone()).collect()
    }

    pub fn latest(&self) -> Option<&MemoryInsight> {
        self.insights.last()
    }

    pub fn len(&self) -> usize {
        self.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }

    /// Forget everything. Only a session reset does this.
    pub(crate) fn clear(&mut self) {
        self.insights.clear();
    }
}
