//! Append-only game log shown to the player.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub Uuid);

impl LogId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// What the adventurer said.
    Action,
    /// What the gatekeeper answered.
    Feedback,
    /// The insight learned from a failure.
    Reflection,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub id: LogId,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub content: String,
    /// The episode the attempt started in.
    pub episode: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameLogs {
    entries: Vec<GameLog>,
}

impl GameLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return a copy of it.
    pub fn push(&mut self, kind: LogKind, content: impl Into<String>, episode: u32) -> GameLog {
        let entry = GameLog {
            id: LogId::new(),
            kind,
            content: content.into(),
            episode,
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[GameLog] {
        &self.entries
    }

    pub fn last(&self) -> Option<&GameLog> {
        self.entries.last()
    }

    /// Entries of one kind, oldest first.
    pub fn of_kind(&self, kind: LogKind) -> impl Iterator<Item = &GameLog> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_filter() {
        let mut logs = GameLogs::new();
        logs.push(LogKind::System, ">>> ATTEMPT 1 INITIATED [AUTO MODE]", 1);
        logs.push(LogKind::Action, "Hello?", 1);
        logs.push(LogKind::Feedback, "No.", 1);

        assert_eq!(logs.len(), 3);
        assert_eq!(logs.of_kind(LogKind::Action).count(), 1);
        assert_eq!(logs.last().unwrap().content, "No.");
    }

    #[test]
    fn test_wire_shape() {
        let mut logs = GameLogs::new();
        let entry = logs.push(LogKind::Reflection, "Be polite", 3);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "reflection");
        assert_eq!(value["episode"], 3);
        assert_eq!(value["content"], "Be polite");
    }
}
