//! Events published by a session for the presentation layer.

use crate::logs::GameLog;
use crate::memory::MemoryInsight;
use crate::session::GameStatus;
use serde::Serialize;

/// Moments where a presentation layer would play a sound effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundCue {
    /// An attempt started; the adventurer is thinking.
    Thinking,
    /// The gatekeeper answered.
    Feedback,
    /// The gate opened.
    Success,
    /// The adventurer is reflecting on a failure.
    Reflection,
}

/// A change to session state, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum SessionEvent {
    StatusChanged(GameStatus),
    Log(GameLog),
    Insight(MemoryInsight),
    /// New transient dialogue, or `None` when it was cleared.
    Dialogue(Option<String>),
    Cue(SoundCue),
    Reset { npc_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = SessionEvent::StatusChanged(GameStatus::ThinkingAction);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "statusChanged", "data": "THINKING_ACTION"})
        );

        let event = SessionEvent::Cue(SoundCue::Success);
        assert_eq!(serde_json::to_value(&event).unwrap()["data"], "success");
    }
}
