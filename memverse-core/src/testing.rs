//! Testing utilities for the game.
//!
//! This module provides tools for integration testing:
//! - `MockGateway` for deterministic sessions without API calls
//! - `TestHarness` for scripted scenarios
//! - Assertion helpers for verifying snapshots

use crate::config::GameConfig;
use crate::gateway::{GatewayError, ModelGateway, FALLBACK_ACTION, FALLBACK_REFLECTION};
use crate::logs::LogKind;
use crate::npc::Voice;
use crate::rules::Verdict;
use crate::session::{AttemptOutcome, GameSession, GameStatus, SessionSnapshot};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// One call made to a [`MockGateway`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Action {
        observation: String,
        memories: Vec<String>,
    },
    Reflection {
        action: String,
        feedback: String,
    },
    NpcResponse {
        instruction: String,
        utterance: String,
    },
    Speak {
        text: String,
        voice: Voice,
    },
}

/// Holds a gateway call open until released.
///
/// The test waits for the call to arrive, does something else (a reset,
/// say), then lets the call return.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    /// Wait until the held call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call return.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct Script {
    actions: VecDeque<Result<String, String>>,
    reflections: VecDeque<Result<String, String>>,
    verdicts: VecDeque<Result<Verdict, String>>,
    calls: Vec<MockCall>,
    reflection_gate: Option<Gate>,
}

/// A gateway that returns scripted results.
///
/// Empty queues fall back to "Hello?", "I failed." and an unprocessable
/// rejection, the same fallbacks the live gateway uses.
#[derive(Default)]
pub struct MockGateway {
    script: Mutex<Script>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queue_action(&self, text: impl Into<String>) -> &Self {
        self.script().actions.push_back(Ok(text.into()));
        self
    }

    pub fn queue_reflection(&self, text: impl Into<String>) -> &Self {
        self.script().reflections.push_back(Ok(text.into()));
        self
    }

    pub fn queue_verdict(&self, verdict: Verdict) -> &Self {
        self.script().verdicts.push_back(Ok(verdict));
        self
    }

    /// The next action call fails.
    pub fn fail_action(&self, message: impl Into<String>) -> &Self {
        self.script().actions.push_back(Err(message.into()));
        self
    }

    /// The next reflection call fails.
    pub fn fail_reflection(&self, message: impl Into<String>) -> &Self {
        self.script().reflections.push_back(Err(message.into()));
        self
    }

    /// The next delegated verdict fails.
    pub fn fail_verdict(&self, message: impl Into<String>) -> &Self {
        self.script().verdicts.push_back(Err(message.into()));
        self
    }

    /// Hold the next reflection call open until the returned gate is released.
    pub fn hold_reflection(&self) -> Gate {
        let gate = Gate::default();
        self.script().reflection_gate = Some(gate.clone());
        gate
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<MockCall> {
        self.script().calls.clone()
    }

    /// Lines passed to `speak`, oldest first.
    pub fn spoken(&self) -> Vec<(String, Voice)> {
        self.script()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Speak { text, voice } => Some((text.clone(), *voice)),
                _ => None,
            })
            .collect()
    }

    /// Memories handed to each action call, oldest first.
    pub fn action_memories(&self) -> Vec<Vec<String>> {
        self.script()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Action { memories, .. } => Some(memories.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        self.script().calls.push(call);
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn generate_action(
        &self,
        observation: &str,
        memories: &[String],
    ) -> Result<String, GatewayError> {
        self.record(MockCall::Action {
            observation: observation.to_string(),
            memories: memories.to_vec(),
        });
        let next = self.script().actions.pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(GatewayError::Unavailable(message)),
            None => Ok(FALLBACK_ACTION.to_string()),
        }
    }

    async fn generate_reflection(
        &self,
        action: &str,
        feedback: &str,
    ) -> Result<String, GatewayError> {
        self.record(MockCall::Reflection {
            action: action.to_string(),
            feedback: feedback.to_string(),
        });
        let gate = self.script().reflection_gate.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let next = self.script().reflections.pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(GatewayError::Unavailable(message)),
            None => Ok(FALLBACK_REFLECTION.to_string()),
        }
    }

    async fn generate_npc_response(
        &self,
        instruction: &str,
        utterance: &str,
    ) -> Result<Verdict, GatewayError> {
        self.record(MockCall::NpcResponse {
            instruction: instruction.to_string(),
            utterance: utterance.to_string(),
        });
        let next = self.script().verdicts.pop_front();
        match next {
            Some(Ok(verdict)) => Ok(verdict),
            Some(Err(message)) => Err(GatewayError::Unavailable(message)),
            None => Ok(Verdict::unprocessable()),
        }
    }

    async fn speak(&self, text: &str, voice: Voice) {
        self.record(MockCall::Speak {
            text: text.to_string(),
            voice,
        });
    }
}

/// Test harness for running game scenarios.
pub struct TestHarness {
    /// The mock gateway the session talks to.
    pub gateway: Arc<MockGateway>,
    /// The session under test.
    pub session: GameSession,
}

impl TestHarness {
    /// A session facing the Sage with pattern rules.
    pub fn new() -> Self {
        Self::with_config(GameConfig::default())
    }

    /// A session facing the given catalog gatekeeper.
    ///
    /// # Panics
    ///
    /// Panics if `npc_id` is not in the catalog.
    pub fn with_npc(npc_id: &str) -> Self {
        Self::with_config(GameConfig::default().with_npc(npc_id))
    }

    /// # Panics
    ///
    /// Panics if the config names an unknown gatekeeper.
    pub fn with_config(config: GameConfig) -> Self {
        let gateway = Arc::new(MockGateway::new());
        let session = GameSession::new(config, gateway.clone())
            .unwrap_or_else(|e| panic!("harness config is invalid: {e}"));
        Self { gateway, session }
    }

    /// A manual attempt.
    pub async fn say(&self, text: &str) -> AttemptOutcome {
        self.session.attempt(Some(text)).await
    }

    /// An automated attempt.
    pub async fn auto(&self) -> AttemptOutcome {
        self.session.attempt(None).await
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot().await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// Assertion helpers

#[track_caller]
pub fn assert_status(snapshot: &SessionSnapshot, expected: GameStatus) {
    assert_eq!(
        snapshot.status, expected,
        "Expected status {expected}, got {}",
        snapshot.status
    );
}

#[track_caller]
pub fn assert_episode(snapshot: &SessionSnapshot, expected: u32) {
    assert_eq!(
        snapshot.episode, expected,
        "Expected episode {expected}, got {}",
        snapshot.episode
    );
}

#[track_caller]
pub fn assert_memory_len(snapshot: &SessionSnapshot, expected: usize) {
    assert_eq!(
        snapshot.memories.len(),
        expected,
        "Expected {expected} insights, got {:?}",
        snapshot.memories.iter().map(|m| &m.text).collect::<Vec<_>>()
    );
}

/// Assert the most recent log entry of `kind` has exactly `content`.
#[track_caller]
pub fn assert_last_log(snapshot: &SessionSnapshot, kind: LogKind, content: &str) {
    let last = snapshot.logs.iter().rev().find(|log| log.kind == kind);
    match last {
        Some(log) => assert_eq!(log.content, content, "Unexpected {kind:?} log"),
        None => panic!("No {kind:?} log in {:?}", snapshot.logs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_script() {
        let mock = MockGateway::new();
        mock.queue_action("Greetings").fail_action("offline");

        assert_eq!(mock.generate_action("obs", &[]).await.unwrap(), "Greetings");
        assert!(matches!(
            mock.generate_action("obs", &[]).await,
            Err(GatewayError::Unavailable(_))
        ));
        assert_eq!(mock.generate_action("obs", &[]).await.unwrap(), "Hello?");
        assert_eq!(mock.generate_reflection("a", "f").await.unwrap(), "I failed.");
        assert!(!mock.generate_npc_response("i", "u").await.unwrap().is_pass);

        mock.speak("Begone!", Voice::Kore).await;
        assert_eq!(mock.spoken(), vec![("Begone!".to_string(), Voice::Kore)]);
        assert_eq!(mock.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_harness_manual_attempt() {
        let harness = TestHarness::new();
        let outcome = harness.say("Please, kind sir, I admire your beard").await;
        assert!(matches!(outcome, AttemptOutcome::Granted { .. }));

        let snapshot = harness.snapshot().await;
        assert_status(&snapshot, GameStatus::Success);
        assert_episode(&snapshot, 1);
        assert_memory_len(&snapshot, 0);
    }
}
