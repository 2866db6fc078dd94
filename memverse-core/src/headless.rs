//! Headless game interface for programmatic use.
//!
//! Runs a session without any presentation layer. It's designed for:
//! - Watching the adventurer learn from a terminal
//! - Automated testing against the real API
//! - Script-driven play
//!
//! # Example
//!
//! ```ignore
//! use memverse_core::headless::{HeadlessConfig, HeadlessGame};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut game = HeadlessGame::new(HeadlessConfig::new("guardian"))?;
//!
//!     let status = game.run(10).await;
//!     for entry in game.transcript() {
//!         println!("[{}] {} -> {}", entry.episode, entry.utterance, entry.feedback);
//!     }
//!     println!("{status}");
//!     Ok(())
//! }
//! ```

use crate::config::{EvaluationMode, GameConfig};
use crate::gateway::{GeminiGateway, ModelGateway};
use crate::session::{AttemptOutcome, GameSession, GameStatus, SessionError, SessionSnapshot};
use std::sync::Arc;
use tracing::info;

/// Configuration for a headless game.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Catalog id of the gatekeeper.
    pub npc_id: String,
    pub evaluation: EvaluationMode,
    /// Headless play is silent unless asked otherwise.
    pub speech: bool,
    pub max_episodes: Option<u32>,
}

impl HeadlessConfig {
    pub fn new(npc_id: impl Into<String>) -> Self {
        Self {
            npc_id: npc_id.into(),
            evaluation: EvaluationMode::Patterns,
            speech: false,
            max_episodes: None,
        }
    }

    pub fn with_evaluation(mut self, mode: EvaluationMode) -> Self {
        self.evaluation = mode;
        self
    }

    pub fn with_speech(mut self, speech: bool) -> Self {
        self.speech = speech;
        self
    }

    pub fn with_max_episodes(mut self, max: u32) -> Self {
        self.max_episodes = Some(max);
        self
    }

    /// Layer these settings over a base config.
    fn apply(&self, base: GameConfig) -> GameConfig {
        let config = base
            .with_npc(&self.npc_id)
            .with_evaluation(self.evaluation)
            .with_speech(self.speech);
        match self.max_episodes {
            Some(max) => config.with_max_episodes(max),
            None => config,
        }
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self::new(crate::npc::default_npc().id.clone())
    }
}

/// An entry in the game transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    /// Episode the attempt started in.
    pub episode: u32,
    pub utterance: String,
    pub feedback: String,
    pub passed: bool,
    /// What was learned, for failed attempts.
    pub insight: Option<String>,
}

/// A game that can be controlled programmatically.
pub struct HeadlessGame {
    session: GameSession,
    transcript: Vec<TranscriptEntry>,
}

impl HeadlessGame {
    /// Create a live game from the environment.
    ///
    /// Requires `GEMINI_API_KEY` (or `API_KEY`) to be set.
    pub fn new(config: HeadlessConfig) -> Result<Self, SessionError> {
        let game_config = config.apply(GameConfig::from_env()?);
        let gateway = GeminiGateway::from_config(&game_config)?;
        Self::with_gateway(config, game_config, Arc::new(gateway))
    }

    /// Create a game over any gateway.
    pub fn with_gateway(
        config: HeadlessConfig,
        base: GameConfig,
        gateway: Arc<dyn ModelGateway>,
    ) -> Result<Self, SessionError> {
        let session = GameSession::new(config.apply(base), gateway)?;
        Ok(Self {
            session,
            transcript: Vec::new(),
        })
    }

    /// Say something to the gatekeeper.
    pub async fn send(&mut self, text: &str) -> AttemptOutcome {
        let episode = self.session.episode().await;
        let outcome = self.session.attempt(Some(text)).await;
        self.record(episode, &outcome);
        outcome
    }

    /// Let the adventurer speak for itself.
    pub async fn step(&mut self) -> AttemptOutcome {
        let episode = self.session.episode().await;
        let outcome = self.session.attempt(None).await;
        self.record(episode, &outcome);
        outcome
    }

    /// Auto-play until the session ends or `max_steps` attempts were made.
    ///
    /// Interrupted attempts use up a step but not an episode.
    pub async fn run(&mut self, max_steps: usize) -> GameStatus {
        for _ in 0..max_steps {
            if self.session.status().await.is_terminal() {
                break;
            }
            if let AttemptOutcome::Ignored = self.step().await {
                break;
            }
        }
        let status = self.session.status().await;
        info!(%status, attempts = self.transcript.len(), "headless run finished");
        status
    }

    pub async fn reset(&mut self, npc_id: Option<&str>) {
        self.session.reset(npc_id).await;
        self.transcript.clear();
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot().await
    }

    pub async fn is_over(&self) -> bool {
        self.session.status().await.is_terminal()
    }

    fn record(&mut self, episode: u32, outcome: &AttemptOutcome) {
        let entry = match outcome {
            AttemptOutcome::Granted { utterance, verdict } => TranscriptEntry {
                episode,
                utterance: utterance.clone(),
                feedback: verdict.feedback.clone(),
                passed: true,
                insight: None,
            },
            AttemptOutcome::Rejected {
                utterance,
                verdict,
                insight,
                ..
            } => TranscriptEntry {
                episode,
                utterance: utterance.clone(),
                feedback: verdict.feedback.clone(),
                passed: false,
                insight: Some(insight.text.clone()),
            },
            _ => return,
        };
        self.transcript.push(entry);
    }
}
