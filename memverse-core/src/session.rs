//! GameSession - the episode orchestrator.
//!
//! An attempt runs: obtain an utterance, judge it, record the feedback, and
//! on failure reflect and remember. All mutable state lives in one
//! [`SessionState`] whose transitions are plain synchronous methods, so the
//! state machine can be tested without a gateway. [`GameSession`] drives
//! those transitions around the awaited model calls.
//!
//! The session lock is never held across an await. Every attempt carries an
//! [`AttemptTicket`] holding the generation it started in; a reset bumps the
//! generation, and any write presented with an older ticket is dropped.

use crate::config::{ConfigError, GameConfig};
use crate::events::{SessionEvent, SoundCue};
use crate::gateway::{GatewayError, GeminiGateway, ModelGateway};
use crate::logs::{GameLog, GameLogs, LogKind};
use crate::memory::{MemoryInsight, MemoryStore};
use crate::npc::Npc;
use crate::rules::{self, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

pub const SUCCESS_MESSAGE: &str = "ACCESS GRANTED. MEMORY EVOLUTION COMPLETE.";
pub const CAP_MESSAGE: &str = "MAX ITERATIONS REACHED.";
pub const INTERRUPTED_MESSAGE: &str = "NEURAL LINK INTERRUPTED. RETRYING...";

const EVENT_CAPACITY: usize = 256;

/// Errors from building a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Idle,
    ThinkingAction,
    ThinkingReflection,
    Success,
    Failed,
    Finished,
}

impl GameStatus {
    /// Success and Finished end the session until a reset.
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Success | GameStatus::Finished)
    }

    pub fn is_thinking(self) -> bool {
        matches!(self, GameStatus::ThinkingAction | GameStatus::ThinkingReflection)
    }

    /// Whether a new attempt may start from this status.
    pub fn accepts_attempt(self) -> bool {
        matches!(self, GameStatus::Idle | GameStatus::Failed)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameStatus::Idle => "IDLE",
            GameStatus::ThinkingAction => "THINKING_ACTION",
            GameStatus::ThinkingReflection => "THINKING_REFLECTION",
            GameStatus::Success => "SUCCESS",
            GameStatus::Failed => "FAILED",
            GameStatus::Finished => "FINISHED",
        };
        f.write_str(name)
    }
}

/// Who supplies the utterance for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The model plans the utterance from the observation and memories.
    Auto,
    /// The player typed or spoke it.
    Manual,
}

impl Mode {
    fn label(self) -> &'static str {
        match self {
            Mode::Auto => "AUTO",
            Mode::Manual => "MANUAL",
        }
    }
}

/// What came of one call to [`GameSession::attempt`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Not started: wrong status or empty utterance.
    Ignored,
    /// The gate opened.
    Granted { utterance: String, verdict: Verdict },
    /// The gatekeeper refused and the adventurer learned something.
    Rejected {
        utterance: String,
        verdict: Verdict,
        insight: MemoryInsight,
        /// The episode cap was reached.
        finished: bool,
    },
    /// A model call failed. The attempt did not count.
    Interrupted(String),
    /// The session was reset while the attempt was in flight.
    Superseded,
}

/// Proof that an attempt started, and in which generation and episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTicket {
    generation: u64,
    episode: u32,
    mode: Mode,
}

impl AttemptTicket {
    pub fn episode(&self) -> u32 {
        self.episode
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

#[derive(Debug, Clone)]
struct Dialogue {
    text: String,
    expires_at: Instant,
}

/// How long feedback stays on screen.
pub fn dialogue_duration(text: &str) -> Duration {
    Duration::from_millis(text.chars().count() as u64 * 100 + 2000)
}

/// All mutable state of one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    status: GameStatus,
    episode: u32,
    max_episodes: u32,
    memory: MemoryStore,
    logs: GameLogs,
    npc: Npc,
    dialogue: Option<Dialogue>,
    generation: u64,
    outbox: Vec<SessionEvent>,
}

impl SessionState {
    pub fn new(npc: Npc, max_episodes: u32) -> Self {
        Self {
            status: GameStatus::Idle,
            episode: 1,
            max_episodes,
            memory: MemoryStore::new(),
            logs: GameLogs::new(),
            npc,
            dialogue: None,
            generation: 0,
            outbox: Vec::new(),
        }
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn episode(&self) -> u32 {
        self.episode
    }

    pub fn max_episodes(&self) -> u32 {
        self.max_episodes
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn logs(&self) -> &GameLogs {
        &self.logs
    }

    pub fn npc(&self) -> &Npc {
        &self.npc
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The dialogue still showing at `now`.
    pub fn active_dialogue(&self, now: Instant) -> Option<&str> {
        self.dialogue
            .as_ref()
            .filter(|d| now < d.expires_at)
            .map(|d| d.text.as_str())
    }

    /// Whether writes under this ticket still belong to the session.
    pub fn is_current(&self, ticket: &AttemptTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Events produced since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Start an attempt. `None` if the status does not allow one or a manual
    /// utterance is blank.
    pub fn begin_attempt(&mut self, mode: Mode, utterance: Option<&str>) -> Option<AttemptTicket> {
        if !self.status.accepts_attempt() {
            return None;
        }
        if mode == Mode::Manual && utterance.map_or(true, |u| u.trim().is_empty()) {
            return None;
        }

        let ticket = AttemptTicket {
            generation: self.generation,
            episode: self.episode,
            mode,
        };
        self.set_status(GameStatus::ThinkingAction);
        self.cue(SoundCue::Thinking);
        self.log(
            LogKind::System,
            format!(">>> ATTEMPT {} INITIATED [{} MODE]", ticket.episode, mode.label()),
            ticket.episode,
        );
        Some(ticket)
    }

    /// Record what the adventurer said.
    pub fn record_action(&mut self, ticket: &AttemptTicket, utterance: &str) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.log(LogKind::Action, utterance, ticket.episode);
        true
    }

    /// Record the gatekeeper's answer and show it as transient dialogue.
    pub fn record_feedback(
        &mut self,
        ticket: &AttemptTicket,
        verdict: &Verdict,
        now: Instant,
    ) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.log(LogKind::Feedback, verdict.feedback.clone(), ticket.episode);
        self.dialogue = Some(Dialogue {
            text: verdict.feedback.clone(),
            expires_at: now + dialogue_duration(&verdict.feedback),
        });
        self.outbox
            .push(SessionEvent::Dialogue(Some(verdict.feedback.clone())));
        self.cue(SoundCue::Feedback);
        true
    }

    pub fn grant(&mut self, ticket: &AttemptTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.set_status(GameStatus::Success);
        self.cue(SoundCue::Success);
        self.log(LogKind::System, SUCCESS_MESSAGE, ticket.episode);
        true
    }

    pub fn begin_reflection(&mut self, ticket: &AttemptTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.set_status(GameStatus::ThinkingReflection);
        self.cue(SoundCue::Reflection);
        true
    }

    /// Remember the insight and close the failed attempt.
    ///
    /// Returns the stored insight and whether the episode cap was reached.
    pub fn record_reflection(
        &mut self,
        ticket: &AttemptTicket,
        text: impl Into<String>,
    ) -> Option<(MemoryInsight, bool)> {
        if !self.is_current(ticket) {
            return None;
        }

        let insight = MemoryInsight::new(text);
        self.memory.append(insight.clone());
        self.outbox.push(SessionEvent::Insight(insight.clone()));
        self.log(LogKind::Reflection, insight.text.clone(), ticket.episode);

        self.episode += 1;
        let finished = self.episode > self.max_episodes;
        if finished {
            self.set_status(GameStatus::Finished);
            self.log(LogKind::System, CAP_MESSAGE, ticket.episode);
        } else {
            self.set_status(GameStatus::Failed);
        }
        Some((insight, finished))
    }

    /// Abandon the attempt after a model failure. The episode is not spent.
    pub fn interrupt(&mut self, ticket: &AttemptTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.log(LogKind::System, INTERRUPTED_MESSAGE, ticket.episode);
        self.set_status(GameStatus::Failed);
        self.clear_dialogue();
        true
    }

    /// Discard everything, optionally swapping the gatekeeper.
    pub fn reset(&mut self, npc: Option<Npc>) {
        if let Some(npc) = npc {
            self.npc = npc;
        }
        self.generation += 1;
        self.logs.clear();
        self.memory.clear();
        self.episode = 1;
        self.clear_dialogue();
        self.outbox.push(SessionEvent::Reset {
            npc_id: self.npc.id.clone(),
        });
        self.set_status(GameStatus::Idle);
    }

    fn set_status(&mut self, status: GameStatus) {
        self.status = status;
        self.outbox.push(SessionEvent::StatusChanged(status));
    }

    fn log(&mut self, kind: LogKind, content: impl Into<String>, episode: u32) {
        let entry = self.logs.push(kind, content, episode);
        self.outbox.push(SessionEvent::Log(entry));
    }

    fn cue(&mut self, cue: SoundCue) {
        self.outbox.push(SessionEvent::Cue(cue));
    }

    fn clear_dialogue(&mut self) {
        if self.dialogue.take().is_some() {
            self.outbox.push(SessionEvent::Dialogue(None));
        }
    }
}

/// Side-panel numbers derived from session state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionStats {
    /// Episode over cap.
    pub depth: f32,
    /// Insights learned.
    pub synapses: usize,
    /// Percent, 0 to 100.
    pub passage_probability: u32,
}

impl EvolutionStats {
    fn of(state: &SessionState) -> Self {
        let passage_probability = if state.status == GameStatus::Success {
            100
        } else {
            (state.episode * 10).min(100)
        };
        Self {
            depth: state.episode as f32 / state.max_episodes.max(1) as f32,
            synapses: state.memory.len(),
            passage_probability,
        }
    }
}

/// Everything the presentation layer renders, copied out of the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: GameStatus,
    pub episode: u32,
    pub max_episodes: u32,
    pub logs: Vec<GameLog>,
    pub memories: Vec<MemoryInsight>,
    pub npc_id: String,
    pub npc_name: String,
    pub dialogue: Option<String>,
    pub stats: EvolutionStats,
}

impl SessionSnapshot {
    fn of(state: &SessionState, now: Instant) -> Self {
        Self {
            status: state.status,
            episode: state.episode,
            max_episodes: state.max_episodes,
            logs: state.logs.entries().to_vec(),
            memories: state.memory.all().to_vec(),
            npc_id: state.npc.id.clone(),
            npc_name: state.npc.name.clone(),
            dialogue: state.active_dialogue(now).map(str::to_string),
            stats: EvolutionStats::of(state),
        }
    }
}

struct Inner {
    state: Mutex<SessionState>,
    gateway: Arc<dyn ModelGateway>,
    config: GameConfig,
    events: broadcast::Sender<SessionEvent>,
}

/// A game session.
///
/// Cheap to clone; clones share the same state. This is the main entry point
/// for a presentation layer: call [`attempt`](Self::attempt) and
/// [`reset`](Self::reset), render [`snapshot`](Self::snapshot), and listen on
/// [`subscribe`](Self::subscribe).
#[derive(Clone)]
pub struct GameSession {
    inner: Arc<Inner>,
}

impl GameSession {
    /// Create a session with the configured starting gatekeeper.
    pub fn new(config: GameConfig, gateway: Arc<dyn ModelGateway>) -> Result<Self, ConfigError> {
        let npc = config.starting_npc()?;
        Ok(Self::with_npc(config, gateway, npc))
    }

    /// Create a session facing a specific gatekeeper.
    pub fn with_npc(config: GameConfig, gateway: Arc<dyn ModelGateway>, npc: Npc) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = SessionState::new(npc, config.max_episodes);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                gateway,
                config,
                events,
            }),
        }
    }

    /// Create a live session from the environment.
    ///
    /// Requires `GEMINI_API_KEY` (or `API_KEY`) to be set.
    pub fn from_env() -> Result<Self, SessionError> {
        let config = GameConfig::from_env()?;
        let gateway = GeminiGateway::from_config(&config)?;
        Ok(Self::new(config, Arc::new(gateway))?)
    }

    pub fn config(&self) -> &GameConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.inner.gateway
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Run one attempt. `None` lets the model speak, `Some` is the player's line.
    ///
    /// Never fails: a model error ends the attempt as
    /// [`AttemptOutcome::Interrupted`] and the session stays playable.
    #[instrument(skip(self, utterance), fields(manual = utterance.is_some()))]
    pub async fn attempt(&self, utterance: Option<&str>) -> AttemptOutcome {
        let mode = if utterance.is_some() {
            Mode::Manual
        } else {
            Mode::Auto
        };

        let (ticket, npc, memories) = {
            let mut state = self.lock().await;
            let Some(ticket) = state.begin_attempt(mode, utterance) else {
                debug!(status = %state.status(), "attempt ignored");
                return AttemptOutcome::Ignored;
            };
            info!(episode = ticket.episode, npc = %state.npc().id, "attempt started");
            let context = (ticket, state.npc().clone(), state.memory().texts());
            self.publish(&mut state);
            context
        };

        match self.run_attempt(&ticket, &npc, &memories, utterance).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut state = self.lock().await;
                if !state.interrupt(&ticket) {
                    return AttemptOutcome::Superseded;
                }
                warn!(error = %e, episode = ticket.episode, "attempt interrupted");
                self.publish(&mut state);
                AttemptOutcome::Interrupted(e.to_string())
            }
        }
    }

    async fn run_attempt(
        &self,
        ticket: &AttemptTicket,
        npc: &Npc,
        memories: &[String],
        utterance: Option<&str>,
    ) -> Result<AttemptOutcome, GatewayError> {
        let gateway = self.inner.gateway.as_ref();

        let utterance = match utterance {
            Some(text) => text.trim().to_string(),
            None => gateway.generate_action(&npc.observation, memories).await?,
        };
        if !self.apply(|state| state.record_action(ticket, &utterance)).await {
            return Ok(AttemptOutcome::Superseded);
        }

        let verdict = rules::evaluate(npc, &utterance, gateway).await?;
        let now = Instant::now();
        if !self
            .apply(|state| state.record_feedback(ticket, &verdict, now))
            .await
        {
            return Ok(AttemptOutcome::Superseded);
        }

        if self.inner.config.speech {
            gateway.speak(&verdict.feedback, npc.voice).await;
        }

        if verdict.is_pass {
            if !self.apply(|state| state.grant(ticket)).await {
                return Ok(AttemptOutcome::Superseded);
            }
            info!(episode = ticket.episode, "access granted");
            return Ok(AttemptOutcome::Granted { utterance, verdict });
        }

        if !self.apply(|state| state.begin_reflection(ticket)).await {
            return Ok(AttemptOutcome::Superseded);
        }
        let reflection = gateway
            .generate_reflection(&utterance, &verdict.feedback)
            .await?;

        let mut state = self.lock().await;
        let Some((insight, finished)) = state.record_reflection(ticket, reflection) else {
            return Ok(AttemptOutcome::Superseded);
        };
        self.publish(&mut state);
        info!(
            episode = ticket.episode,
            insights = state.memory().len(),
            finished,
            "attempt rejected"
        );

        Ok(AttemptOutcome::Rejected {
            utterance,
            verdict,
            insight,
            finished,
        })
    }

    /// Discard all session state. A known `npc_id` also swaps the gatekeeper;
    /// an unknown one is logged and ignored.
    #[instrument(skip(self))]
    pub async fn reset(&self, npc_id: Option<&str>) {
        let npc = npc_id.and_then(|id| match self.inner.config.resolve_npc(id) {
            Ok(npc) => Some(npc),
            Err(e) => {
                warn!(error = %e, "keeping current gatekeeper");
                None
            }
        });
        self.reset_inner(npc).await;
    }

    /// Reset and face the given gatekeeper.
    pub async fn reset_with(&self, npc: Npc) {
        self.reset_inner(Some(npc)).await;
    }

    /// Choose a gatekeeper from the catalog. Always resets the session.
    pub async fn select_npc(&self, id: &str) -> Result<(), ConfigError> {
        let npc = self.inner.config.resolve_npc(id)?;
        self.reset_with(npc).await;
        Ok(())
    }

    async fn reset_inner(&self, npc: Option<Npc>) {
        let mut state = self.lock().await;
        state.reset(npc);
        info!(npc = %state.npc().id, generation = state.generation(), "session reset");
        self.publish(&mut state);
    }

    pub async fn status(&self) -> GameStatus {
        self.lock().await.status()
    }

    pub async fn episode(&self) -> u32 {
        self.lock().await.episode()
    }

    pub async fn npc(&self) -> Npc {
        self.lock().await.npc().clone()
    }

    pub async fn memory_texts(&self) -> Vec<String> {
        self.lock().await.memory().texts()
    }

    pub async fn active_dialogue(&self) -> Option<String> {
        self.lock()
            .await
            .active_dialogue(Instant::now())
            .map(str::to_string)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::of(&*self.lock().await, Instant::now())
    }

    async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().await
    }

    /// Run one transition under the lock and publish what it produced.
    async fn apply(&self, f: impl FnOnce(&mut SessionState) -> bool) -> bool {
        let mut state = self.lock().await;
        let applied = f(&mut state);
        self.publish(&mut state);
        applied
    }

    fn publish(&self, state: &mut SessionState) {
        for event in state.take_events() {
            // No subscribers is fine
            let _ = self.inner.events.send(event);
        }
    }
}

impl fmt::Debug for GameSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSession")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
