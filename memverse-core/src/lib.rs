//! Gatekeeper negotiation game with reflective memory.
//!
//! An adventurer tries to talk its way past a gatekeeper. Each refusal is
//! distilled into an insight that shapes the next attempt. This crate provides:
//! - The gatekeeper catalog and its rule engine (pattern rules or model judged)
//! - The episode orchestrator and its event stream
//! - A Gemini-backed model gateway with speech output
//! - A headless driver and test tooling
//!
//! # Quick Start
//!
//! ```ignore
//! use memverse_core::{AttemptOutcome, GameSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = GameSession::from_env()?;
//!
//!     match session.attempt(Some("Good day, kind sir. What a fine beard!")).await {
//!         AttemptOutcome::Granted { verdict, .. } => println!("{}", verdict.feedback),
//!         other => println!("{other:?}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod events;
pub mod gateway;
pub mod headless;
pub mod logs;
pub mod memory;
pub mod npc;
pub mod prompts;
pub mod rules;
pub mod session;
pub mod telemetry;
pub mod testing;

// Primary public API
pub use config::{ConfigError, EvaluationMode, GameConfig};
pub use events::{SessionEvent, SoundCue};
pub use gateway::{GatewayError, GeminiGateway, ModelGateway};
pub use headless::{HeadlessConfig, HeadlessGame, TranscriptEntry};
pub use logs::{GameLog, LogKind};
pub use memory::MemoryInsight;
pub use npc::{Npc, Voice};
pub use rules::{Evaluator, Verdict};
pub use session::{AttemptOutcome, GameSession, GameStatus, SessionError, SessionSnapshot};
pub use testing::{MockGateway, TestHarness};
