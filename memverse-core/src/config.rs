//! Game configuration.
//!
//! Defaults match the hosted game; `GameConfig::from_env` overlays values from
//! the environment (and a `.env` file, if present).

use crate::npc::{self, Npc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_MAX_EPISODES: u32 = 10;

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Unknown NPC: {0}")]
    UnknownNpc(String),
}

/// Which evaluator gatekeepers loaded from the catalog use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluationMode {
    /// Each NPC's built-in pattern rules.
    #[default]
    Patterns,
    /// The model judges every utterance in character.
    Delegated,
}

impl EvaluationMode {
    /// The catalog NPC as it should behave under this mode.
    pub fn apply(self, npc: &Npc) -> Npc {
        match self {
            EvaluationMode::Patterns => npc.clone(),
            EvaluationMode::Delegated => npc.delegated(),
        }
    }
}

impl FromStr for EvaluationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "patterns" | "rules" => Ok(EvaluationMode::Patterns),
            "delegated" | "model" => Ok(EvaluationMode::Delegated),
            _ => Err(ConfigError::InvalidValue {
                var: "MEMVERSE_EVALUATION",
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration for a game session.
#[derive(Clone)]
pub struct GameConfig {
    /// Gemini API key. Only needed for the live gateway.
    pub api_key: Option<String>,

    /// Model for actions, reflections and delegated verdicts.
    pub text_model: String,

    /// Model for speech synthesis.
    pub tts_model: String,

    pub action_temperature: f32,
    pub reflection_temperature: f32,
    pub judge_temperature: f32,

    /// Speak gatekeeper feedback aloud.
    pub speech: bool,

    /// Failures allowed before the session is finished.
    pub max_episodes: u32,

    pub evaluation: EvaluationMode,

    /// Catalog id of the starting gatekeeper.
    pub npc_id: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            action_temperature: 0.7,
            reflection_temperature: 0.2,
            judge_temperature: 0.2,
            speech: true,
            max_episodes: DEFAULT_MAX_EPISODES,
            evaluation: EvaluationMode::Patterns,
            npc_id: npc::default_npc().id.clone(),
        }
    }
}

impl GameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from the environment, loading `.env` first.
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `GEMINI_API_KEY` / `API_KEY` | API key |
    /// | `MEMVERSE_TEXT_MODEL` | text model |
    /// | `MEMVERSE_TTS_MODEL` | speech model |
    /// | `MEMVERSE_SPEECH` | `on`/`off` |
    /// | `MEMVERSE_EVALUATION` | `patterns`/`delegated` |
    /// | `MEMVERSE_NPC` | starting gatekeeper id |
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.api_key = lookup("GEMINI_API_KEY")
            .or_else(|| lookup("API_KEY"))
            .filter(|key| !key.trim().is_empty());

        if let Some(model) = lookup("MEMVERSE_TEXT_MODEL") {
            config.text_model = model;
        }
        if let Some(model) = lookup("MEMVERSE_TTS_MODEL") {
            config.tts_model = model;
        }
        if let Some(value) = lookup("MEMVERSE_SPEECH") {
            config.speech = parse_switch(&value).ok_or(ConfigError::InvalidValue {
                var: "MEMVERSE_SPEECH",
                value,
            })?;
        }
        if let Some(value) = lookup("MEMVERSE_EVALUATION") {
            config.evaluation = value.parse()?;
        }
        if let Some(id) = lookup("MEMVERSE_NPC") {
            if npc::find(&id).is_none() {
                return Err(ConfigError::UnknownNpc(id));
            }
            config.npc_id = id;
        }

        Ok(config)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn with_tts_model(mut self, model: impl Into<String>) -> Self {
        self.tts_model = model.into();
        self
    }

    pub fn with_speech(mut self, speech: bool) -> Self {
        self.speech = speech;
        self
    }

    pub fn with_max_episodes(mut self, max: u32) -> Self {
        self.max_episodes = max;
        self
    }

    pub fn with_evaluation(mut self, mode: EvaluationMode) -> Self {
        self.evaluation = mode;
        self
    }

    pub fn with_npc(mut self, id: impl Into<String>) -> Self {
        self.npc_id = id.into();
        self
    }

    /// Resolve a catalog id into a gatekeeper under the configured evaluation mode.
    pub fn resolve_npc(&self, id: &str) -> Result<Npc, ConfigError> {
        npc::find(id)
            .map(|npc| self.evaluation.apply(npc))
            .ok_or_else(|| ConfigError::UnknownNpc(id.to_string()))
    }

    /// The configured starting gatekeeper.
    pub fn starting_npc(&self) -> Result<Npc, ConfigError> {
        self.resolve_npc(&self.npc_id)
    }
}

impl fmt::Debug for GameConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("text_model", &self.text_model)
            .field("tts_model", &self.tts_model)
            .field("action_temperature", &self.action_temperature)
            .field("reflection_temperature", &self.reflection_temperature)
            .field("judge_temperature", &self.judge_temperature)
            .field("speech", &self.speech)
            .field("max_episodes", &self.max_episodes)
            .field("evaluation", &self.evaluation)
            .field("npc_id", &self.npc_id)
            .finish()
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GameConfig::default();
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(config.max_episodes, 10);
        assert_eq!(config.npc_id, "sage");
        assert!(config.speech);
        assert_eq!(config.evaluation, EvaluationMode::Patterns);
    }

    #[test]
    fn test_from_lookup() {
        let config = GameConfig::from_lookup(lookup(&[
            ("API_KEY", "k-123"),
            ("MEMVERSE_SPEECH", "off"),
            ("MEMVERSE_EVALUATION", "delegated"),
            ("MEMVERSE_NPC", "guardian"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("k-123"));
        assert!(!config.speech);
        assert_eq!(config.evaluation, EvaluationMode::Delegated);
        assert!(config.starting_npc().unwrap().is_delegated());
        assert_eq!(config.starting_npc().unwrap().id, "guardian");
    }

    #[test]
    fn test_gemini_key_wins_and_blank_is_none() {
        let config = GameConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "primary"),
            ("API_KEY", "secondary"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("primary"));

        let config = GameConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            GameConfig::from_lookup(lookup(&[("MEMVERSE_SPEECH", "loud")])),
            Err(ConfigError::InvalidValue { var: "MEMVERSE_SPEECH", .. })
        ));
        assert!(matches!(
            GameConfig::from_lookup(lookup(&[("MEMVERSE_NPC", "dragon")])),
            Err(ConfigError::UnknownNpc(_))
        ));
        assert!(matches!(
            GameConfig::from_lookup(lookup(&[("MEMVERSE_EVALUATION", "vibes")])),
            Err(ConfigError::InvalidValue { var: "MEMVERSE_EVALUATION", .. })
        ));
    }

    #[test]
    fn test_parse_evaluation_mode() {
        assert_eq!(" Delegated ".parse::<EvaluationMode>().unwrap(), EvaluationMode::Delegated);
        assert_eq!("rules".parse::<EvaluationMode>().unwrap(), EvaluationMode::Patterns);

        match "oracle".parse::<EvaluationMode>() {
            Err(ConfigError::InvalidValue { var, value }) => {
                assert_eq!(var, "MEMVERSE_EVALUATION");
                assert_eq!(value, "oracle");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", GameConfig::new().with_api_key("secret-key"));
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
