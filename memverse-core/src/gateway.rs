//! Model gateway: every call the game makes to the generative model.
//!
//! The session talks to a [`ModelGateway`] trait object so the live
//! [`GeminiGateway`] can be swapped for a scripted one in tests.

use crate::audio::{AudioContext, AudioError, AudioSink, NullSink, SPEECH_SAMPLE_RATE};
use crate::config::GameConfig;
use crate::npc::Voice;
use crate::prompts;
use crate::rules::Verdict;
use async_trait::async_trait;
use gemini::{Gemini, Request};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Said when the model returns nothing for an action.
pub const FALLBACK_ACTION: &str = "Hello?";

/// Learned when the model returns nothing for a reflection.
pub const FALLBACK_REFLECTION: &str = "I failed.";

/// Errors from the model gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gemini API error: {0}")]
    Api(#[from] gemini::Error),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

/// The generative capabilities the game depends on.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Plan one sentence for the adventurer. Never returns an empty string.
    async fn generate_action(
        &self,
        observation: &str,
        memories: &[String],
    ) -> Result<String, GatewayError>;

    /// Distill one rule from a failure. Never returns an empty string.
    async fn generate_reflection(&self, action: &str, feedback: &str)
        -> Result<String, GatewayError>;

    /// Answer in character. A malformed answer becomes a rejection, not an error.
    async fn generate_npc_response(
        &self,
        instruction: &str,
        utterance: &str,
    ) -> Result<Verdict, GatewayError>;

    /// Speak a line aloud. Best-effort: failures are logged and swallowed.
    async fn speak(&self, text: &str, voice: Voice);
}

/// Trimmed `text`, or `fallback` when nothing is left.
pub(crate) fn or_fallback(text: &str, fallback: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Gateway backed by the Gemini API.
pub struct GeminiGateway {
    client: Gemini,
    text_model: String,
    tts_model: String,
    action_temperature: f32,
    reflection_temperature: f32,
    judge_temperature: f32,
    sink: Arc<dyn AudioSink>,
    audio: OnceCell<AudioContext>,
}

impl GeminiGateway {
    /// Create a gateway with default models and temperatures.
    pub fn new(client: Gemini) -> Self {
        let defaults = GameConfig::default();
        Self {
            client,
            text_model: defaults.text_model,
            tts_model: defaults.tts_model,
            action_temperature: defaults.action_temperature,
            reflection_temperature: defaults.reflection_temperature,
            judge_temperature: defaults.judge_temperature,
            sink: Arc::new(NullSink),
            audio: OnceCell::new(),
        }
    }

    /// Create a gateway from a game config. Requires an API key.
    pub fn from_config(config: &GameConfig) -> Result<Self, GatewayError> {
        let key = config
            .api_key
            .as_deref()
            .ok_or(GatewayError::Api(gemini::Error::NoApiKey))?;

        Ok(Self {
            client: Gemini::new(key).with_model(&config.text_model),
            text_model: config.text_model.clone(),
            tts_model: config.tts_model.clone(),
            action_temperature: config.action_temperature,
            reflection_temperature: config.reflection_temperature,
            judge_temperature: config.judge_temperature,
            sink: Arc::new(NullSink),
            audio: OnceCell::new(),
        })
    }

    /// Route spoken audio to the given sink.
    pub fn with_audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The playback context, once the first line has been spoken.
    pub fn audio_context(&self) -> Option<&AudioContext> {
        self.audio.get()
    }

    async fn complete_text(
        &self,
        prompt: String,
        temperature: f32,
    ) -> Result<String, GatewayError> {
        let request = Request::text(prompt)
            .with_model(&self.text_model)
            .with_temperature(temperature);
        let response = self.client.complete(request).await?;
        Ok(response.text())
    }

    async fn try_speak(&self, text: &str, voice: Voice) -> Result<(), GatewayError> {
        let context = self
            .audio
            .get_or_init(|| AudioContext::new(SPEECH_SAMPLE_RATE, self.sink.clone()));

        let request = Request::text(text)
            .with_model(&self.tts_model)
            .with_speech(voice.name());
        let response = self.client.complete(request).await?;

        match response.audio()? {
            Some(audio) => {
                if let Some(rate) = audio.sample_rate() {
                    if rate != context.sample_rate() {
                        debug!(
                            rate,
                            expected = context.sample_rate(),
                            "speech sample rate differs"
                        );
                    }
                }
                context.play_pcm16(&audio.bytes)?;
            }
            None => debug!("speech response carried no audio"),
        }
        Ok(())
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    #[instrument(skip(self, observation, memories), fields(memories = memories.len()))]
    async fn generate_action(
        &self,
        observation: &str,
        memories: &[String],
    ) -> Result<String, GatewayError> {
        let prompt = prompts::action_prompt(observation, memories);
        let text = self.complete_text(prompt, self.action_temperature).await?;
        Ok(or_fallback(&text, FALLBACK_ACTION))
    }

    #[instrument(skip(self, action, feedback))]
    async fn generate_reflection(
        &self,
        action: &str,
        feedback: &str,
    ) -> Result<String, GatewayError> {
        let prompt = prompts::reflection_prompt(action, feedback);
        let text = self
            .complete_text(prompt, self.reflection_temperature)
            .await?;
        Ok(or_fallback(&text, FALLBACK_REFLECTION))
    }

    #[instrument(skip(self, instruction, utterance))]
    async fn generate_npc_response(
        &self,
        instruction: &str,
        utterance: &str,
    ) -> Result<Verdict, GatewayError> {
        let request = Request::text(prompts::npc_response_prompt(instruction, utterance))
            .with_model(&self.text_model)
            .with_system(instruction)
            .with_temperature(self.judge_temperature)
            .with_json_schema(Verdict::response_schema());
        let response = self.client.complete(request).await?;
        Ok(Verdict::parse_or_reject(&response.text()))
    }

    #[instrument(skip(self, text), fields(voice = %voice))]
    async fn speak(&self, text: &str, voice: Voice) {
        if let Err(e) = self.try_speak(text, voice).await {
            warn!(error = %e, "speech synthesis failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferedSink;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_or_fallback() {
        assert_eq!(or_fallback("  Greetings, sir.\n", FALLBACK_ACTION), "Greetings, sir.");
        assert_eq!(or_fallback("", FALLBACK_ACTION), "Hello?");
        assert_eq!(or_fallback(" \n\t", FALLBACK_REFLECTION), "I failed.");
    }

    #[test]
    fn test_from_config_requires_key() {
        let result = GeminiGateway::from_config(&GameConfig::default());
        assert!(matches!(
            result,
            Err(GatewayError::Api(gemini::Error::NoApiKey))
        ));

        let config = GameConfig::default().with_api_key("k");
        let gateway = GeminiGateway::from_config(&config).unwrap();
        assert!(gateway.audio_context().is_none());
    }

    #[tokio::test]
    async fn test_speech_failure_is_swallowed() {
        let gateway = GeminiGateway::new(
            Gemini::new("test-key").with_base_url("http://127.0.0.1:9/unreachable"),
        );
        // Nothing listens on the discard port; the error must not escape
        gateway.speak("Begone!", Voice::Kore).await;
        assert_eq!(gateway.audio_context().unwrap().clips_played(), 0);
    }

    const SPEECH_REPLY: &str = r#"{
        "candidates": [{
            "content": {"role": "model", "parts": [{
                "inlineData": {"mimeType": "audio/L16;codec=pcm;rate=24000", "data": "AAD/fw=="}
            }]},
            "finishReason": "STOP"
        }]
    }"#;

    /// Answer `connections` generateContent calls with a fixed speech reply.
    async fn serve_speech(listener: TcpListener, connections: usize) {
        for _ in 0..connections {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending a full request");
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                SPEECH_REPLY.len(),
                SPEECH_REPLY
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_speech_reuses_one_audio_context() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_speech(listener, 2));

        let sink = Arc::new(BufferedSink::new());
        let gateway = GeminiGateway::new(
            Gemini::new("test-key").with_base_url(format!("http://{addr}")),
        )
        .with_audio_sink(sink.clone());

        gateway.speak("Hahaha! Enter, seeker!", Voice::Kore).await;
        let first = gateway.audio_context().unwrap();
        assert_eq!(first.clips_played(), 1);

        gateway.speak("Begone!", Voice::Kore).await;
        let second = gateway.audio_context().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(second.clips_played(), 2);

        server.await.unwrap();
        let clips = sink.drain();
        assert_eq!(clips.len(), 2);
        for clip in clips {
            assert_eq!(clip.sample_rate, SPEECH_SAMPLE_RATE);
            assert_eq!(clip.frames(), 2);
        }
    }
}
