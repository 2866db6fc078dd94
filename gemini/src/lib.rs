//! Minimal Google Gemini API client.
//!
//! This crate provides a focused client for the `generateContent` endpoint with:
//! - Plain text generation with sampling configuration
//! - Schema-constrained JSON output
//! - Speech synthesis (prebuilt voices, base64 PCM audio)

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Errors that can occur when using the Gemini client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Gemini API client.
#[derive(Clone)]
pub struct Gemini {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Gemini {
    /// Create a new Gemini client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Create a Gemini client from `GEMINI_API_KEY`, falling back to `API_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .map_err(|_| Error::NoApiKey)?;
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        Ok(Self::new(api_key))
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API root (proxies, regional endpoints).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a generation request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let api_request = build_api_request(&request);
        let headers = self.build_headers()?;

        debug!(model = %model, "gemini generateContent");

        let response = self
            .client
            .post(self.endpoint(&model))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: extract_error_message(&body),
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(parse_response(api_response))
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A generation request to send to Gemini.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub model: Option<String>,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub json_schema: Option<serde_json::Value>,
    pub voice: Option<String>,
}

impl Request {
    /// Create a single-turn text request.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Require a JSON response matching `schema`.
    pub fn with_json_schema(mut self, schema: serde_json::Value) -> Self {
        self.json_schema = Some(schema);
        self
    }

    /// Request spoken audio using a prebuilt voice instead of text.
    pub fn with_speech(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

/// A generation response from Gemini.
#[derive(Debug, Clone)]
pub struct Response {
    pub parts: Vec<Part>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    pub model_version: Option<String>,
}

impl Response {
    /// Get all text content concatenated.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| part.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Decode the first inline-data part.
    ///
    /// Returns `Ok(None)` when the response carries no inline data.
    pub fn audio(&self) -> Result<Option<InlineAudio>, Error> {
        let Some((mime_type, data)) = self.parts.iter().find_map(|part| match part {
            Part::InlineData { mime_type, data } => Some((mime_type, data)),
            Part::Text { .. } => None,
        }) else {
            return Ok(None);
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Parse(format!("inline data is not base64: {e}")))?;

        Ok(Some(InlineAudio {
            mime_type: mime_type.clone(),
            bytes,
        }))
    }
}

/// One part of a candidate's content.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text { text: String },
    InlineData { mime_type: String, data: String },
}

impl Part {
    pub fn as_text(&self) -> Option<&str> {
        if let Part::Text { text } = self {
            Some(text)
        } else {
            None
        }
    }
}

/// Decoded inline audio payload.
#[derive(Debug, Clone)]
pub struct InlineAudio {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl InlineAudio {
    /// Sample rate advertised in the MIME type (`audio/L16;codec=pcm;rate=24000`).
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Other,
}

/// Token usage information.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub candidate_tokens: usize,
    pub total_tokens: usize,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<ApiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<ApiInlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<ApiSpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiSpeechConfig {
    voice_config: ApiVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiVoiceConfig {
    prebuilt_voice_config: ApiPrebuiltVoice,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiPrebuiltVoice {
    voice_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
    #[serde(default)]
    total_token_count: usize,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

fn build_api_request(request: &Request) -> ApiRequest {
    let contents = vec![ApiContent {
        role: Some("user".to_string()),
        parts: vec![ApiPart {
            text: Some(request.prompt.clone()),
            inline_data: None,
        }],
    }];

    let system_instruction = request.system.as_ref().map(|system| ApiContent {
        role: None,
        parts: vec![ApiPart {
            text: Some(system.clone()),
            inline_data: None,
        }],
    });

    let mut config = ApiGenerationConfig {
        temperature: request.temperature,
        ..ApiGenerationConfig::default()
    };

    if let Some(ref schema) = request.json_schema {
        config.response_mime_type = Some("application/json".to_string());
        config.response_schema = Some(schema.clone());
    }

    if let Some(ref voice) = request.voice {
        config.response_modalities = Some(vec!["AUDIO".to_string()]);
        config.speech_config = Some(ApiSpeechConfig {
            voice_config: ApiVoiceConfig {
                prebuilt_voice_config: ApiPrebuiltVoice {
                    voice_name: voice.clone(),
                },
            },
        });
    }

    let has_config = config.temperature.is_some()
        || config.response_schema.is_some()
        || config.speech_config.is_some();

    ApiRequest {
        contents,
        system_instruction,
        generation_config: has_config.then_some(config),
    }
}

fn parse_response(api_response: ApiResponse) -> Response {
    let candidate = api_response.candidates.into_iter().next();

    let (parts, finish_reason) = match candidate {
        Some(candidate) => {
            let parts = candidate
                .content
                .map(|content| content.parts)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|part| match (part.text, part.inline_data) {
                    (_, Some(inline)) => Some(Part::InlineData {
                        mime_type: inline.mime_type,
                        data: inline.data,
                    }),
                    (Some(text), None) => Some(Part::Text { text }),
                    (None, None) => None,
                })
                .collect();
            let finish_reason = candidate.finish_reason.map(|r| match r.as_str() {
                "STOP" => FinishReason::Stop,
                "MAX_TOKENS" => FinishReason::MaxTokens,
                "SAFETY" => FinishReason::Safety,
                _ => FinishReason::Other,
            });
            (parts, finish_reason)
        }
        None => (Vec::new(), None),
    };

    let usage = api_response.usage_metadata.unwrap_or_default();

    Response {
        parts,
        finish_reason,
        usage: Usage {
            prompt_tokens: usage.prompt_token_count,
            candidate_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        },
        model_version: api_response.model_version,
    }
}

/// Pull the provider's message out of an error body, or return the body as-is.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_creation() {
        let client = Gemini::new("test-key");
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(
            client.endpoint("gemini-x"),
            format!("{API_BASE}/models/gemini-x:generateContent")
        );
    }

    #[test]
    fn test_client_with_model_and_base_url() {
        let client = Gemini::new("test-key")
            .with_model("gemini-2.5-flash")
            .with_base_url("http://localhost:8080/v1beta/");
        assert_eq!(client.model(), "gemini-2.5-flash");
        assert_eq!(
            client.endpoint("m"),
            "http://localhost:8080/v1beta/models/m:generateContent"
        );
    }

    #[test]
    fn test_request_builder() {
        let request = Request::text("Hello")
            .with_system("You are terse")
            .with_temperature(0.7);

        assert_eq!(request.prompt, "Hello");
        assert!(request.system.is_some());
        assert_eq!(request.temperature, Some(0.7));
        assert!(request.voice.is_none());
    }

    #[test]
    fn test_plain_request_wire_shape() {
        let value = serde_json::to_value(build_api_request(&Request::text("Hi"))).unwrap();
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Hi");
        assert!(value.get("generationConfig").is_none());
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn test_json_schema_request_wire_shape() {
        let schema = json!({"type": "OBJECT"});
        let request = Request::text("Judge this")
            .with_system("You are a gatekeeper")
            .with_temperature(0.2)
            .with_json_schema(schema.clone());
        let value = serde_json::to_value(build_api_request(&request)).unwrap();

        let config = &value["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["responseSchema"], schema);
        assert_eq!(
            value["systemInstruction"]["parts"][0]["text"],
            "You are a gatekeeper"
        );
    }

    #[test]
    fn test_speech_request_wire_shape() {
        let value =
            serde_json::to_value(build_api_request(&Request::text("Begone").with_speech("Kore")))
                .unwrap();
        let config = &value["generationConfig"];
        assert_eq!(config["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            config["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
    }

    #[test]
    fn test_parse_text_response() {
        let api: ApiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        }))
        .unwrap();

        let response = parse_response(api);
        assert_eq!(response.text(), "Hello there");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.total_tokens, 6);
        assert!(response.audio().unwrap().is_none());
    }

    #[test]
    fn test_parse_empty_response() {
        let api: ApiResponse = serde_json::from_value(json!({})).unwrap();
        let response = parse_response(api);
        assert_eq!(response.text(), "");
        assert!(response.finish_reason.is_none());
    }

    #[test]
    fn test_parse_audio_response() {
        // 0x0000, 0x7fff as little-endian PCM16
        let encoded = base64::engine::general_purpose::STANDARD.encode([0u8, 0, 0xff, 0x7f]);
        let api: ApiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"inlineData": {
                    "mimeType": "audio/L16;codec=pcm;rate=24000",
                    "data": encoded
                }}]}
            }]
        }))
        .unwrap();

        let audio = parse_response(api).audio().unwrap().unwrap();
        assert_eq!(audio.bytes, vec![0, 0, 0xff, 0x7f]);
        assert_eq!(audio.sample_rate(), Some(24000));
    }

    #[test]
    fn test_bad_base64_is_parse_error() {
        let response = Response {
            parts: vec![Part::InlineData {
                mime_type: "audio/L16".to_string(),
                data: "not base64!!".to_string(),
            }],
            finish_reason: None,
            usage: Usage::default(),
            model_version: None,
        };
        assert!(matches!(response.audio(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_extract_error_message() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(extract_error_message(body), "API key not valid");
        assert_eq!(extract_error_message("gateway timeout"), "gateway timeout");
    }
}
