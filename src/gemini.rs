//! Gemini client for learning path generation.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::GeminiConfig;

const TEMPERATURE: f32 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 2048;
const TOP_P: f32 = 0.95;
const TOP_K: u32 = 40;

/// Human-readable classification of a non-2xx upstream status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFailureCause {
    BadRequest,
    AuthFailure,
    RateLimited,
    ServerError,
    Unknown,
}

impl HttpFailureCause {
    pub fn classify(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Self::BadRequest,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::AuthFailure,
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited,
            s if s.is_server_error() => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad request",
            Self::AuthFailure => "authentication failed",
            Self::RateLimited => "rate limited",
            Self::ServerError => "upstream server error",
            Self::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for HttpFailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status} ({cause})")]
    Http {
        status: u16,
        cause: HttpFailureCause,
        body: String,
    },
    /// 2xx response without text at `candidates[0].content.parts[0].text`
    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),
}

impl UpstreamError {
    /// True when the call itself failed, as opposed to succeeding with unusable content
    pub fn is_call_failure(&self) -> bool {
        !matches!(self, Self::MalformedEnvelope(_))
    }
}

/// Anything that turns a prompt into free-form model text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError>;
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

/// Request body for `generateContent`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

/// Response from `generateContent`
#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    /// Text at `candidates[0].content.parts[0].text`
    pub fn text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }
}

/// Schema for the 3-activity array, sent when structured output is on
fn activity_schema() -> serde_json::Value {
    let field = json!({ "type": "STRING" });
    json!({
        "type": "ARRAY",
        "minItems": 3,
        "maxItems": 3,
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": field,
                "type": field,
                "description": field,
                "date": field,
                "location": field,
                "skillArea": field,
                "source": field,
            },
            "required": ["title", "type", "description", "date", "location", "skillArea", "source"],
        }
    })
}

/// Gemini API client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    endpoint: String,
    structured_output: bool,
}

impl GeminiClient {
    pub fn new(api_key: String, config: &GeminiConfig) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("learning-path-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.api_base_url.trim_end_matches('/'),
            config.model
        );

        Ok(Self {
            http,
            api_key,
            endpoint,
            structured_output: config.structured_output,
        })
    }

    fn request_body<'a>(&self, prompt: &'a str) -> GenerateContentRequest<'a> {
        let (response_mime_type, response_schema) = if self.structured_output {
            (Some("application/json"), Some(activity_schema()))
        } else {
            (None, None)
        };

        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
                top_p: TOP_P,
                top_k: TOP_K,
                response_mime_type,
                response_schema,
            },
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        debug!(prompt_length = prompt.len(), "sending prompt to Gemini");

        let res = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let cause = HttpFailureCause::classify(status);
            error!(status = status.as_u16(), %cause, body = %body, "Gemini API error");
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                cause,
                body,
            });
        }

        let body = res.text().await.map_err(map_reqwest_error)?;
        let envelope: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::MalformedEnvelope(e.to_string()))?;

        match envelope.text() {
            Some(text) => {
                debug!(text_length = text.len(), "received text from Gemini");
                Ok(text.to_string())
            }
            None => {
                error!(body = %body, "unexpected response structure from Gemini");
                Err(UpstreamError::MalformedEnvelope(
                    "no text at candidates[0].content.parts[0]".to_string(),
                ))
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transport(e.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;

    const PATH: &str = "/v1beta/models/gemini-1.5-pro:generateContent";

    fn config(base_url: &str) -> GeminiConfig {
        GeminiConfig {
            api_base_url: base_url.to_string(),
            timeout: Duration::from_secs(2),
            ..GeminiConfig::default()
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(HttpFailureCause::classify(StatusCode::BAD_REQUEST), HttpFailureCause::BadRequest);
        assert_eq!(HttpFailureCause::classify(StatusCode::UNAUTHORIZED), HttpFailureCause::AuthFailure);
        assert_eq!(HttpFailureCause::classify(StatusCode::FORBIDDEN), HttpFailureCause::AuthFailure);
        assert_eq!(HttpFailureCause::classify(StatusCode::TOO_MANY_REQUESTS), HttpFailureCause::RateLimited);
        assert_eq!(HttpFailureCause::classify(StatusCode::SERVICE_UNAVAILABLE), HttpFailureCause::ServerError);
        assert_eq!(HttpFailureCause::classify(StatusCode::NOT_FOUND), HttpFailureCause::Unknown);
    }

    #[test]
    fn test_envelope_text_path() {
        let envelope: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "hello" }] } }]
        }))
        .unwrap();
        assert_eq!(envelope.text(), Some("hello"));

        let empty: GenerateContentResponse =
            serde_json::from_value(json!({ "promptFeedback": {} })).unwrap();
        assert_eq!(empty.text(), None);
    }

    #[test]
    fn test_request_body_carries_generation_parameters() {
        let client = GeminiClient::new("k".to_string(), &config("http://localhost")).unwrap();
        let value = serde_json::to_value(client.request_body("hi")).unwrap();

        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert_eq!(value["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(value["generationConfig"]["responseSchema"]["type"], "ARRAY");
    }

    #[tokio::test]
    async fn test_generate_returns_candidate_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PATH)
                    .query_param("key", "test-key")
                    .body_contains("Pottery please");
                then.status(200).json_body(json!({
                    "candidates": [{ "content": { "parts": [{ "text": "[{\"title\":\"Pottery\"}]" }] } }]
                }));
            })
            .await;

        let client = GeminiClient::new("test-key".to_string(), &config(&server.base_url())).unwrap();
        let text = client.generate("Pottery please").await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "[{\"title\":\"Pottery\"}]");
    }

    #[tokio::test]
    async fn test_generate_classifies_http_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(429).body("quota exceeded");
            })
            .await;

        let client = GeminiClient::new("test-key".to_string(), &config(&server.base_url())).unwrap();
        let err = client.generate("prompt").await.unwrap_err();

        match err {
            UpstreamError::Http { status, cause, body } => {
                assert_eq!(status, 429);
                assert_eq!(cause, HttpFailureCause::RateLimited);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_rejects_missing_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200).json_body(json!({ "candidates": [] }));
            })
            .await;

        let client = GeminiClient::new("test-key".to_string(), &config(&server.base_url())).unwrap();
        let err = client.generate("prompt").await.unwrap_err();

        assert!(matches!(err, UpstreamError::MalformedEnvelope(_)));
        assert!(!err.is_call_failure());
    }

    #[tokio::test]
    async fn test_generate_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PATH);
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({ "candidates": [] }));
            })
            .await;

        let cfg = GeminiConfig {
            timeout: Duration::from_millis(100),
            ..config(&server.base_url())
        };
        let client = GeminiClient::new("test-key".to_string(), &cfg).unwrap();
        let err = client.generate("prompt").await.unwrap_err();

        assert!(matches!(err, UpstreamError::Timeout));
        assert!(err.is_call_failure());
    }
}
