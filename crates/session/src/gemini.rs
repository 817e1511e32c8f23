//! Google Gemini streaming provider (`streamGenerateContent` over SSE).

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use proto::LlmError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::{ChunkStream, StreamProvider, StreamRequest};
use crate::sse::SseDecoder;

/// Default public API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_TEMPERATURE: f32 = 0.5;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_PREVIEW_CHARS: usize = 500;

// ── Request types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: Some(text.to_string()),
                thought: false,
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing)]
    thought: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

/// Text and completion flag extracted from one SSE payload.
#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedPayload {
    text: String,
    finished: bool,
}

// ── Provider ───────────────────────────────────────────────────────────────────

/// Gemini streaming provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    idle_timeout: Duration,
}

impl GeminiProvider {
    /// Creates a provider targeting the default Gemini endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Targets a custom base URL (useful for proxies/tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the response token limit.
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Sets how long a stream may stay silent before it fails.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Model id requests are sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn build_request(&self, req: &StreamRequest) -> GenerateRequest {
        let mut contents = Vec::with_capacity(req.history.len() * 2 + 1);
        for exchange in &req.history {
            contents.push(Content::text("user", &exchange.prompt));
            contents.push(Content::text("model", &exchange.answer));
        }
        contents.push(Content::text("user", &req.prompt));

        GenerateRequest {
            contents,
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl StreamProvider for GeminiProvider {
    async fn open_stream(&self, req: StreamRequest) -> Result<ChunkStream, LlmError> {
        let body = self.build_request(&req);
        debug!(
            model = %self.model,
            contents = %body.contents.len(),
            "Sending streaming request to Gemini"
        );

        let response = self
            .client
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        debug!(status = %status.as_u16(), "Gemini response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body, &self.model));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| LlmError::Network(e.to_string()))
            })
            .boxed();

        Ok(sse_chunks(body, self.idle_timeout))
    }
}

/// Maps a non-success HTTP status to a transport error.
fn status_error(status: u16, body: &str, model: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_else(|| body.chars().take(ERROR_PREVIEW_CHARS).collect());

    match status {
        401 | 403 => LlmError::Auth(message),
        400 if message.contains("API key") => LlmError::Auth(message),
        404 => LlmError::ModelNotFound(model.to_string()),
        429 => LlmError::RateLimit,
        _ => LlmError::Api(format!("HTTP {status}: {message}")),
    }
}

/// Extracts answer text and completion from one payload.
fn parse_payload(data: &str) -> Result<ParsedPayload, LlmError> {
    let response: StreamResponse = serde_json::from_str(data).map_err(|e| {
        LlmError::InvalidResponse(format!(
            "Deserialization error: {e}; body: {}",
            data.chars().take(200).collect::<String>()
        ))
    })?;

    if let Some(error) = response.error {
        let message = error
            .message
            .unwrap_or_else(|| "unknown Gemini error".to_string());
        return Err(match error.code {
            Some(429) => LlmError::RateLimit,
            Some(code) => LlmError::Api(format!("{code}: {message}")),
            None => LlmError::Api(message),
        });
    }

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(LlmError::Blocked(reason));
    }

    let mut parsed = ParsedPayload::default();
    for candidate in response.candidates {
        // Content first so text that arrives with the finish reason is kept.
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(text) = part.text
                    && !part.thought
                {
                    parsed.text.push_str(&text);
                }
            }
        }
        if let Some(reason) = candidate.finish_reason {
            match reason.as_str() {
                "STOP" | "MAX_TOKENS" => parsed.finished = true,
                "FINISH_REASON_UNSPECIFIED" => {}
                other => {
                    if !parsed.text.is_empty() {
                        warn!(reason = other, "Gemini stopped after partial text");
                    }
                    return Err(LlmError::Blocked(other.to_string()));
                }
            }
        }
    }
    Ok(parsed)
}

type RawBody = BoxStream<'static, Result<Vec<u8>, LlmError>>;

struct SseState {
    body: RawBody,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
    idle_timeout: Duration,
}

impl SseState {
    fn fail(&mut self, error: LlmError) {
        self.pending.push_back(Err(error));
        self.finished = true;
    }

    fn absorb(&mut self, data: &str) {
        if self.finished {
            return;
        }
        if data == "[DONE]" {
            self.finished = true;
            return;
        }
        match parse_payload(data) {
            Ok(parsed) => {
                if !parsed.text.is_empty() {
                    self.pending.push_back(Ok(parsed.text));
                }
                self.finished = parsed.finished;
            }
            Err(error) => self.fail(error),
        }
    }
}

/// Turns a raw SSE body into a chunk stream.
fn sse_chunks(body: RawBody, idle_timeout: Duration) -> ChunkStream {
    let state = SseState {
        body,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
        idle_timeout,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.decoder.next_payload() {
                Ok(Some(data)) => {
                    state.absorb(&data);
                    continue;
                }
                Ok(None) => {}
                Err(error) => {
                    state.fail(error);
                    continue;
                }
            }

            match tokio::time::timeout(state.idle_timeout, state.body.next()).await {
                Err(_) => state.fail(LlmError::IdleTimeout(state.idle_timeout.as_secs())),
                Ok(None) => {
                    if let Some(data) = state.decoder.finish() {
                        state.absorb(&data);
                    }
                    // Gemini always closes a complete answer with a finish reason.
                    if !state.finished {
                        state.fail(LlmError::InvalidResponse(
                            "stream ended before a finish reason".to_string(),
                        ));
                    }
                }
                Ok(Some(Err(error))) => state.fail(error),
                Ok(Some(Ok(bytes))) => {
                    if let Err(error) = state.decoder.push(&bytes) {
                        state.fail(error);
                    }
                }
            }
        }
    })
    .boxed()
}
