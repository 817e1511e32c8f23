//! Streaming LLM provider abstraction.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use proto::LlmError;

/// Ordered answer fragments for one request.
///
/// Items are `Ok(text)` chunks; the stream ends after the last chunk on
/// success, or yields a single `Err` and then ends.
pub type ChunkStream = BoxStream<'static, Result<String, LlmError>>;

/// A completed prompt/answer pair sent as conversation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// What the user asked.
    pub prompt: String,
    /// What the model answered.
    pub answer: String,
}

/// Request to open a stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Earlier completed exchanges, oldest first.
    pub history: Vec<Exchange>,
    /// The new user prompt.
    pub prompt: String,
}

impl StreamRequest {
    /// Creates a request with no prior context.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            prompt: prompt.into(),
        }
    }

    /// Attaches prior exchanges as context.
    pub fn with_history(mut self, history: Vec<Exchange>) -> Self {
        self.history = history;
        self
    }
}

/// Streaming provider trait
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Starts a streaming generation for `req`.
    ///
    /// Errors returned here mean the stream never started.
    async fn open_stream(&self, req: StreamRequest) -> Result<ChunkStream, LlmError>;
}
