use crate::error::LlmError;

/// Message written by a stream producer onto the engine channel.
///
/// A producer emits `Opened` once the transport accepted the request, then
/// zero or more `Chunk`s, then exactly one of `Done` or `Failed`. A `Failed`
/// without a preceding `Opened` means the stream never started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// The transport accepted the request.
    Opened,
    /// An incremental fragment of answer text.
    Chunk(String),
    /// The stream completed successfully.
    Done,
    /// The stream failed; no further messages follow.
    Failed(LlmError),
}

impl StreamMessage {
    /// Returns `true` for messages that end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

/// Why a stream ended without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// The transport refused to start the stream; the submission was rolled back.
    Open {
        /// The prompt that could not be sent, returned for resubmission.
        prompt: String,
        /// Underlying transport error.
        error: LlmError,
    },
    /// The stream broke after it started.
    MidStream(LlmError),
    /// The user aborted the stream.
    Cancelled,
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { error, .. } => write!(f, "could not start stream: {error}"),
            Self::MidStream(error) => write!(f, "stream interrupted: {error}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Event emitted by the session engine after it applied a stream message.
///
/// These are consumed by the render loop, which only ever needs to know
/// that the conversation changed and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The producer opened its stream.
    StreamStarted,
    /// A chunk was appended to the active turn's answer.
    ChunkReceived(String),
    /// The stream completed and a new pending turn was appended.
    StreamDone,
    /// The stream ended without completing.
    StreamError(StreamFailure),
}

impl EngineEvent {
    /// Returns `true` when the event ends the current stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamDone | Self::StreamError(_))
    }
}
