use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// LLM transport error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// A prompt submission was refused by the session engine.
    #[error("Submit error: {0}")]
    Submit(#[from] SubmitError),

    /// Answer text could not be formatted for display.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// LLM transport errors.
///
/// Cloneable so a failure can travel inside engine events to every consumer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// API key missing or rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The configured model does not exist.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Provider throttled the request.
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Connection-level failure before or during the response.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote API failure.
    #[error("{0}")]
    Api(String),

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Generation stopped for a non-success reason (safety, recitation, ...).
    #[error("Response blocked: {0}")]
    Blocked(String),

    /// No data arrived within the idle timeout.
    #[error("Stream idle for more than {0}s")]
    IdleTimeout(u64),
}

/// Reasons the session engine refuses a submission.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The prompt is empty after trimming whitespace.
    #[error("Prompt is empty")]
    EmptyPrompt,

    /// A stream is already in flight.
    #[error("A response is still streaming")]
    Busy,
}

/// Markdown formatting failure.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Writing the formatted output failed.
    #[error("Write failed: {0}")]
    Write(#[from] std::fmt::Error),

    /// The input cannot be displayed.
    #[error("Unsupported content: {0}")]
    Unsupported(String),
}
