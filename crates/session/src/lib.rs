//! Chat session engine, conversation state, and streaming LLM adapters.

pub mod conversation;
pub mod engine;
pub mod gemini;
pub mod llm;
mod sse;

/// Conversation turns and session status.
pub use conversation::{ConversationState, SessionStatus, Turn, TurnStatus};
/// Streaming session state machine.
pub use engine::SessionEngine;
/// Google Gemini streaming provider.
pub use gemini::GeminiProvider;
/// Streaming provider interfaces.
pub use llm::{ChunkStream, Exchange, StreamProvider, StreamRequest};
