//! Session engine: owns the conversation and pumps one stream at a time.
//!
//! The engine is driven by a single consumer loop. Submitting a prompt
//! spawns a producer task that opens the transport stream and forwards its
//! chunks over a capacity-1 channel. The consumer pulls one message at a
//! time with [`SessionEngine::next_message`] (cancel-safe, so it can sit in
//! a `tokio::select!` next to terminal input and timers) and applies it with
//! [`SessionEngine::apply`], which is the only place conversation state
//! changes while a stream is live.

use std::sync::Arc;

use futures_util::StreamExt;
use proto::{EngineEvent, LlmError, StreamFailure, StreamMessage, SubmitError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::conversation::{ConversationState, SessionStatus, TurnStatus};
use crate::llm::{Exchange, StreamProvider, StreamRequest};

/// Producer side of the single in-flight stream.
struct ActiveStream {
    rx: mpsc::Receiver<StreamMessage>,
    producer: JoinHandle<()>,
    opened: bool,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

/// Streaming chat-session state machine.
pub struct SessionEngine {
    provider: Arc<dyn StreamProvider>,
    state: ConversationState,
    active: Option<ActiveStream>,
}

impl SessionEngine {
    /// Creates an idle engine with one empty pending turn.
    pub fn new(provider: Arc<dyn StreamProvider>) -> Self {
        Self {
            provider,
            state: ConversationState::new(),
            active: None,
        }
    }

    /// Read access to the conversation.
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Returns `true` while a producer is attached.
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Submits a prompt for the active turn and starts its stream.
    ///
    /// Must be called from within a tokio runtime. Rejected without any state
    /// change when the trimmed prompt is empty or a stream is in flight.
    pub fn submit(&mut self, prompt: &str) -> Result<(), SubmitError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitError::EmptyPrompt);
        }
        if !self.state.status().accepts_submissions() || self.active.is_some() {
            debug!("Submission rejected: stream in flight");
            return Err(SubmitError::Busy);
        }

        let history = self
            .state
            .completed_exchanges()
            .map(|(prompt, answer)| Exchange {
                prompt: prompt.to_string(),
                answer: answer.to_string(),
            })
            .collect::<Vec<_>>();
        debug!(
            prompt_len = %prompt.len(),
            history = %history.len(),
            "Starting stream"
        );
        let request = StreamRequest::new(prompt).with_history(history);

        self.state.begin_turn(prompt.to_string());

        let (tx, rx) = mpsc::channel(1);
        let producer = tokio::spawn(produce(Arc::clone(&self.provider), request, tx));
        self.active = Some(ActiveStream {
            rx,
            producer,
            opened: false,
        });
        Ok(())
    }

    /// Waits for the next message from the active producer.
    ///
    /// Never resolves while no stream is active. Cancel-safe.
    pub async fn next_message(&mut self) -> StreamMessage {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        match active.rx.recv().await {
            Some(message) => message,
            None => StreamMessage::Failed(LlmError::InvalidResponse(
                "stream ended without completing".to_string(),
            )),
        }
    }

    /// Applies one producer message to the conversation.
    ///
    /// Returns `None` for messages that arrive when no stream is active.
    pub fn apply(&mut self, message: StreamMessage) -> Option<EngineEvent> {
        let Some(active) = self.active.as_mut() else {
            debug!(?message, "Dropping message for inactive stream");
            return None;
        };

        match message {
            StreamMessage::Opened => {
                active.opened = true;
                Some(EngineEvent::StreamStarted)
            }
            StreamMessage::Chunk(text) => {
                self.state.append_answer_chunk(&text);
                Some(EngineEvent::ChunkReceived(text))
            }
            StreamMessage::Done => {
                self.active = None;
                self.state.finish_turn(TurnStatus::Complete, SessionStatus::Answered);
                debug!(turns = %self.state.turns().len(), "Stream completed");
                Some(EngineEvent::StreamDone)
            }
            StreamMessage::Failed(error) => {
                let opened = active.opened;
                self.active = None;
                if opened {
                    warn!(error = %error, "Stream failed mid-answer");
                    self.state.finish_turn(TurnStatus::Failed, SessionStatus::Idle);
                    Some(EngineEvent::StreamError(StreamFailure::MidStream(error)))
                } else {
                    warn!(error = %error, "Stream failed to open");
                    let prompt = self.state.abandon_turn().unwrap_or_default();
                    Some(EngineEvent::StreamError(StreamFailure::Open { prompt, error }))
                }
            }
        }
    }

    /// Waits for and applies the next producer message.
    ///
    /// Returns `None` when no stream is active.
    pub async fn pump_next(&mut self) -> Option<EngineEvent> {
        self.active.as_ref()?;
        let message = self.next_message().await;
        self.apply(message)
    }

    /// Aborts the in-flight stream and returns the engine to `Idle`.
    ///
    /// The partial answer is kept and a fresh pending turn is appended.
    pub fn cancel(&mut self) -> Option<EngineEvent> {
        // Dropping the handle aborts the producer and closes the channel.
        self.active.take()?;
        self.state.finish_turn(TurnStatus::Cancelled, SessionStatus::Idle);
        debug!("Stream cancelled");
        Some(EngineEvent::StreamError(StreamFailure::Cancelled))
    }
}

/// Producer task: opens the stream and forwards it message by message.
async fn produce(
    provider: Arc<dyn StreamProvider>,
    request: StreamRequest,
    tx: mpsc::Sender<StreamMessage>,
) {
    let mut stream = match provider.open_stream(request).await {
        Ok(stream) => stream,
        Err(error) => {
            let _ = tx.send(StreamMessage::Failed(error)).await;
            return;
        }
    };

    if tx.send(StreamMessage::Opened).await.is_err() {
        return;
    }

    while let Some(item) = stream.next().await {
        let message = match item {
            Ok(text) => StreamMessage::Chunk(text),
            Err(error) => {
                let _ = tx.send(StreamMessage::Failed(error)).await;
                return;
            }
        };
        if tx.send(message).await.is_err() {
            debug!("Stream consumer went away");
            return;
        }
    }

    let _ = tx.send(StreamMessage::Done).await;
}
