//! Conversation turns and the append-only conversation state.

/// Lifecycle of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Waiting for a prompt, or receiving its answer.
    Open,
    /// The answer stream completed.
    Complete,
    /// The answer stream broke after it started.
    Failed,
    /// The user aborted the answer stream.
    Cancelled,
}

/// One prompt/answer pair.
#[derive(Debug, Clone)]
pub struct Turn {
    prompt: Option<String>,
    answer: String,
    status: TurnStatus,
}

impl Turn {
    fn pending() -> Self {
        Self {
            prompt: None,
            answer: String::new(),
            status: TurnStatus::Open,
        }
    }

    /// The submitted prompt, or `None` while the turn is still waiting for input.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    /// Answer text accumulated so far.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Current lifecycle status.
    pub fn status(&self) -> TurnStatus {
        self.status
    }

    /// Returns `true` once the turn can no longer change.
    pub fn is_finished(&self) -> bool {
        self.status != TurnStatus::Open
    }
}

/// Engine-wide session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Nothing submitted yet, or the last stream failed or was cancelled.
    #[default]
    Idle,
    /// A stream is in flight for the active turn.
    Streaming,
    /// The last stream completed.
    Answered,
}

impl SessionStatus {
    /// Whether a new prompt may be submitted.
    pub fn accepts_submissions(self) -> bool {
        self != Self::Streaming
    }
}

/// Ordered turns plus the session status.
///
/// History is append-only: the only mutable turn is the last one, and its
/// answer only grows while the session is streaming.
#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: Vec<Turn>,
    status: SessionStatus,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    /// Creates a conversation holding one empty pending turn.
    pub fn new() -> Self {
        Self {
            turns: vec![Turn::pending()],
            status: SessionStatus::Idle,
        }
    }

    /// All turns in chronological order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The last turn; the only one eligible for mutation.
    pub fn active_turn(&self) -> &Turn {
        // `turns` is never empty: it starts with one pending turn and only grows.
        &self.turns[self.turns.len() - 1]
    }

    fn active_turn_mut(&mut self) -> &mut Turn {
        let last = self.turns.len() - 1;
        &mut self.turns[last]
    }

    /// Turns whose answers completed, as `(prompt, answer)` pairs.
    ///
    /// Used as context for the next request.
    pub fn completed_exchanges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.turns.iter().filter_map(|turn| match (&turn.prompt, turn.status) {
            (Some(prompt), TurnStatus::Complete) => Some((prompt.as_str(), turn.answer.as_str())),
            _ => None,
        })
    }

    /// Appends a chunk to the active answer. No-op unless streaming.
    ///
    /// Returns whether the chunk was applied.
    pub fn append_answer_chunk(&mut self, text: &str) -> bool {
        if self.status != SessionStatus::Streaming {
            return false;
        }
        self.active_turn_mut().answer.push_str(text);
        true
    }

    /// Freezes `prompt` on the active turn and enters `Streaming`.
    pub(crate) fn begin_turn(&mut self, prompt: String) {
        debug_assert!(self.status.accepts_submissions());
        self.active_turn_mut().prompt = Some(prompt);
        self.status = SessionStatus::Streaming;
    }

    /// Rolls back a submission whose stream never opened.
    ///
    /// The answer is untouched; the prompt is handed back to the caller.
    pub(crate) fn abandon_turn(&mut self) -> Option<String> {
        self.status = SessionStatus::Idle;
        self.active_turn_mut().prompt.take()
    }

    /// Closes the active turn with `outcome` and appends a fresh pending turn.
    pub(crate) fn finish_turn(&mut self, outcome: TurnStatus, status: SessionStatus) {
        debug_assert!(outcome != TurnStatus::Open);
        self.active_turn_mut().status = outcome;
        self.status = status;
        self.turns.push(Turn::pending());
    }
}
