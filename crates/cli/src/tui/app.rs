//! Chat view state, rendering, and input routing.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use proto::{EngineEvent, StreamFailure, SubmitError};
use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use session::{ConversationState, SessionStatus, TurnStatus};
use tracing::debug;

use super::markdown::{Formatter, MarkdownFormatter, plain_text};
use super::theme::THEME;

/// Spinner animation frames (Braille pattern).
const SPINNER: &[char] = &['⣾', '⣽', '⣻', '⢿', '⡿', '⣟', '⣯', '⣷'];

/// Shown in place of an answer the formatter could not handle.
pub const FORMAT_FALLBACK: &str = "failed to process this question";

const PLACEHOLDER: &str = "How can I help you today?";
const MOUSE_SCROLL_LINES: u16 = 3;

/// What the user asked the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Send the prompt text.
    Submit(String),
    /// The pending prompt text changed.
    InputChanged,
    /// Abort the in-flight stream.
    Cancel,
    /// Leave the application.
    Quit,
}

/// Presentation state for the chat view.
///
/// Conversation content is read from [`ConversationState`] on every render;
/// this struct only owns input focus, scroll position, and the busy indicator.
pub struct ChatApp {
    /// Current text typed in the prompt box.
    pub input: String,
    /// Cursor position within `input` (byte offset).
    pub cursor_pos: usize,
    /// Vertical scroll offset for the history panel.
    pub history_scroll: u16,
    /// Model name shown in the title bar.
    pub model_name: String,
    /// Spinner animation tick counter.
    pub spinner_tick: u8,
    /// Whether a stream is in flight.
    pub streaming: bool,
    /// Last stream failure, shown until the next submission.
    pub last_error: Option<String>,
    /// Whether the user requested exit.
    pub should_quit: bool,
    viewport_height: u16,
    formatter: Box<dyn Formatter>,
}

impl ChatApp {
    /// Creates an idle view using the markdown formatter.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            input: String::new(),
            cursor_pos: 0,
            history_scroll: 0,
            model_name: model_name.into(),
            spinner_tick: 0,
            streaming: false,
            last_error: None,
            should_quit: false,
            viewport_height: 0,
            formatter: Box::new(MarkdownFormatter),
        }
    }

    /// Replaces the answer formatter.
    pub fn with_formatter(mut self, formatter: Box<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    // ── Input handling ───────────────────────────────────────

    /// Handles a key press, returning the intent it expresses, if any.
    pub fn on_input(&mut self, key: KeyEvent) -> Option<Intent> {
        match (key.modifiers, key.code) {
            (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                self.should_quit = true;
                Some(Intent::Quit)
            }
            (_, KeyCode::Esc) => self.streaming.then_some(Intent::Cancel),
            (_, KeyCode::Enter) => {
                if self.streaming || self.input.trim().is_empty() {
                    None
                } else {
                    Some(Intent::Submit(self.input.clone()))
                }
            }
            (modifiers, KeyCode::Char(c)) if !modifiers.contains(KeyModifiers::CONTROL) => {
                self.input.insert(self.cursor_pos, c);
                self.cursor_pos += c.len_utf8();
                Some(Intent::InputChanged)
            }
            (_, KeyCode::Backspace) => {
                if self.cursor_pos == 0 {
                    return None;
                }
                let prev = self.prev_boundary();
                self.input.drain(prev..self.cursor_pos);
                self.cursor_pos = prev;
                Some(Intent::InputChanged)
            }
            (_, KeyCode::Left) => {
                self.cursor_pos = self.prev_boundary();
                None
            }
            (_, KeyCode::Right) => {
                self.cursor_pos = self.input[self.cursor_pos..]
                    .chars()
                    .next()
                    .map(|c| self.cursor_pos + c.len_utf8())
                    .unwrap_or(self.input.len());
                None
            }
            (_, KeyCode::Up) => {
                self.scroll_up(1);
                None
            }
            (_, KeyCode::Down) => {
                self.scroll_down(1);
                None
            }
            (_, KeyCode::PageUp) => {
                self.scroll_up(self.half_page());
                None
            }
            (_, KeyCode::PageDown) => {
                self.scroll_down(self.half_page());
                None
            }
            (_, KeyCode::Home) => {
                self.history_scroll = 0;
                None
            }
            (_, KeyCode::End) => {
                self.scroll_to_bottom();
                None
            }
            _ => None,
        }
    }

    /// Handles mouse wheel scrolling.
    pub fn on_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::ScrollUp => self.scroll_up(MOUSE_SCROLL_LINES),
            MouseEventKind::ScrollDown => self.scroll_down(MOUSE_SCROLL_LINES),
            _ => {}
        }
    }

    /// The engine accepted a submission.
    pub fn on_submitted(&mut self) {
        self.input.clear();
        self.cursor_pos = 0;
        self.streaming = true;
        self.spinner_tick = 0;
        self.last_error = None;
        self.scroll_to_bottom();
    }

    /// The engine refused a submission.
    pub fn on_submit_rejected(&mut self, error: SubmitError) {
        debug!(error = %error, "Submission rejected");
        if error == SubmitError::Busy {
            self.last_error = Some(error.to_string());
        }
    }

    /// Applies an engine event to the view.
    pub fn on_engine_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::StreamStarted | EngineEvent::ChunkReceived(_) => {}
            EngineEvent::StreamDone => self.streaming = false,
            EngineEvent::StreamError(failure) => {
                self.streaming = false;
                if let StreamFailure::Open { prompt, .. } = failure
                    && self.input.is_empty()
                {
                    self.input = prompt.clone();
                    self.cursor_pos = self.input.len();
                }
                self.last_error = Some(failure.to_string());
            }
        }
        self.scroll_to_bottom();
    }

    /// Advances the busy indicator. Returns whether anything changed.
    pub fn on_tick(&mut self) -> bool {
        if !self.streaming {
            return false;
        }
        self.spinner_tick = self.spinner_tick.wrapping_add(1);
        true
    }

    fn prev_boundary(&self) -> usize {
        self.input[..self.cursor_pos]
            .char_indices()
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn half_page(&self) -> u16 {
        (self.viewport_height / 2).max(1)
    }

    fn scroll_up(&mut self, lines: u16) {
        self.history_scroll = self.history_scroll.saturating_sub(lines);
    }

    fn scroll_down(&mut self, lines: u16) {
        self.history_scroll = self.history_scroll.saturating_add(lines);
    }

    /// Follows the bottom of the history; clamped at render time.
    pub fn scroll_to_bottom(&mut self) {
        self.history_scroll = u16::MAX;
    }

    // ── Rendering ────────────────────────────────────────────

    fn spinner(&self) -> char {
        SPINNER[usize::from(self.spinner_tick) % SPINNER.len()]
    }

    /// Builds the transcript lines for `state`.
    fn history_lines(&self, state: &ConversationState) -> Vec<Line<'static>> {
        let mut lines: Vec<Line<'static>> = Vec::new();
        let user = Style::default()
            .fg(THEME.user_label)
            .add_modifier(Modifier::BOLD);
        let assistant = Style::default()
            .fg(THEME.assistant_label)
            .add_modifier(Modifier::BOLD);

        for turn in state.turns() {
            let Some(prompt) = turn.prompt() else {
                continue;
            };
            if !lines.is_empty() {
                lines.push(Line::from(""));
            }
            lines.push(Line::from(vec![
                Span::styled("You: ", user),
                Span::raw(prompt.to_string()),
            ]));
            lines.push(Line::from(Span::styled("Gemini:", assistant)));

            if !turn.answer().is_empty() {
                match self.formatter.format_lines(turn.answer()) {
                    Ok(body) => lines.extend(body),
                    Err(error) => {
                        debug!(error = %error, "Answer formatting failed");
                        lines.push(Line::from(FORMAT_FALLBACK));
                    }
                }
            }

            match turn.status() {
                TurnStatus::Open if state.status() == SessionStatus::Streaming => {
                    lines.push(Line::styled(
                        format!("{} processing...", self.spinner()),
                        Style::default().fg(THEME.spinner),
                    ));
                }
                TurnStatus::Failed => lines.push(Line::styled(
                    "[answer interrupted]",
                    Style::default().fg(THEME.error),
                )),
                TurnStatus::Cancelled => lines.push(Line::styled(
                    "[cancelled]",
                    Style::default().fg(THEME.warning),
                )),
                _ => {}
            }
        }

        lines
    }

    /// Plain-text rendering of the transcript.
    ///
    /// Depends only on `state` and the spinner frame, so rendering twice
    /// without an intervening event yields identical output.
    pub fn render_text(&self, state: &ConversationState) -> String {
        self.history_lines(state)
            .iter()
            .map(plain_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Renders the entire view into the given frame.
    pub fn render(&mut self, frame: &mut Frame<'_>, state: &ConversationState) {
        let area = frame.area();

        // Layout: title(1) | history(fill) | status(1) | input(3)
        let chunks = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(3),
        ])
        .split(area);

        self.render_title(frame, chunks[0]);
        self.render_history(frame, chunks[1], state);
        self.render_status(frame, chunks[2], state);
        self.render_input(frame, chunks[3]);
    }

    fn render_title(&self, frame: &mut Frame<'_>, area: Rect) {
        let title = Line::from(vec![
            Span::styled(
                " gemchat ",
                Style::default()
                    .fg(THEME.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" {} ", self.model_name),
                Style::default().fg(THEME.model),
            ),
        ]);
        frame.render_widget(Paragraph::new(title), area);
    }

    fn render_history(&mut self, frame: &mut Frame<'_>, area: Rect, state: &ConversationState) {
        let history = Paragraph::new(Text::from(self.history_lines(state)))
            .wrap(Wrap { trim: false });

        let inner_width = area.width.saturating_sub(2);
        let visible_height = area.height.saturating_sub(2); // block borders
        // Counted before the block is attached so borders are not included.
        let content_height = u16::try_from(history.line_count(inner_width)).unwrap_or(u16::MAX);
        let max_scroll = content_height.saturating_sub(visible_height);
        self.viewport_height = visible_height;
        self.history_scroll = self.history_scroll.min(max_scroll);

        let history = history
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(THEME.border)),
            )
            .scroll((self.history_scroll, 0));

        frame.render_widget(history, area);
    }

    fn render_status(&self, frame: &mut Frame<'_>, area: Rect, state: &ConversationState) {
        let mut spans = Vec::new();
        let label = match state.status() {
            SessionStatus::Idle => "idle",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Answered => "answered",
        };
        if self.streaming {
            spans.push(Span::styled(
                format!(" {} {label} ", self.spinner()),
                Style::default().fg(THEME.spinner),
            ));
        } else {
            spans.push(Span::styled(
                format!(" {label} "),
                Style::default().fg(THEME.fg),
            ));
        }
        if let Some(error) = &self.last_error {
            spans.push(Span::styled(
                format!(" {error} "),
                Style::default().fg(THEME.error),
            ));
        }
        let hints = if self.streaming {
            " Esc:cancel  PgUp/PgDn:scroll  Ctrl+C:quit"
        } else {
            " Enter:send  PgUp/PgDn:scroll  Home/End:jump  Ctrl+C:quit"
        };
        spans.push(Span::styled(hints, Style::default().fg(THEME.fg_dim)));
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn render_input(&self, frame: &mut Frame<'_>, area: Rect) {
        let border_color = if self.streaming {
            THEME.border
        } else {
            THEME.border_active
        };

        let (display_text, input_style) = if self.input.is_empty() {
            (PLACEHOLDER, Style::default().fg(THEME.fg_dim))
        } else {
            (self.input.as_str(), Style::default().fg(THEME.fg))
        };

        let input = Paragraph::new(Span::styled(display_text, input_style)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(" Prompt "),
        );

        frame.render_widget(input, area);

        if !self.streaming {
            let cursor_col = self.input[..self.cursor_pos].chars().count() as u16;
            frame.set_cursor_position((area.x + 1 + cursor_col, area.y + 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures_util::{StreamExt, stream};
    use proto::{FormatError, LlmError};
    use ratatui::{Terminal, backend::TestBackend};
    use session::{ChunkStream, SessionEngine, StreamProvider, StreamRequest};

    struct FixedProvider {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl StreamProvider for FixedProvider {
        async fn open_stream(&self, _req: StreamRequest) -> Result<ChunkStream, LlmError> {
            let items: Vec<Result<String, LlmError>> =
                self.chunks.iter().map(|c| Ok(c.to_string())).collect();
            Ok(stream::iter(items).boxed())
        }
    }

    struct RefusingProvider;

    #[async_trait]
    impl StreamProvider for RefusingProvider {
        async fn open_stream(&self, _req: StreamRequest) -> Result<ChunkStream, LlmError> {
            Err(LlmError::Auth("API key not valid".into()))
        }
    }

    struct FailingFormatter;

    impl Formatter for FailingFormatter {
        fn format(&self, _markdown: &str) -> Result<String, FormatError> {
            Err(FormatError::Unsupported("anything".into()))
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(app: &mut ChatApp, text: &str) {
        for c in text.chars() {
            assert_eq!(
                app.on_input(key(KeyCode::Char(c))),
                Some(Intent::InputChanged)
            );
        }
    }

    fn fixed_engine(chunks: Vec<&'static str>) -> SessionEngine {
        SessionEngine::new(Arc::new(FixedProvider { chunks }))
    }

    async fn run_to_end(app: &mut ChatApp, engine: &mut SessionEngine) {
        while let Some(event) = engine.pump_next().await {
            app.on_engine_event(&event);
        }
    }

    #[test]
    fn typing_and_enter_produce_submit_intent() {
        let mut app = ChatApp::new("gemini-test");
        type_text(&mut app, "hi");
        assert_eq!(app.input, "hi");
        assert_eq!(app.cursor_pos, 2);
        assert_eq!(
            app.on_input(key(KeyCode::Enter)),
            Some(Intent::Submit("hi".into()))
        );
    }

    #[test]
    fn enter_with_blank_input_or_while_streaming_is_ignored() {
        let mut app = ChatApp::new("m");
        type_text(&mut app, "   ");
        assert_eq!(app.on_input(key(KeyCode::Enter)), None);

        type_text(&mut app, "x");
        app.streaming = true;
        assert_eq!(app.on_input(key(KeyCode::Enter)), None);
    }

    #[test]
    fn ctrl_c_quits_and_esc_cancels_only_while_streaming() {
        let mut app = ChatApp::new("m");
        assert_eq!(app.on_input(key(KeyCode::Esc)), None);
        app.streaming = true;
        assert_eq!(app.on_input(key(KeyCode::Esc)), Some(Intent::Cancel));

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(app.on_input(ctrl_c), Some(Intent::Quit));
        assert!(app.should_quit);
        assert_eq!(app.input, "");
    }

    #[test]
    fn backspace_and_cursor_moves_respect_char_boundaries() {
        let mut app = ChatApp::new("m");
        type_text(&mut app, "aé");
        assert_eq!(app.on_input(key(KeyCode::Left)), None);
        assert_eq!(app.cursor_pos, 1);
        app.on_input(key(KeyCode::Right));
        assert_eq!(app.cursor_pos, 3);
        assert_eq!(
            app.on_input(key(KeyCode::Backspace)),
            Some(Intent::InputChanged)
        );
        assert_eq!(app.input, "a");
        app.on_input(key(KeyCode::Left));
        assert_eq!(app.on_input(key(KeyCode::Backspace)), None);
    }

    #[test]
    fn scroll_keys_and_mouse_wheel_move_history() {
        let mut app = ChatApp::new("m");
        app.viewport_height = 20;
        app.history_scroll = 30;

        app.on_input(key(KeyCode::PageUp));
        assert_eq!(app.history_scroll, 20);
        app.on_input(key(KeyCode::PageDown));
        assert_eq!(app.history_scroll, 30);
        app.on_input(key(KeyCode::Up));
        assert_eq!(app.history_scroll, 29);
        app.on_input(key(KeyCode::Down));
        assert_eq!(app.history_scroll, 30);

        app.on_mouse(MouseEvent {
            kind: MouseEventKind::ScrollUp,
            column: 0,
            row: 0,
            modifiers: KeyModifiers::NONE,
        });
        assert_eq!(app.history_scroll, 27);

        app.on_input(key(KeyCode::Home));
        assert_eq!(app.history_scroll, 0);
        app.on_input(key(KeyCode::End));
        assert_eq!(app.history_scroll, u16::MAX);
    }

    #[test]
    fn tick_advances_spinner_only_while_streaming() {
        let mut app = ChatApp::new("m");
        assert!(!app.on_tick());
        assert_eq!(app.spinner_tick, 0);
        app.on_submitted();
        assert!(app.on_tick());
        assert_eq!(app.spinner_tick, 1);
    }

    #[tokio::test]
    async fn transcript_shows_streamed_answer_and_is_idempotent() {
        let mut app = ChatApp::new("m");
        let mut engine = fixed_engine(vec!["Hi", " there", "!"]);
        type_text(&mut app, "Hello");
        let Some(Intent::Submit(prompt)) = app.on_input(key(KeyCode::Enter)) else {
            panic!("expected submit intent");
        };
        engine.submit(&prompt).expect("submit");
        app.on_submitted();
        assert_eq!(app.input, "");

        let streaming = app.render_text(engine.state());
        assert!(streaming.contains("You: Hello"));
        assert!(streaming.ends_with("⣾ processing..."));

        run_to_end(&mut app, &mut engine).await;
        assert!(!app.streaming);

        let first = app.render_text(engine.state());
        let second = app.render_text(engine.state());
        assert_eq!(first, second);
        assert_eq!(first, "You: Hello\nGemini:\nHi there!");
    }

    #[tokio::test]
    async fn formatter_failure_shows_fallback_text() {
        let mut app = ChatApp::new("m").with_formatter(Box::new(FailingFormatter));
        let mut engine = fixed_engine(vec!["**x**"]);
        engine.submit("q").expect("submit");
        app.on_submitted();
        run_to_end(&mut app, &mut engine).await;

        let text = app.render_text(engine.state());
        assert!(text.contains(FORMAT_FALLBACK));
        assert!(!text.contains("**x**"));
    }

    #[tokio::test]
    async fn open_failure_restores_prompt_and_shows_error() {
        let mut app = ChatApp::new("m");
        let mut engine = SessionEngine::new(Arc::new(RefusingProvider));
        type_text(&mut app, "X");
        engine.submit("X").expect("submit");
        app.on_submitted();
        run_to_end(&mut app, &mut engine).await;

        assert_eq!(app.input, "X");
        assert_eq!(app.cursor_pos, 1);
        assert!(!app.streaming);
        let error = app.last_error.as_deref().expect("error shown");
        assert!(error.contains("API key not valid"));
        assert_eq!(app.render_text(engine.state()), "");

        app.on_submitted();
        assert_eq!(app.last_error, None);
    }

    #[test]
    fn busy_rejection_is_reported() {
        let mut app = ChatApp::new("m");
        app.on_submit_rejected(SubmitError::EmptyPrompt);
        assert_eq!(app.last_error, None);
        app.on_submit_rejected(SubmitError::Busy);
        assert!(app.last_error.is_some());
    }

    #[tokio::test]
    async fn render_draws_placeholder_and_clamps_scroll() {
        let mut app = ChatApp::new("gemini-test");
        let mut engine = fixed_engine(vec!["line\n\n", "more"]);
        engine.submit("q").expect("submit");
        app.on_submitted();
        run_to_end(&mut app, &mut engine).await;

        let mut terminal = Terminal::new(TestBackend::new(40, 20)).expect("terminal");
        terminal
            .draw(|frame| app.render(frame, engine.state()))
            .expect("draw");

        assert_eq!(app.viewport_height, 13);
        assert_eq!(app.history_scroll, 0);
        let rendered: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(rendered.contains("How can I help you today?"));
        assert!(rendered.contains("gemini-test"));
    }

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let width = usize::from(buffer.area.width);
        buffer
            .content()
            .chunks(width)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn following_bottom_shows_end_of_word_wrapped_answer() {
        let mut app = ChatApp::new("m");
        let mut engine = fixed_engine(vec![
            "aa bbbbbbb cc ddddddd ee fffffff gg hhhhhhh ",
            "ii jjjjjjj kk lllllll mm nnnnnnn oo ppppppp ",
            "qq rrrrrrr ss ttttttt uu vvvvvvv ww zzzzzzz FINAL",
        ]);
        engine.submit("q").expect("submit");
        app.on_submitted();
        run_to_end(&mut app, &mut engine).await;
        assert_eq!(app.history_scroll, u16::MAX);

        // 10 columns leave an 8-column history pane, so words wrap early.
        let mut terminal = Terminal::new(TestBackend::new(10, 11)).expect("terminal");
        terminal
            .draw(|frame| app.render(frame, engine.state()))
            .expect("draw");

        assert!(app.history_scroll > 0);
        let screen = screen_text(&terminal);
        assert!(screen.contains("FINAL"), "last word not visible:\n{screen}");
    }

    #[tokio::test]
    async fn end_key_reaches_last_row_after_scrolling_up() {
        let mut app = ChatApp::new("m");
        let mut engine = fixed_engine(vec!["one two three four five six seven eight nine LAST"]);
        engine.submit("q").expect("submit");
        app.on_submitted();
        run_to_end(&mut app, &mut engine).await;

        let mut terminal = Terminal::new(TestBackend::new(10, 11)).expect("terminal");
        app.on_input(key(KeyCode::Home));
        terminal
            .draw(|frame| app.render(frame, engine.state()))
            .expect("draw");
        assert!(!screen_text(&terminal).contains("LAST"));

        app.on_input(key(KeyCode::End));
        terminal
            .draw(|frame| app.render(frame, engine.state()))
            .expect("draw");
        assert!(screen_text(&terminal).contains("LAST"));
    }

    #[tokio::test]
    async fn markdown_emphasis_reaches_the_history_pane() {
        let mut app = ChatApp::new("m");
        let mut engine = fixed_engine(vec!["plain **loud** end"]);
        engine.submit("q").expect("submit");
        app.on_submitted();
        run_to_end(&mut app, &mut engine).await;

        let lines = app.history_lines(engine.state());
        let loud = lines
            .iter()
            .flat_map(|line| line.spans.iter())
            .find(|span| span.content == "loud")
            .expect("emphasised span");
        assert!(loud.style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(app.render_text(engine.state()), "You: q\nGemini:\nplain loud end");
    }
}
