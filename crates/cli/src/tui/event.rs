//! Async event loop for the TUI: interleaves terminal input, stream messages, and spinner ticks.

use std::time::Duration;

use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::{Stream, StreamExt};
use ratatui::{Terminal, backend::CrosstermBackend};
use session::SessionEngine;
use tokio::time::Interval;
use tracing::{debug, warn};

use super::app::{ChatApp, Intent};

/// RAII guard that restores the terminal on drop (even on panic).
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
    }
}

/// Routes one intent from the view to the engine.
fn dispatch(intent: Intent, app: &mut ChatApp, engine: &mut SessionEngine) {
    match intent {
        Intent::Submit(prompt) => match engine.submit(&prompt) {
            Ok(()) => app.on_submitted(),
            Err(error) => app.on_submit_rejected(error),
        },
        Intent::Cancel => {
            if let Some(event) = engine.cancel() {
                app.on_engine_event(&event);
            }
        }
        Intent::InputChanged | Intent::Quit => {}
    }
}

/// Waits for whichever of terminal input, the stream channel, or the spinner
/// tick is ready first and applies it.
///
/// Returns `false` once the terminal event source is exhausted.
async fn step<S>(
    app: &mut ChatApp,
    engine: &mut SessionEngine,
    events: &mut S,
    spinner: &mut Interval,
) -> bool
where
    S: Stream<Item = std::io::Result<Event>> + Unpin,
{
    tokio::select! {
        maybe_event = events.next() => {
            match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if let Some(intent) = app.on_input(key) {
                        dispatch(intent, app, engine);
                    }
                }
                Some(Ok(Event::Mouse(mouse))) => app.on_mouse(mouse),
                Some(Ok(_)) => {}
                Some(Err(e)) => warn!(error = %e, "Terminal event error"),
                None => return false,
            }
        }

        message = engine.next_message() => {
            if let Some(event) = engine.apply(message) {
                app.on_engine_event(&event);
            }
        }

        _ = spinner.tick(), if app.streaming => {
            app.on_tick();
        }
    }
    true
}

/// Run the full-screen chat view until the user quits.
///
/// `initial_prompt`, when given, is submitted before the first key press.
pub async fn run_tui(
    mut engine: SessionEngine,
    model_name: String,
    tick: Duration,
    initial_prompt: Option<String>,
) -> anyhow::Result<()> {
    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let _guard = TerminalGuard; // Drop restores terminal

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    debug!(model = %model_name, "TUI started");

    let mut app = ChatApp::new(model_name);
    if let Some(prompt) = initial_prompt {
        dispatch(Intent::Submit(prompt), &mut app, &mut engine);
    }

    let mut crossterm_stream = EventStream::new();

    let mut spinner_interval = tokio::time::interval(tick);
    spinner_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        terminal.draw(|frame| app.render(frame, engine.state()))?;

        if !step(&mut app, &mut engine, &mut crossterm_stream, &mut spinner_interval).await {
            break;
        }
        if app.should_quit {
            break;
        }
    }

    if engine.cancel().is_some() {
        debug!("Cancelled in-flight stream on exit");
    }

    // TerminalGuard::drop handles cleanup
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use futures_util::stream;
    use proto::{EngineEvent, LlmError, StreamFailure};
    use session::{ChunkStream, SessionStatus, StreamProvider, StreamRequest};

    struct HangingProvider;

    #[async_trait]
    impl StreamProvider for HangingProvider {
        async fn open_stream(&self, _req: StreamRequest) -> Result<ChunkStream, LlmError> {
            Ok(stream::pending().boxed())
        }
    }

    fn press(code: KeyCode) -> std::io::Result<Event> {
        Ok(Event::Key(KeyEvent::new(code, KeyModifiers::NONE)))
    }

    fn fast_ticks() -> Interval {
        let mut interval = tokio::time::interval(Duration::from_millis(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    }

    #[tokio::test]
    async fn input_and_ticks_are_handled_while_stream_hangs() {
        let mut engine = SessionEngine::new(Arc::new(HangingProvider));
        let mut app = ChatApp::new("m");
        dispatch(Intent::Submit("wait".into()), &mut app, &mut engine);

        let mut events = stream::iter(vec![press(KeyCode::Char('x'))]).chain(stream::pending());
        let mut ticks = fast_ticks();

        tokio::time::timeout(Duration::from_secs(5), async {
            while app.input != "x" || app.spinner_tick < 2 {
                assert!(step(&mut app, &mut engine, &mut events, &mut ticks).await);
            }
        })
        .await
        .expect("loop kept serving input and ticks");

        assert!(app.streaming);
        assert_eq!(engine.status(), SessionStatus::Streaming);
    }

    #[tokio::test]
    async fn esc_through_the_loop_cancels_and_closed_input_ends_it() {
        let mut engine = SessionEngine::new(Arc::new(HangingProvider));
        let mut app = ChatApp::new("m");
        dispatch(Intent::Submit("wait".into()), &mut app, &mut engine);

        let mut events = stream::iter(vec![press(KeyCode::Esc)]);
        let mut ticks = fast_ticks();

        tokio::time::timeout(Duration::from_secs(5), async {
            while app.streaming {
                assert!(step(&mut app, &mut engine, &mut events, &mut ticks).await);
            }
            // Idle: no ticks are polled and the engine pends, so only input can wake.
            assert!(!step(&mut app, &mut engine, &mut events, &mut ticks).await);
        })
        .await
        .expect("loop finished");

        assert_eq!(engine.status(), SessionStatus::Idle);
        assert_eq!(
            app.last_error.as_deref(),
            Some(StreamFailure::Cancelled.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn submit_then_cancel_returns_view_and_engine_to_idle() {
        let mut engine = SessionEngine::new(Arc::new(HangingProvider));
        let mut app = ChatApp::new("m");

        dispatch(Intent::Submit("wait".into()), &mut app, &mut engine);
        assert!(app.streaming);
        assert_eq!(engine.status(), SessionStatus::Streaming);
        assert_eq!(engine.pump_next().await, Some(EngineEvent::StreamStarted));

        dispatch(Intent::Submit("again".into()), &mut app, &mut engine);
        assert!(app.last_error.is_some());

        dispatch(Intent::Cancel, &mut app, &mut engine);
        assert!(!app.streaming);
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert_eq!(
            app.last_error.as_deref(),
            Some(StreamFailure::Cancelled.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn empty_submit_leaves_everything_untouched() {
        let mut engine = SessionEngine::new(Arc::new(HangingProvider));
        let mut app = ChatApp::new("m");

        dispatch(Intent::Submit("  ".into()), &mut app, &mut engine);
        assert!(!app.streaming);
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert_eq!(engine.state().turns().len(), 1);
        assert_eq!(app.last_error, None);
    }

    #[tokio::test]
    async fn cancel_without_stream_is_a_no_op() {
        let mut engine = SessionEngine::new(Arc::new(HangingProvider));
        let mut app = ChatApp::new("m");
        dispatch(Intent::Cancel, &mut app, &mut engine);
        assert_eq!(app.last_error, None);
        assert_eq!(engine.state().turns().len(), 1);
    }
}
