//! Full-screen terminal chat view.

pub mod app;
pub mod event;
pub mod markdown;
pub mod theme;

pub use event::run_tui;
