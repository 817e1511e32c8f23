//! Centralized TUI colors built on ratatui's Tailwind CSS palette.

use ratatui::style::Color;
use ratatui::style::palette::tailwind;

/// Visual tokens for the chat view.
pub struct Theme {
    /// Primary foreground/text color.
    pub fg: Color,
    /// Dimmed foreground for placeholder and hint text.
    pub fg_dim: Color,
    /// Default border color.
    pub border: Color,
    /// Border color for the prompt box while it accepts input.
    pub border_active: Color,
    /// Brand color used in the title bar.
    pub accent: Color,
    /// Error text.
    pub error: Color,
    /// Notices such as cancellation.
    pub warning: Color,
    /// "You:" label.
    pub user_label: Color,
    /// "Gemini:" label.
    pub assistant_label: Color,
    /// Busy indicator.
    pub spinner: Color,
    /// Model name in the title bar.
    pub model: Color,
    /// Inline code and code blocks in answers.
    pub code: Color,
    /// Link destinations in answers.
    pub link: Color,
}

impl Theme {
    /// The default dark theme.
    pub const fn default_dark() -> Self {
        Self {
            fg: tailwind::SLATE.c100,
            fg_dim: tailwind::SLATE.c500,
            border: tailwind::SLATE.c700,
            border_active: tailwind::VIOLET.c500,
            accent: tailwind::VIOLET.c400,
            error: tailwind::RED.c500,
            warning: tailwind::AMBER.c500,
            user_label: tailwind::VIOLET.c400,
            assistant_label: tailwind::BLUE.c500,
            spinner: tailwind::AMBER.c400,
            model: tailwind::EMERALD.c400,
            code: tailwind::ORANGE.c300,
            link: tailwind::SKY.c400,
        }
    }
}

/// Global theme instance.
pub const THEME: Theme = Theme::default_dark();
