//! Markdown to styled terminal lines.

use std::fmt::Write as _;

use proto::FormatError;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use ratatui::{
    style::{Modifier, Style},
    text::{Line, Span},
};

use super::theme::THEME;

/// Turns accumulated answer text into display text.
///
/// Must be pure: the same input always yields the same output.
pub trait Formatter {
    /// Formats `markdown` for display.
    fn format(&self, markdown: &str) -> Result<String, FormatError>;

    /// Formats `markdown` as styled lines.
    ///
    /// Defaults to the unstyled lines of [`Formatter::format`].
    fn format_lines(&self, markdown: &str) -> Result<Vec<Line<'static>>, FormatError> {
        Ok(self
            .format(markdown)?
            .lines()
            .map(|line| Line::from(line.to_string()))
            .collect())
    }
}

/// Renders CommonMark as indented terminal text with inline styling.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format(&self, markdown: &str) -> Result<String, FormatError> {
        let mut out = String::new();
        for line in self.format_lines(markdown)? {
            writeln!(out, "{}", plain_text(&line))?;
        }
        Ok(out.trim_end_matches('\n').to_string())
    }

    fn format_lines(&self, markdown: &str) -> Result<Vec<Line<'static>>, FormatError> {
        let options =
            Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
        let mut writer = LineWriter::default();
        for event in Parser::new_ext(markdown, options) {
            writer.handle(event);
        }
        Ok(writer.finish())
    }
}

/// Concatenated span text of `line`.
pub(super) fn plain_text(line: &Line<'_>) -> String {
    line.spans.iter().map(|span| span.content.as_ref()).collect()
}

#[derive(Default)]
struct LineWriter {
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    quote_depth: usize,
    // One entry per open list; `Some(n)` is the next ordinal of an ordered list.
    lists: Vec<Option<u64>>,
    in_code_block: bool,
    links: Vec<String>,
    // Counters so nested emphasis unwinds correctly.
    bold: usize,
    italic: usize,
    struck: usize,
    in_heading: bool,
    in_cell: bool,
    cell: String,
    row: Vec<String>,
}

impl LineWriter {
    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) if self.in_code_block => {
                let code = Style::default().fg(THEME.code);
                for line in text.lines() {
                    self.spans.push(Span::raw("    "));
                    self.push_styled(line, code);
                    self.flush_line();
                }
            }
            Event::Text(text) => self.push_text(&text),
            Event::Code(code) => {
                self.push_styled(&format!("`{code}`"), Style::default().fg(THEME.code));
            }
            Event::SoftBreak => self.push_text(" "),
            Event::HardBreak => self.flush_line(),
            Event::Rule => {
                self.flush_line();
                self.push_styled("────────", Style::default().fg(THEME.fg_dim));
                self.flush_line();
                self.blank_line();
            }
            Event::TaskListMarker(done) => self.push_text(if done { "[x] " } else { "[ ] " }),
            Event::Html(html) => {
                self.push_text(html.trim_end());
                self.flush_line();
            }
            Event::InlineHtml(html) => self.push_text(&html),
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush_line();
                self.in_heading = true;
                self.push_text(&format!("{} ", "#".repeat(level as usize)));
            }
            Tag::Strong => self.bold += 1,
            Tag::Emphasis => self.italic += 1,
            Tag::Strikethrough => self.struck += 1,
            Tag::CodeBlock(_) => {
                self.flush_line();
                self.in_code_block = true;
            }
            Tag::List(start) => {
                self.flush_line();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush_line();
                let indent = "  ".repeat(self.lists.len().saturating_sub(1));
                let marker = match self.lists.last_mut() {
                    Some(Some(next)) => {
                        let marker = format!("{next}. ");
                        *next += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                self.push_styled(&indent, Style::default());
                self.push_styled(&marker, Style::default().fg(THEME.accent));
            }
            Tag::BlockQuote(..) => {
                self.flush_line();
                self.quote_depth += 1;
            }
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                self.links.push(dest_url.to_string());
            }
            Tag::Table(_) => self.flush_line(),
            Tag::TableHead | Tag::TableRow => self.row.clear(),
            Tag::TableCell => {
                self.in_cell = true;
                self.cell.clear();
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush_line();
                if self.lists.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Heading(_) => {
                self.in_heading = false;
                self.flush_line();
                self.blank_line();
            }
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            TagEnd::Strikethrough => self.struck = self.struck.saturating_sub(1),
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.blank_line();
            }
            TagEnd::List(_) => {
                self.flush_line();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Item => self.flush_line(),
            TagEnd::BlockQuote(..) => {
                self.flush_line();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.blank_line();
            }
            TagEnd::Link | TagEnd::Image => {
                if let Some(dest) = self.links.pop()
                    && !dest.is_empty()
                {
                    self.push_styled(&format!(" ({dest})"), Style::default().fg(THEME.fg_dim));
                }
            }
            TagEnd::TableCell => {
                self.in_cell = false;
                self.row.push(std::mem::take(&mut self.cell));
            }
            TagEnd::TableHead => {
                let header = self.row.join(" | ");
                let rule = self
                    .row
                    .iter()
                    .map(|cell| "-".repeat(cell.chars().count().max(3)))
                    .collect::<Vec<_>>()
                    .join("-|-");
                self.push_styled(&header, Style::default().add_modifier(Modifier::BOLD));
                self.flush_line();
                self.push_styled(&rule, Style::default().fg(THEME.fg_dim));
                self.flush_line();
            }
            TagEnd::TableRow => {
                let row = self.row.join(" | ");
                self.push_styled(&row, Style::default());
                self.flush_line();
            }
            TagEnd::Table => self.blank_line(),
            _ => {}
        }
    }

    fn style(&self) -> Style {
        let mut style = Style::default();
        if self.in_heading {
            style = style.fg(THEME.accent).add_modifier(Modifier::BOLD);
        }
        if self.bold > 0 {
            style = style.add_modifier(Modifier::BOLD);
        }
        if self.italic > 0 {
            style = style.add_modifier(Modifier::ITALIC);
        }
        if self.struck > 0 {
            style = style.add_modifier(Modifier::CROSSED_OUT);
        }
        if !self.links.is_empty() {
            style = style.fg(THEME.link).add_modifier(Modifier::UNDERLINED);
        }
        style
    }

    fn push_text(&mut self, text: &str) {
        let style = self.style();
        self.push_styled(text, style);
    }

    fn push_styled(&mut self, text: &str, style: Style) {
        if self.in_cell {
            self.cell.push_str(text);
        } else if !text.is_empty() {
            self.spans.push(Span::styled(text.to_string(), style));
        }
    }

    fn flush_line(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        let mut spans = Vec::with_capacity(self.spans.len() + 1);
        if self.quote_depth > 0 {
            spans.push(Span::styled(
                "│ ".repeat(self.quote_depth),
                Style::default().fg(THEME.fg_dim),
            ));
        }
        spans.append(&mut self.spans);
        self.lines.push(Line::from(spans));
    }

    fn blank_line(&mut self) {
        if self.lines.last().is_some_and(|line| !line.spans.is_empty()) {
            self.lines.push(Line::default());
        }
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush_line();
        while self.lines.last().is_some_and(|line| line.spans.is_empty()) {
            self.lines.pop();
        }
        self.lines
    }
}
