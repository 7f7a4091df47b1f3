//! Terminal styling for the summary report.
//!
//! Thin wrapper over anstyle. Whether escape codes are emitted is decided by
//! the process-wide [`colorchoice::ColorChoice`] set in `main`.

use anstyle::{AnsiColor, Color, Effects, Style};
use colorchoice::ColorChoice;
use std::fmt;

/// Whether styled output should carry ANSI escapes.
pub fn colors_enabled() -> bool {
    !matches!(ColorChoice::global(), ColorChoice::Never)
}

/// Disables color for the rest of the process.
pub fn disable_colors() {
    ColorChoice::Never.write_global();
}

pub fn style(text: impl fmt::Display) -> StyledString {
    StyledString {
        text: text.to_string(),
        style: Style::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledString {
    text: String,
    style: Style,
}

impl StyledString {
    fn fg(mut self, color: AnsiColor) -> Self {
        self.style = self.style.fg_color(Some(Color::Ansi(color)));
        self
    }

    pub fn red(self) -> Self {
        self.fg(AnsiColor::Red)
    }

    pub fn green(self) -> Self {
        self.fg(AnsiColor::Green)
    }

    pub fn bold(mut self) -> Self {
        self.style = self.style.effects(self.style.get_effects() | Effects::BOLD);
        self
    }

    /// Visible width, ignoring escape codes.
    pub fn width(&self) -> usize {
        self.text.chars().count()
    }

    pub fn render(&self, color: bool) -> String {
        if color {
            format!(
                "{}{}{}",
                self.style.render(),
                self.text,
                self.style.render_reset()
            )
        } else {
            self.text.clone()
        }
    }
}

impl fmt::Display for StyledString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(colors_enabled()))
    }
}
