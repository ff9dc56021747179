//! Status line formatting

use colored::{Color, Colorize};

/// Output styling configuration
pub struct OutputStyle {
    pub use_colors: bool,
}

impl Default for OutputStyle {
    fn default() -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stdout),
        }
    }
}

impl OutputStyle {
    /// Plain output, no escape codes
    pub fn plain() -> Self {
        Self { use_colors: false }
    }

    /// `✓ msg`
    pub fn success(&self, msg: &str) -> String {
        self.marked("✓", Color::Green, msg)
    }

    /// `✗ msg`
    pub fn error(&self, msg: &str) -> String {
        self.marked("✗", Color::Red, msg)
    }

    /// `⚠ msg`
    pub fn warning(&self, msg: &str) -> String {
        self.marked("⚠", Color::Yellow, msg)
    }

    /// `ℹ msg`
    pub fn info(&self, msg: &str) -> String {
        self.marked("ℹ", Color::Blue, msg)
    }

    /// Format a process tag
    pub fn tag(&self, tag: &str) -> String {
        if self.use_colors {
            tag.cyan().to_string()
        } else {
            tag.to_string()
        }
    }

    fn marked(&self, symbol: &str, color: Color, msg: &str) -> String {
        if self.use_colors {
            format!("{} {}", symbol.color(color).bold(), msg)
        } else {
            format!("{} {}", symbol, msg)
        }
    }
}
