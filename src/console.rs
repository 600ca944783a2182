use crate::processor::Color;
use crate::state::lock_unpoisoned;
use owo_colors::{AnsiColors, OwoColorize, Style};
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;
use tracing::debug;


/// User-facing display shared by every writer in the process.
/// Each call is one atomic unit: text, colors and the color reset are never interleaved.
pub trait Console: Send + Sync {
    fn write_line(
        &self,
        text: &str,
        foreground: Option<Color>,
        background: Option<Color>,
        overwrite: bool,
    );

    fn set_title(&self, title: &str);

    /// Restores default colors.
    fn reset(&self);

    /// Supervisor status message.
    fn notice(&self, text: &str, color: Color) {
        self.write_line(text, Some(color), None, false);
    }
}



/*
    @@@
    @Terminal;
    . Writes to stdout, styling with ANSI colors only when stdout is a terminal.
    . Window title uses the xterm OSC 0 sequence; cursor-up plus erase-line implements overwrite.
*/
pub struct Terminal {
    ansi: bool,
    guard: Mutex<()>,
}

impl Terminal {
    pub fn stdout() -> Self {
        Self {
            ansi: io::stdout().is_terminal(),
            guard: Mutex::new(()),
        }
    }

    fn emit(&self, bytes: &str) {
        let _held = lock_unpoisoned(&self.guard);
        let mut out = io::stdout().lock();
        if let Err(e) = out.write_all(bytes.as_bytes()).and_then(|_| out.flush()) {
            debug!(error = %e, "console write failed");
        }
    }
}

impl Console for Terminal {
    fn write_line(
        &self,
        text: &str,
        foreground: Option<Color>,
        background: Option<Color>,
        overwrite: bool,
    ) {
        let mut rendered = String::with_capacity(text.len() + 16);
        if overwrite && self.ansi {
            rendered.push_str("\x1b[1A\x1b[2K\r");
        }
        match style(foreground, background) {
            Some(style) if self.ansi => rendered.push_str(&text.style(style).to_string()),
            _ => rendered.push_str(text),
        }
        rendered.push('\n');
        self.emit(&rendered);
    }

    fn set_title(&self, title: &str) {
        if self.ansi {
            self.emit(&format!("\x1b]0;{}\x07", title));
        }
    }

    fn reset(&self) {
        if self.ansi {
            self.emit("\x1b[0m");
        }
    }
}

fn style(foreground: Option<Color>, background: Option<Color>) -> Option<Style> {
    if foreground.is_none() && background.is_none() {
        return None;
    }
    let mut style = Style::new();
    if let Some(fg) = foreground {
        style = style.color(AnsiColors::from(fg));
    }
    if let Some(bg) = background {
        style = style.on_color(AnsiColors::from(bg));
    }
    Some(style)
}
