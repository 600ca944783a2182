//! Pluggable per-line processing.
//!
//! The supervisor only knows the [`LineProcessor`] contract. Concrete processors are
//! statically linked and selected by name from the configuration, see [`from_name`].

pub mod mining;
pub mod passthrough;

use crate::state::{lock_unpoisoned, SupervisionState};
use owo_colors::AnsiColors;
use std::sync::{Arc, Mutex, MutexGuard};

pub use mining::MiningProcessor;
pub use passthrough::PassthroughProcessor;


/// Which stream of the child a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineType {
    Output,
    Error,
}


/// The sixteen-color console palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    DarkRed,
    DarkGreen,
    DarkYellow,
    DarkBlue,
    DarkMagenta,
    DarkCyan,
    Gray,
    DarkGray,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl From<Color> for AnsiColors {
    fn from(color: Color) -> Self {
        match color {
            Color::Black => AnsiColors::Black,
            Color::DarkRed => AnsiColors::Red,
            Color::DarkGreen => AnsiColors::Green,
            Color::DarkYellow => AnsiColors::Yellow,
            Color::DarkBlue => AnsiColors::Blue,
            Color::DarkMagenta => AnsiColors::Magenta,
            Color::DarkCyan => AnsiColors::Cyan,
            Color::Gray => AnsiColors::White,
            Color::DarkGray => AnsiColors::BrightBlack,
            Color::Red => AnsiColors::BrightRed,
            Color::Green => AnsiColors::BrightGreen,
            Color::Yellow => AnsiColors::BrightYellow,
            Color::Blue => AnsiColors::BrightBlue,
            Color::Magenta => AnsiColors::BrightMagenta,
            Color::Cyan => AnsiColors::BrightCyan,
            Color::White => AnsiColors::BrightWhite,
        }
    }
}


/// Result of processing one line.
///
/// `text: None` suppresses the line: nothing is displayed and nothing is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessedLine {
    pub text: Option<String>,
    pub foreground: Option<Color>,
    pub background: Option<Color>,
    /// Replace the previously displayed line instead of appending below it.
    pub overwrite: bool,
}

impl ProcessedLine {
    pub fn unchanged(line: &str) -> Self {
        Self {
            text: Some(line.to_string()),
            ..Default::default()
        }
    }

    pub fn suppressed() -> Self {
        Self::default()
    }

    pub fn with_foreground(mut self, color: Color) -> Self {
        self.foreground = Some(color);
        self
    }

    pub fn with_background(mut self, color: Color) -> Self {
        self.background = Some(color);
        self
    }
}


/// The part of the supervision state a processor may see while handling a line.
/// It is only handed out while the state lock is held.
pub struct LineContext<'a> {
    state: &'a mut SupervisionState,
}

impl<'a> LineContext<'a> {
    pub fn new(state: &'a mut SupervisionState) -> Self {
        Self { state }
    }

    /// Most recent non-blank line recorded before this one.
    pub fn last_line(&self) -> Option<&str> {
        self.state.last_line()
    }

    /// Signals a fatal condition; the watchdog restarts the child on its next tick.
    pub fn flag_error(&mut self) {
        self.state.set_errored();
    }

    pub fn has_errored(&self) -> bool {
        self.state.has_errored()
    }
}


/// Contract implemented by every output processor.
///
/// `process_line` is called for every captured line, from the capture tasks, with the
/// supervision state locked. It must not block.
pub trait LineProcessor: Send {
    /// Command line shape shown in help output.
    fn usage(&self) -> &str;

    /// One-line description shown at startup and in help output.
    fn banner(&self) -> &str;

    /// Polled once per watchdog tick. `None` leaves the title as it is.
    fn window_title(&self) -> Option<String>;

    fn process_line(
        &mut self,
        ctx: &mut LineContext<'_>,
        line_type: LineType,
        line: &str,
    ) -> ProcessedLine;

    /// Drops private per-launch statistics. Only called when configured to reset on restart.
    fn reset(&mut self) {}
}


pub type SharedProcessor = Arc<Mutex<Box<dyn LineProcessor>>>;

pub fn shared(processor: Box<dyn LineProcessor>) -> SharedProcessor {
    Arc::new(Mutex::new(processor))
}

pub(crate) fn lock(processor: &SharedProcessor) -> MutexGuard<'_, Box<dyn LineProcessor>> {
    lock_unpoisoned(processor)
}


pub const PROCESSOR_NAMES: &[&str] = &["passthrough", "default", "ethminer", "mining"];

/*
    @@@
    @from_name();
    . Resolves the configured selector to one of the built-in processors (case-insensitive).
    . Returns None for an unknown selector; the caller reports it as a load failure.
*/
pub fn from_name(name: &str) -> Option<Box<dyn LineProcessor>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "passthrough" | "default" => Some(Box::new(PassthroughProcessor)),
        "ethminer" | "mining" => Some(Box::new(MiningProcessor::new())),
        _ => None,
    }
}
