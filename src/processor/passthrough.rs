use super::{LineContext, LineProcessor, LineType, ProcessedLine};

/// Shows every line exactly as the child wrote it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughProcessor;

impl LineProcessor for PassthroughProcessor {
    fn usage(&self) -> &str {
        "<path-to-program> <program-arguments>"
    }

    fn banner(&self) -> &str {
        "pass-through line processor"
    }

    fn window_title(&self) -> Option<String> {
        None
    }

    fn process_line(
        &mut self,
        _ctx: &mut LineContext<'_>,
        _line_type: LineType,
        line: &str,
    ) -> ProcessedLine {
        ProcessedLine::unchanged(line)
    }
}
