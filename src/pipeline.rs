use crate::console::Console;
use crate::processor::{self, LineContext, LineType, SharedProcessor};
use crate::state::SharedState;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tracing::{debug, trace};


/// What happened to a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// End-of-stream marker, never shown nor recorded.
    Ignored,
    /// The processor returned no line.
    Suppressed,
    /// Processed while the child is being closed; not shown nor recorded.
    Closing,
    Displayed,
}


#[derive(Clone)]
pub struct OutputPipeline {
    state: SharedState,
    processor: SharedProcessor,
    console: Arc<dyn Console>,
}

impl OutputPipeline {
    pub fn new(state: SharedState, processor: SharedProcessor, console: Arc<dyn Console>) -> Self {
        Self {
            state,
            processor,
            console,
        }
    }



    /*
        @@@
        @handle_line();
        . Runs one line through the active processor while holding the processor and the state locks,
          so the processor's error flag and the recorded output change together.
        . A suppressed line leaves display and history untouched; the processor's side effects stay.
        . While closing, lines are still processed but neither written nor recorded.
        . Only non-blank lines refresh the last-output timestamp and enter the history.
        . The console write happens after both locks are released; a slow terminal must not stall the watchdog.
    */
    pub fn handle_line(&self, line_type: LineType, line: Option<&str>) -> LineOutcome {
        let Some(line) = line else {
            return LineOutcome::Ignored;
        };

        let processed = {
            let mut processor = processor::lock(&self.processor);
            let mut state = self.state.lock();
            let processed = processor.process_line(&mut LineContext::new(&mut state), line_type, line);

            match &processed.text {
                None => {
                    trace!(?line_type, "line suppressed");
                    return LineOutcome::Suppressed;
                }
                Some(_) if state.is_closing() => return LineOutcome::Closing,
                Some(text) if !text.trim().is_empty() => state.record_output(text, Instant::now()),
                Some(_) => {}
            }
            processed
        };

        if let Some(text) = &processed.text {
            self.console.write_line(
                text,
                processed.foreground,
                processed.background,
                processed.overwrite,
            );
        }
        LineOutcome::Displayed
    }



    /// Feeds every line of `reader` through [`handle_line`](Self::handle_line) until end of stream.
    /// Invalid UTF-8 is replaced rather than dropped.
    pub async fn capture<R>(&self, reader: R, line_type: LineType) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        let mut count = 0u64;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                self.handle_line(line_type, None);
                debug!(?line_type, lines = count, "stream closed");
                return Ok(count);
            }
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            let line = String::from_utf8_lossy(&buf);
            self.handle_line(line_type, Some(&line));
            count += 1;
        }
    }
}
