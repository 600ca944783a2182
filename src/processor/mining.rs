use super::{Color, LineContext, LineProcessor, LineType, ProcessedLine};
use crate::history::History;

const STATUS_MARKER: &str = "mining on ";
const HASHRATE_UNIT: &str = "MH/s";
const ACCEPTED_MARKER: &str = "B-)";
const REJECTED_MARKER: &str = ":-(";
const FAILURE_MARKER: &str = "fail";
const SOLUTION_MARKER: &str = "solution found";
const READ_FAILURE: &str = "read response failed: end of file";

/// Five minutes of once-per-second status lines.
const HASHRATE_SAMPLES: usize = 60 * 5;

/// Pool disconnects are common; only a run of them counts as an error.
const READ_FAILURE_LIMIT: u32 = 3;



/*
    @@@
    @MiningProcessor;
    . Colors ethminer's stderr by meaning: status lines dark gray, accepted shares green, failures red.
    . Keeps a rolling hashrate average for the window title and hides status lines reporting 0 MH/s.
    . Flags the supervisor on failures so the miner gets restarted.
*/
#[derive(Debug)]
pub struct MiningProcessor {
    hashrates: History<f64>,
    solution_found: bool,
    read_failures: u32,
}

impl MiningProcessor {
    pub fn new() -> Self {
        Self {
            hashrates: History::new(HASHRATE_SAMPLES),
            solution_found: false,
            read_failures: 0,
        }
    }

    pub fn average_hashrate(&self) -> f64 {
        if self.hashrates.is_empty() {
            return 0.0;
        }
        self.hashrates.iter().sum::<f64>() / self.hashrates.len() as f64
    }

    fn process_error_line(&mut self, ctx: &mut LineContext<'_>, line: &str) -> ProcessedLine {
        if contains_ignore_case(line, STATUS_MARKER) {
            self.solution_found = false;
            let hashrate = parse_hashrate(line).unwrap_or(0.0);
            if hashrate == 0.0 {
                return ProcessedLine::suppressed();
            }
            self.hashrates.push(hashrate);

            let was_mining_on = ctx
                .last_line()
                .is_some_and(|prev| contains_ignore_case(prev, STATUS_MARKER));
            let mut out = ProcessedLine::unchanged(line).with_foreground(Color::DarkGray);
            out.overwrite = was_mining_on;
            return out;
        }

        if contains_ignore_case(line, FAILURE_MARKER) || line.contains(REJECTED_MARKER) {
            self.solution_found = false;
            if contains_ignore_case(line, READ_FAILURE) {
                self.read_failures += 1;
                if self.read_failures >= READ_FAILURE_LIMIT {
                    ctx.flag_error();
                    self.read_failures = 0;
                }
            } else {
                ctx.flag_error();
            }
            return ProcessedLine::unchanged(line).with_foreground(Color::Red);
        }

        if line.contains(ACCEPTED_MARKER) {
            self.solution_found = false;
            return ProcessedLine::unchanged(line).with_foreground(Color::Green);
        }

        if contains_ignore_case(line, SOLUTION_MARKER) {
            self.solution_found = true;
            return ProcessedLine::unchanged(line).with_foreground(Color::DarkGreen);
        }

        let color = if self.solution_found {
            Color::DarkGreen
        } else {
            Color::DarkGray
        };
        ProcessedLine::unchanged(line).with_foreground(color)
    }
}

impl Default for MiningProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl LineProcessor for MiningProcessor {
    fn usage(&self) -> &str {
        "<path-to-ethminer> <arguments-to-ethminer>"
    }

    fn banner(&self) -> &str {
        "ethminer line processor"
    }

    fn window_title(&self) -> Option<String> {
        Some(format!(
            "ethminer hashrate: {:.2} MH/sec",
            self.average_hashrate()
        ))
    }

    fn process_line(
        &mut self,
        ctx: &mut LineContext<'_>,
        line_type: LineType,
        line: &str,
    ) -> ProcessedLine {
        match line_type {
            // ethminer reports everything interesting on stderr
            LineType::Error => self.process_error_line(ctx, line),
            LineType::Output => ProcessedLine::unchanged(line),
        }
    }

    fn reset(&mut self) {
        self.hashrates.clear();
        self.solution_found = false;
        self.read_failures = 0;
    }
}



/// Reads the figure between the last `:` before `MH/s` and the unit itself.
pub fn parse_hashrate(line: &str) -> Option<f64> {
    let unit = line.find(HASHRATE_UNIT)?;
    let colon = line[..unit].rfind(':')?;
    line[colon + 1..unit].trim().replace(',', "").parse().ok()
}

/// `needle` must already be lowercase.
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}
