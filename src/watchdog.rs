use crate::console::Console;
use crate::control::Shutdown;
use crate::processor::{self, Color, SharedProcessor};
use crate::state::SharedState;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);


/// Why the watchdog asked for a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Stale(Duration),
    Errored,
}


pub struct Watchdog {
    state: SharedState,
    processor: SharedProcessor,
    console: Arc<dyn Console>,
    shutdown: Arc<Shutdown>,
    period: Duration,
    stale_after: Duration,
}

impl Watchdog {
    pub fn new(
        state: SharedState,
        processor: SharedProcessor,
        console: Arc<dyn Console>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            state,
            processor,
            console,
            shutdown,
            period: DEFAULT_PERIOD,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }



    /*
        @@@
        @check();
        . Skipped entirely while the process is being closed.
        . Stale output wins over an error flag; at most one trigger per tick.
        . The error trigger needs the tracked process to still be alive, read under the same locks as the flag.
        . On a trigger, `must_restart` is set before the locks are released.
    */
    pub fn check(&self, now: Instant) -> Option<Trigger> {
        self.shutdown.with_liveness(|alive| {
            let mut state = self.state.lock();
            if state.is_closing() {
                return None;
            }

            let trigger = match state.silence(now) {
                Some(silence) if silence > self.stale_after => Some(Trigger::Stale(silence)),
                _ if state.has_errored() && alive => Some(Trigger::Errored),
                _ => None,
            };
            if trigger.is_some() {
                state.request_restart();
            }
            trigger
        })
    }

    /// Pushes the processor's status to the window title. Runs even while closing.
    pub fn refresh_title(&self) {
        let title = processor::lock(&self.processor).window_title();
        if let Some(title) = title {
            self.console.set_title(&title);
        }
    }

    fn announce(&self, trigger: Trigger) {
        match trigger {
            Trigger::Stale(silence) => {
                warn!(silent_secs = silence.as_secs(), "output went stale, restarting");
                self.console
                    .notice("Last output was more than one minute ago.", Color::Yellow);
            }
            Trigger::Errored => {
                warn!("line processor flagged an error, restarting");
                self.console.notice("Received error.", Color::Magenta);
            }
        }
    }

    /// Runs one check unless an escalation started earlier is still in progress; the title is refreshed either way.
    fn tick(&self, escalation: &mut Option<JoinHandle<bool>>) {
        let busy = escalation.as_ref().is_some_and(|e| !e.is_finished());
        if !busy {
            if let Some(trigger) = self.check(Instant::now()) {
                self.announce(trigger);
                let shutdown = self.shutdown.clone();
                *escalation = Some(tokio::spawn(async move { shutdown.escalate().await }));
            }
        }
        self.refresh_title();
    }



    /*
        @@@
        @run();
        . Ticks every period until `stop` flips to true or its sender goes away.
        . A triggered escalation runs on its own task, so the title keeps refreshing through the grace period.
        . The escalation task outlives the loop; it is the one that flips `stop`.
    */
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut escalation = None;

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => self.tick(&mut escalation),
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("watchdog stopped");
    }
}
