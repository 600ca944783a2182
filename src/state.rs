use crate::history::History;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};


// Shared restart bookkeeping for the supervised process
// Mutated by the supervisor loop, the watchdog, the output pipeline and the active line processor
#[derive(Clone)]
pub struct SharedState(Arc<Mutex<SupervisionState>>);

impl SharedState {
    pub fn new(history_capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(SupervisionState::new(history_capacity))))
    }

    pub fn lock(&self) -> MutexGuard<'_, SupervisionState> {
        lock_unpoisoned(&self.0)
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        matches!(self.0.try_lock(), Err(std::sync::TryLockError::WouldBlock))
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(SupervisionState::default())))
    }
}

/// A panic on another thread must not take the supervisor down with it.
pub(crate) fn lock_unpoisoned<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}



#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            window: Duration::from_secs(120),
        }
    }
}



#[derive(Debug, Default)]
pub struct SupervisionState {
    restart_count: u32,
    last_restart_time: Option<Instant>,
    must_restart: bool,
    has_errored: bool,
    is_closing: bool,
    stopping: bool,
    fault: Option<String>,
    last_output_time: Option<Instant>,
    lines: History<String>,
}

impl SupervisionState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            lines: History::new(history_capacity),
            ..Default::default()
        }
    }



    /*
        @@@
        @too_many_restarts();
        . True once more than `max_restarts` launches were registered and the latest one is within `window` of `now`.
        . The counter is never reset, so spaced-out restarts keep passing even after it is exceeded.
        . Clears `must_restart` when it fires so the loop terminates.
    */
    pub fn too_many_restarts(&mut self, policy: &RestartPolicy, now: Instant) -> bool {
        let recent = self
            .last_restart_time
            .is_some_and(|at| now.saturating_duration_since(at) <= policy.window);
        let result = self.restart_count > policy.max_restarts && recent;
        if result {
            self.must_restart = false;
        }
        result
    }

    /// Counts a launch attempt. Called exactly once per launch.
    pub fn register_restart(&mut self, now: Instant) {
        self.restart_count += 1;
        self.last_restart_time = Some(now);
        self.must_restart = false;
    }

    /// Per-launch reset followed by restart registration.
    pub fn begin_launch(&mut self, now: Instant) {
        self.has_errored = false;
        self.is_closing = false;
        self.last_output_time = None;
        self.register_restart(now);
    }



    pub fn record_output(&mut self, line: &str, now: Instant) {
        self.last_output_time = Some(now);
        self.lines.push(line.to_string());
    }

    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    pub fn last_output_time(&self) -> Option<Instant> {
        self.last_output_time
    }

    /// Time since the last recorded line, if any line was recorded during this launch.
    pub fn silence(&self, now: Instant) -> Option<Duration> {
        self.last_output_time
            .map(|at| now.saturating_duration_since(at))
    }



    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn last_restart_time(&self) -> Option<Instant> {
        self.last_restart_time
    }

    pub fn must_restart(&self) -> bool {
        self.must_restart
    }

    pub fn request_restart(&mut self) {
        self.must_restart = true;
    }

    pub fn has_errored(&self) -> bool {
        self.has_errored
    }

    pub fn set_errored(&mut self) {
        self.has_errored = true;
    }

    pub fn is_closing(&self) -> bool {
        self.is_closing
    }

    pub fn begin_closing(&mut self) {
        self.is_closing = true;
    }

    pub fn finish_closing(&mut self) {
        self.is_closing = false;
    }



    /// Stop for good: no relaunch after the current process is gone.
    pub fn request_stop(&mut self) {
        self.stopping = true;
        self.must_restart = false;
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn record_fault(&mut self, reason: impl Into<String>) {
        self.request_stop();
        self.fault.get_or_insert_with(|| reason.into());
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    #[test]
    fn clustered_restarts_trip_the_guard() {
        let policy = RestartPolicy::default();
        let base = Instant::now();
        let mut state = SupervisionState::new(50);

        for secs in [0, 30, 70, 110] {
            assert!(!state.too_many_restarts(&policy, at(base, secs)));
            state.begin_launch(at(base, secs));
        }

        assert_eq!(state.restart_count(), 4);
        state.request_restart();
        assert!(state.too_many_restarts(&policy, at(base, 110)));
        assert!(!state.must_restart());
    }

    #[test]
    fn spaced_restarts_do_not_trip_the_guard() {
        let policy = RestartPolicy::default();
        let base = Instant::now();
        let mut state = SupervisionState::new(50);

        for secs in [0, 200, 210, 220] {
            assert!(!state.too_many_restarts(&policy, at(base, secs)));
            state.begin_launch(at(base, secs));
        }

        // counter already above the limit, but the last launch is outside the window
        assert_eq!(state.restart_count(), 4);
        assert!(!state.too_many_restarts(&policy, at(base, 341)));
        state.begin_launch(at(base, 341));

        // the next one clusters again
        assert!(state.too_many_restarts(&policy, at(base, 400)));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let policy = RestartPolicy::default();
        let base = Instant::now();
        let mut state = SupervisionState::new(50);
        for _ in 0..4 {
            state.register_restart(base);
        }
        assert!(state.too_many_restarts(&policy, at(base, 120)));
        assert!(!state.too_many_restarts(&policy, at(base, 121)));
    }

    #[test]
    fn launch_resets_per_process_flags_only() {
        let now = Instant::now();
        let mut state = SupervisionState::new(50);
        state.set_errored();
        state.begin_closing();
        state.request_restart();
        state.record_output("hello", now);

        state.begin_launch(now);

        assert!(!state.has_errored());
        assert!(!state.is_closing());
        assert!(!state.must_restart());
        assert!(state.last_output_time().is_none());
        assert_eq!(state.last_line(), Some("hello"));
        assert_eq!(state.restart_count(), 1);
        assert_eq!(state.last_restart_time(), Some(now));
    }

    #[test]
    fn stop_request_overrides_pending_restart() {
        let mut state = SupervisionState::new(50);
        state.request_restart();
        state.record_fault("capture failed");
        state.record_fault("second fault");

        assert!(state.is_stopping());
        assert!(!state.must_restart());
        assert_eq!(state.fault(), Some("capture failed"));
    }
}
