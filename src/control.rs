use crate::console::Console;
use crate::processor::Color;
use crate::state::{lock_unpoisoned, SharedState};
use anyhow::Context;
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tokio::time::{timeout, Duration, Instant};
use tracing::{error, info, warn};

/// Time a child gets to exit after the graceful stop request.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(20);

/// Bound on waiting for the reaper after SIGKILL.
pub const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);


/// A launched child as seen by the escalation sequence.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn has_exited(&self) -> bool;

    /// Asks the child to close on its own.
    fn request_stop(&self) -> anyhow::Result<()>;

    fn kill(&self) -> anyhow::Result<()>;

    /// Resolves once the child has terminated. `None` when the status could not be collected.
    async fn wait(&self) -> Option<ExitStatus>;
}



/*
    @@@
    @ChildProcess;
    . A spawned OS process whose tokio Child is owned by a reaper task; exit is published on a watch channel.
    . Graceful stop is SIGTERM, kill is SIGKILL, both sent by pid once the reaper has not seen an exit yet.
    . Holds the child's stdin open for the lifetime of the launch.
*/
pub struct ChildProcess {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitStatus>>,
    _stdin: Mutex<Option<ChildStdin>>,
}

impl ChildProcess {
    pub fn new(
        pid: Option<u32>,
        exit: watch::Receiver<Option<ExitStatus>>,
        stdin: Option<ChildStdin>,
    ) -> Self {
        Self {
            pid,
            exit,
            _stdin: Mutex::new(stdin),
        }
    }

    fn signal(&self, sig: Signal) -> anyhow::Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        let pid = self.pid.context("child has no pid")?;
        kill(Pid::from_raw(pid as i32), sig)
            .with_context(|| format!("failed to send {:?} to {}", sig, pid))
    }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    fn request_stop(&self) -> anyhow::Result<()> {
        self.signal(Signal::SIGTERM)
    }

    fn kill(&self) -> anyhow::Result<()> {
        self.signal(Signal::SIGKILL)
    }

    async fn wait(&self) -> Option<ExitStatus> {
        let mut exit = self.exit.clone();
        let status = match exit.wait_for(Option::is_some).await {
            Ok(status) => *status,
            // reaper gone without publishing
            Err(_) => None,
        };
        status
    }
}



/// External reasons to stop supervising.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Ctrl-C at the terminal.
    CtrlC,
    /// Terminal closed, session ended or system shutdown.
    Close,
}

struct Tracked {
    handle: Arc<dyn ProcessHandle>,
    watchdog_stop: watch::Sender<bool>,
}


pub struct Shutdown {
    state: SharedState,
    console: Arc<dyn Console>,
    grace: Duration,
    tracked: Mutex<Option<Tracked>>,
    // held for a whole escalation so that concurrent callers queue behind it
    gate: tokio::sync::Mutex<()>,
}

impl Shutdown {
    pub fn new(state: SharedState, console: Arc<dyn Console>, grace: Duration) -> Self {
        Self {
            state,
            console,
            grace,
            tracked: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Makes `handle` the current process. `watchdog_stop` is signalled when it is released.
    pub fn track(&self, handle: Arc<dyn ProcessHandle>, watchdog_stop: watch::Sender<bool>) {
        let previous = lock_unpoisoned(&self.tracked).replace(Tracked {
            handle,
            watchdog_stop,
        });
        if let Some(previous) = previous {
            warn!(pid = ?previous.handle.pid(), "replacing a process that was never released");
            let _ = previous.watchdog_stop.send(true);
        }
    }

    pub fn is_tracking(&self) -> bool {
        lock_unpoisoned(&self.tracked).is_some()
    }

    /// Tracked and not yet exited, evaluated together with `check` under the tracking lock.
    pub fn with_liveness<T>(&self, check: impl FnOnce(bool) -> T) -> T {
        let tracked = lock_unpoisoned(&self.tracked);
        let alive = tracked.as_ref().is_some_and(|t| !t.handle.has_exited());
        check(alive)
    }



    /*
        @@@
        @escalate();
        . Takes the tracked process and marks the state as closing in one step; with nothing tracked it is a no-op.
        . Already exited: skip straight to cleanup. Otherwise send the graceful stop;
          if that cannot be sent, kill at once, else wait up to the grace period and kill.
        . Cleanup stops the watchdog, clears the closing flag and resets console colors.
        . Returns whether this call did the teardown.
    */
    pub async fn escalate(&self) -> bool {
        let _gate = self.gate.lock().await;

        let tracked = {
            let mut slot = lock_unpoisoned(&self.tracked);
            let tracked = slot.take();
            if tracked.is_some() {
                self.state.lock().begin_closing();
            }
            tracked
        };
        let Some(tracked) = tracked else {
            return false;
        };
        let handle = &tracked.handle;
        let pid = handle.pid();

        if handle.has_exited() {
            self.console.notice("Process already closed.", Color::White);
        } else {
            self.console.notice("Closing process...", Color::White);
            let started = Instant::now();
            match handle.request_stop() {
                Err(e) => {
                    warn!(?pid, error = %e, "graceful stop could not be requested, killing");
                    self.force_kill(handle.as_ref()).await;
                }
                Ok(()) => {
                    info!(?pid, grace_secs = self.grace.as_secs(), "graceful stop requested");
                    match timeout(self.grace, handle.wait()).await {
                        Ok(status) => {
                            info!(?pid, ?status, elapsed_ms = started.elapsed().as_millis() as u64, "stopped gracefully");
                        }
                        Err(_) => {
                            self.console
                                .notice("Graceful stop failed, terminating...", Color::Magenta);
                            warn!(?pid, "still running after grace period, killing");
                            self.force_kill(handle.as_ref()).await;
                        }
                    }
                }
            }
        }

        let _ = tracked.watchdog_stop.send(true);
        self.state.lock().finish_closing();
        self.console.reset();
        true
    }

    async fn force_kill(&self, handle: &dyn ProcessHandle) {
        if let Err(e) = handle.kill() {
            // nothing more can be done here; the loop carries on as if it were gone
            error!(pid = ?handle.pid(), error = %e, "failed to kill");
            return;
        }
        if timeout(KILL_REAP_TIMEOUT, handle.wait()).await.is_err() {
            error!(pid = ?handle.pid(), "no exit status after kill");
        }
    }



    /// Bookkeeping after the process ended by itself. Waits for a running escalation to finish first.
    pub async fn release(&self) {
        let _gate = self.gate.lock().await;
        if let Some(tracked) = lock_unpoisoned(&self.tracked).take() {
            let _ = tracked.watchdog_stop.send(true);
        }
        self.state.lock().finish_closing();
    }

    /// Stop supervising: no relaunch, tear down the current process.
    pub async fn interrupt(&self, interrupt: Interrupt) -> bool {
        let message = match interrupt {
            Interrupt::CtrlC => "Received ^C.",
            Interrupt::Close => "Received close event.",
        };
        self.console.notice(message, Color::White);
        info!(?interrupt, "interrupt received");
        self.state.lock().request_stop();
        self.escalate().await
    }

    /// An internal failure ends the current launch and the supervisor with it.
    pub async fn fault(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        error!(%reason, "internal fault");
        self.console.notice(&format!("Internal error: {}", reason), Color::Red);
        self.state.lock().record_fault(reason);
        self.escalate().await
    }
}
