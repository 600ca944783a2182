use crate::console::Console;
use crate::control::{ChildProcess, ProcessHandle, Shutdown, DEFAULT_GRACE, KILL_REAP_TIMEOUT};
use crate::error::ProxyError;
use crate::history::OUTPUT_HISTORY;
use crate::pipeline::OutputPipeline;
use crate::processor::{self, Color, LineType, SharedProcessor};
use crate::state::{RestartPolicy, SharedState};
use crate::watchdog::{Watchdog, DEFAULT_PERIOD, DEFAULT_STALE_AFTER};
use async_trait::async_trait;
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout, Duration, Instant};
use tracing::{error, info, warn};

/// How long capture tasks may keep draining buffered output after the child exited.
const CAPTURE_DRAIN: Duration = Duration::from_secs(1);


/// The child program and its arguments, passed on exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn display_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}


pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A started child: its handle plus the two output streams to capture.
pub struct Spawned {
    pub handle: Arc<dyn ProcessHandle>,
    pub stdout: Option<BoxedReader>,
    pub stderr: Option<BoxedReader>,
}

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, command: &CommandLine) -> std::io::Result<Spawned>;
}



/*
    @@@
    @TokioSpawner;
    . Starts the program directly (no shell) with stdin, stdout and stderr piped.
    . The child gets its own process group so a terminal Ctrl-C reaches only the supervisor.
    . A reaper task owns the tokio Child and publishes its exit status.
*/
pub struct TokioSpawner;

#[async_trait]
impl ProcessSpawner for TokioSpawner {
    async fn spawn(&self, command: &CommandLine) -> std::io::Result<Spawned> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(|s| Box::new(s) as BoxedReader);
        let stderr = child.stderr.take().map(|s| Box::new(s) as BoxedReader);
        info!(pid = ?pid, program = %command.display_name(), "spawned child");

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let _ = tx.send(Some(status));
                }
                Err(e) => error!(pid = ?pid, error = %e, "failed to wait on child"),
            }
        });

        Ok(Spawned {
            handle: Arc::new(ChildProcess::new(pid, rx, stdin)),
            stdout,
            stderr,
        })
    }
}



#[derive(Debug, Clone)]
pub struct Settings {
    pub restart: RestartPolicy,
    pub watchdog_period: Duration,
    pub stale_after: Duration,
    pub grace: Duration,
    pub history_capacity: usize,
    /// Call `LineProcessor::reset` before every relaunch.
    pub reset_processor: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            restart: RestartPolicy::default(),
            watchdog_period: DEFAULT_PERIOD,
            stale_after: DEFAULT_STALE_AFTER,
            grace: DEFAULT_GRACE,
            history_capacity: OUTPUT_HISTORY,
            reset_processor: false,
        }
    }
}


/// How a supervision run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The child exited and nothing asked for a restart.
    Finished,
    /// Too many restarts inside the restart window.
    Aborted,
    /// Stopped by an external signal.
    Interrupted,
}


enum Admission {
    Launch,
    Refused,
    Stopped,
}


pub struct Supervisor {
    settings: Settings,
    state: SharedState,
    processor: SharedProcessor,
    console: Arc<dyn Console>,
    shutdown: Arc<Shutdown>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl Supervisor {
    pub fn new(
        settings: Settings,
        processor: SharedProcessor,
        console: Arc<dyn Console>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        let state = SharedState::new(settings.history_capacity);
        let shutdown = Arc::new(Shutdown::new(state.clone(), console.clone(), settings.grace));
        Self {
            settings,
            state,
            processor,
            console,
            shutdown,
            spawner,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Escalation entry point for signal handlers.
    pub fn shutdown(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }



    /*
        @@@
        @run();
        . Evaluates the restart policy before every launch, the first one included.
        . Launch: reset per-process flags, register the restart, spawn, wire capture tasks and the watchdog.
        . Blocks until the child terminates, then relaunches only when something set `must_restart`.
        . A child that cannot be started is fatal and never retried.
    */
    pub async fn run(&self, command: &CommandLine) -> Result<Outcome, ProxyError> {
        let name = command.display_name();
        let mut launches = 0u32;

        loop {
            let admitted = {
                let mut state = self.state.lock();
                let now = Instant::now();
                if state.is_stopping() {
                    Admission::Stopped
                } else if state.too_many_restarts(&self.settings.restart, now) {
                    Admission::Refused
                } else {
                    state.begin_launch(now);
                    info!(program = %name, restart_count = state.restart_count(), "launching");
                    Admission::Launch
                }
            };
            match admitted {
                Admission::Stopped => return self.stopped(),
                Admission::Refused => {
                    warn!(program = %name, "too many restarts, giving up");
                    self.console
                        .notice("Too many restarts in a short time. Aborting.", Color::Red);
                    self.console.reset();
                    return Ok(Outcome::Aborted);
                }
                Admission::Launch => {}
            }

            if launches > 0 && self.settings.reset_processor {
                processor::lock(&self.processor).reset();
            }
            launches += 1;

            self.console.reset();
            self.console
                .notice(&format!("Starting process {}...", name), Color::White);

            let spawned = match self.spawner.spawn(command).await {
                Ok(spawned) => spawned,
                Err(source) => {
                    error!(program = %name, error = %source, "could not start child");
                    self.console.notice(&format!("{} not found", name), Color::Red);
                    return Err(ProxyError::LaunchFailed {
                        program: command.program.clone(),
                        source,
                    });
                }
            };

            let status = self.supervise(spawned).await;
            self.console.notice("Process closed.", Color::White);
            info!(program = %name, ?status, "child exited");

            let (stopping, must_restart) = {
                let state = self.state.lock();
                (state.is_stopping(), state.must_restart())
            };
            if stopping {
                return self.stopped();
            }
            if !must_restart {
                return Ok(Outcome::Finished);
            }
            info!(program = %name, "restart requested");
        }
    }

    /// One launch from tracking to release.
    async fn supervise(&self, spawned: Spawned) -> Option<ExitStatus> {
        let Spawned {
            handle,
            stdout,
            stderr,
        } = spawned;

        let (stop_tx, stop_rx) = watch::channel(false);
        self.shutdown.track(handle.clone(), stop_tx);

        let pipeline = OutputPipeline::new(
            self.state.clone(),
            self.processor.clone(),
            self.console.clone(),
        );
        let captures: Vec<JoinHandle<()>> = [(stdout, LineType::Output), (stderr, LineType::Error)]
            .into_iter()
            .filter_map(|(reader, line_type)| {
                reader.map(|reader| self.spawn_capture(pipeline.clone(), reader, line_type))
            })
            .collect();

        let mut watchdog = tokio::spawn(
            Watchdog::new(
                self.state.clone(),
                self.processor.clone(),
                self.console.clone(),
                self.shutdown.clone(),
            )
            .with_period(self.settings.watchdog_period)
            .with_stale_after(self.settings.stale_after)
            .run(stop_rx),
        );

        // a signal may have arrived before the child was tracked
        if self.state.lock().is_stopping() {
            self.shutdown.escalate().await;
        }

        let mut watchdog_joined = false;
        let status = tokio::select! {
            biased;
            status = handle.wait() => status,
            joined = &mut watchdog => {
                watchdog_joined = true;
                self.task_ended("watchdog", joined).await;
                // a child that survived a failed kill is treated as gone
                match timeout(KILL_REAP_TIMEOUT, handle.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        error!(pid = ?handle.pid(), "child still running after its watchdog ended, abandoning it");
                        None
                    }
                }
            }
        };

        self.shutdown.release().await;
        if !watchdog_joined {
            let joined = watchdog.await;
            self.task_ended("watchdog", joined).await;
        }
        for mut capture in captures {
            match timeout(CAPTURE_DRAIN, &mut capture).await {
                Ok(joined) => self.task_ended("output capture", joined).await,
                Err(_) => {
                    // a grandchild may still hold the pipe; its output no longer belongs to this launch
                    warn!("output still open after exit, abandoning capture");
                    capture.abort();
                }
            }
        }
        status
    }

    async fn task_ended(&self, task: &str, joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            self.shutdown.fault(format!("{} failed: {}", task, e)).await;
        }
    }

    fn spawn_capture(
        &self,
        pipeline: OutputPipeline,
        reader: BoxedReader,
        line_type: LineType,
    ) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.capture(reader, line_type).await {
                shutdown
                    .fault(format!("reading {:?} stream failed: {}", line_type, e))
                    .await;
            }
        })
    }

    fn stopped(&self) -> Result<Outcome, ProxyError> {
        self.console.reset();
        match self.state.lock().fault() {
            Some(reason) => Err(ProxyError::Internal(anyhow::anyhow!(reason.to_string()))),
            None => Ok(Outcome::Interrupted),
        }
    }
}
