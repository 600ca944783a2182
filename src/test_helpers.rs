//! In-memory stand-ins for the console, the child process and the spawner,
//! shared by unit tests and the integration tests under `tests/`.

use crate::console::Console;
use crate::control::ProcessHandle;
use crate::processor::{Color, LineContext, LineProcessor, LineType, ProcessedLine};
use crate::runtime::{BoxedReader, CommandLine, ProcessSpawner, Spawned};
use crate::state::lock_unpoisoned;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{self, Cursor};
use std::os::unix::process::ExitStatusExt;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    Line {
        text: String,
        foreground: Option<Color>,
        background: Option<Color>,
        overwrite: bool,
    },
    Title(String),
    Reset,
}

/// Console that remembers everything written to it.
#[derive(Default)]
pub struct RecordingConsole {
    events: Mutex<Vec<ConsoleEvent>>,
}

impl RecordingConsole {
    pub fn events(&self) -> Vec<ConsoleEvent> {
        lock_unpoisoned(&self.events).clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ConsoleEvent::Line { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ConsoleEvent::Title(title) => Some(title),
                _ => None,
            })
            .collect()
    }

    pub fn resets(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ConsoleEvent::Reset))
            .count()
    }
}

impl Console for RecordingConsole {
    fn write_line(
        &self,
        text: &str,
        foreground: Option<Color>,
        background: Option<Color>,
        overwrite: bool,
    ) {
        lock_unpoisoned(&self.events).push(ConsoleEvent::Line {
            text: text.to_string(),
            foreground,
            background,
            overwrite,
        });
    }

    fn set_title(&self, title: &str) {
        lock_unpoisoned(&self.events).push(ConsoleEvent::Title(title.to_string()));
    }

    fn reset(&self) {
        lock_unpoisoned(&self.events).push(ConsoleEvent::Reset);
    }
}



/// How a fake child reacts to the graceful stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    /// Exits with status 0.
    Exits,
    /// Keeps running until killed.
    Ignores,
    /// The request cannot even be sent.
    Fails,
    /// Ignores the stop request and the kill fails too.
    Survives,
}

pub struct FakeProcess {
    pid: u32,
    behavior: StopBehavior,
    exit: watch::Sender<Option<ExitStatus>>,
    pub stop_calls: AtomicUsize,
    pub kill_calls: AtomicUsize,
}

impl FakeProcess {
    pub fn new(pid: u32, behavior: StopBehavior) -> Arc<Self> {
        let (exit, _) = watch::channel(None);
        Arc::new(Self {
            pid,
            behavior,
            exit,
            stop_calls: AtomicUsize::new(0),
            kill_calls: AtomicUsize::new(0),
        })
    }

    pub fn cooperative(pid: u32) -> Arc<Self> {
        Self::new(pid, StopBehavior::Exits)
    }

    pub fn stubborn(pid: u32) -> Arc<Self> {
        Self::new(pid, StopBehavior::Ignores)
    }

    pub fn unsignalable(pid: u32) -> Arc<Self> {
        Self::new(pid, StopBehavior::Fails)
    }

    /// Ends the process with `code`; later calls are ignored.
    pub fn exit_with(&self, code: i32) {
        self.finish(ExitStatus::from_raw(code << 8));
    }

    fn finish(&self, status: ExitStatus) {
        self.exit.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(status);
            true
        });
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    fn request_stop(&self) -> anyhow::Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            StopBehavior::Exits => {
                self.exit_with(0);
                Ok(())
            }
            StopBehavior::Ignores | StopBehavior::Survives => Ok(()),
            StopBehavior::Fails => anyhow::bail!("no such process"),
        }
    }

    fn kill(&self) -> anyhow::Result<()> {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior == StopBehavior::Survives {
            anyhow::bail!("operation not permitted");
        }
        // SIGKILL
        self.finish(ExitStatus::from_raw(9));
        Ok(())
    }

    async fn wait(&self) -> Option<ExitStatus> {
        let mut exit = self.exit.subscribe();
        let status = match exit.wait_for(Option::is_some).await {
            Ok(status) => *status,
            Err(_) => None,
        };
        status
    }
}



/// Script for one launch of a fake child.
#[derive(Debug, Clone)]
pub struct FakeLaunch {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit on its own after this long; `None` runs until stopped.
    pub exit_after: Option<Duration>,
    pub exit_code: i32,
    pub on_stop: StopBehavior,
    /// Written to stdout after this delay, as if by a grandchild that kept the pipe open.
    pub late_stdout: Option<(Duration, Vec<u8>)>,
    /// Reading stderr fails instead of yielding `stderr`.
    pub broken_stderr: bool,
}

impl FakeLaunch {
    pub fn exiting(code: i32, after: Duration) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_after: Some(after),
            exit_code: code,
            on_stop: StopBehavior::Exits,
            late_stdout: None,
            broken_stderr: false,
        }
    }

    pub fn running() -> Self {
        Self {
            exit_after: None,
            ..Self::exiting(0, Duration::ZERO)
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout.extend_from_slice(text.as_bytes());
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr.extend_from_slice(text.as_bytes());
        self
    }

    pub fn late_stdout(mut self, after: Duration, text: &str) -> Self {
        self.late_stdout = Some((after, text.as_bytes().to_vec()));
        self
    }

    pub fn broken_stderr(mut self) -> Self {
        self.broken_stderr = true;
        self
    }
}

/// A stream whose every read fails.
pub struct BrokenReader;

impl AsyncRead for BrokenReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("pipe broke")))
    }
}

/// Stdout that yields `early` at once and `late` after `after`, then closes.
fn held_open_stdout(early: Vec<u8>, after: Duration, late: Vec<u8>) -> BoxedReader {
    let (reader, mut writer) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        if writer.write_all(&early).await.is_err() {
            return;
        }
        sleep(after).await;
        // the reading side may be gone by now
        let _ = writer.write_all(&late).await;
    });
    Box::new(reader)
}

/// Hands out scripted launches in order; once the script runs out every spawn fails with NotFound.
#[derive(Default)]
pub struct FakeSpawner {
    script: Mutex<VecDeque<FakeLaunch>>,
    repeat: Mutex<Option<FakeLaunch>>,
    spawned: Mutex<Vec<Arc<FakeProcess>>>,
}

impl FakeSpawner {
    pub fn scripted(launches: impl IntoIterator<Item = FakeLaunch>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(launches.into_iter().collect()),
            ..Default::default()
        })
    }

    /// Every spawn follows `launch`.
    pub fn repeating(launch: FakeLaunch) -> Arc<Self> {
        Arc::new(Self {
            repeat: Mutex::new(Some(launch)),
            ..Default::default()
        })
    }

    pub fn spawned(&self) -> Vec<Arc<FakeProcess>> {
        lock_unpoisoned(&self.spawned).clone()
    }

    pub fn launches(&self) -> usize {
        lock_unpoisoned(&self.spawned).len()
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, command: &CommandLine) -> io::Result<Spawned> {
        let next = lock_unpoisoned(&self.script).pop_front();
        let launch = match next.or_else(|| lock_unpoisoned(&self.repeat).clone()) {
            Some(launch) => launch,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", command.display_name()),
                ))
            }
        };

        let pid = 1000 + self.launches() as u32;
        let process = FakeProcess::new(pid, launch.on_stop);
        lock_unpoisoned(&self.spawned).push(process.clone());

        if let Some(after) = launch.exit_after {
            let process = process.clone();
            let code = launch.exit_code;
            tokio::spawn(async move {
                sleep(after).await;
                process.exit_with(code);
            });
        }

        let stdout = match launch.late_stdout {
            Some((after, late)) => held_open_stdout(launch.stdout, after, late),
            None => Box::new(Cursor::new(launch.stdout)) as BoxedReader,
        };
        let stderr = if launch.broken_stderr {
            Box::new(BrokenReader) as BoxedReader
        } else {
            Box::new(Cursor::new(launch.stderr)) as BoxedReader
        };

        Ok(Spawned {
            handle: process,
            stdout: Some(stdout),
            stderr: Some(stderr),
        })
    }
}



/// Reports "tick N" as its title, counting calls.
#[derive(Default)]
pub struct TitleProcessor {
    calls: AtomicUsize,
}

impl LineProcessor for TitleProcessor {
    fn usage(&self) -> &str {
        "<program>"
    }

    fn banner(&self) -> &str {
        "title processor"
    }

    fn window_title(&self) -> Option<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Some(format!("tick {}", n))
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

/// Flags an error for every stderr line containing `marker`.
pub struct FlaggingProcessor {
    pub marker: &'static str,
    pub resets: Arc<AtomicUsize>,
}

impl FlaggingProcessor {
    pub fn new(marker: &'static str) -> Self {
        Self {
            marker,
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl LineProcessor for FlaggingProcessor {
    fn usage(&self) -> &str {
        "<program>"
    }

    fn banner(&self) -> &str {
        "flagging processor"
    }

    fn window_title(&self) -> Option<String> {
        None
    }

    fn process_line(
        &mut self,
        ctx: &mut LineContext<'_>,
        line_type: LineType,
        line: &str,
    ) -> ProcessedLine {
        if line_type == LineType::Error && line.contains(self.marker) {
            ctx.flag_error();
            return ProcessedLine::unchanged(line).with_foreground(Color::Red);
        }
        ProcessedLine::unchanged(line)
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
