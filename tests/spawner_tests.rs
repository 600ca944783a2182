use console_proxy::processor::{self, PassthroughProcessor};
use console_proxy::test_helpers::{FakeLaunch, FakeSpawner, FlaggingProcessor, RecordingConsole, StopBehavior};
use console_proxy::{
    CommandLine, Interrupt, LineContext, LineProcessor, LineType, Outcome, ProcessHandle, ProcessedLine, ProxyError,
    Settings, Supervisor, TokioSpawner,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};


fn supervisor(
    spawner: Arc<FakeSpawner>,
    processor: Box<dyn LineProcessor>,
    settings: Settings,
) -> (Arc<Supervisor>, Arc<RecordingConsole>) {
    let console = Arc::new(RecordingConsole::default());
    let supervisor = Supervisor::new(settings, processor::shared(processor), console.clone(), spawner);
    (Arc::new(supervisor), console)
}

fn miner() -> CommandLine {
    CommandLine::new("/opt/miner/ethminer").arg("-G")
}

/// Panics when asked for a window title, optionally ending the first child just before.
struct BrokenTitle {
    exit_first: Option<Arc<FakeSpawner>>,
}

impl LineProcessor for BrokenTitle {
    fn usage(&self) -> &str {
        "<program>"
    }

    fn banner(&self) -> &str {
        "broken title"
    }

    fn window_title(&self) -> Option<String> {
        if let Some(process) = self.exit_first.as_ref().and_then(|s| s.spawned().first().cloned()) {
            process.exit_with(0);
        }
        panic!("title source unavailable");
    }

    fn process_line(&mut self, _ctx: &mut LineContext<'_>, _line_type: LineType, line: &str) -> ProcessedLine {
        ProcessedLine::unchanged(line)
    }
}


#[tokio::test(start_paused = true)]
async fn clean_exit_is_not_restarted() {
    let spawner = FakeSpawner::scripted([FakeLaunch::exiting(0, Duration::from_secs(5))
        .stdout("starting\n")
        .stderr("warming up\n")]);
    let (supervisor, console) = supervisor(spawner.clone(), Box::new(PassthroughProcessor), Settings::default());

    let outcome = supervisor.run(&miner()).await.unwrap();

    assert_eq!(outcome, Outcome::Finished);
    assert_eq!(spawner.launches(), 1);
    let lines = console.lines();
    assert_eq!(lines.first().map(String::as_str), Some("Starting process /opt/miner/ethminer..."));
    assert!(lines.contains(&"starting".to_string()));
    assert!(lines.contains(&"warming up".to_string()));
    assert_eq!(lines.last().map(String::as_str), Some("Process closed."));
    assert_eq!(supervisor.state().lock().restart_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn crash_without_restart_request_ends_the_loop() {
    let spawner = FakeSpawner::scripted([FakeLaunch::exiting(139, Duration::from_secs(1))]);
    let (supervisor, _console) = supervisor(spawner.clone(), Box::new(PassthroughProcessor), Settings::default());

    assert_eq!(supervisor.run(&miner()).await.unwrap(), Outcome::Finished);
    assert_eq!(spawner.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn flagged_errors_restart_until_the_window_guard_fires() {
    let spawner = FakeSpawner::repeating(FakeLaunch::running().stderr("GPU0 FATAL: device lost\n"));
    let processor = FlaggingProcessor::new("FATAL");
    let resets = processor.resets.clone();
    let (supervisor, console) = supervisor(spawner.clone(), Box::new(processor), Settings::default());

    let outcome = supervisor.run(&miner()).await.unwrap();

    // launches 1-4 register restarts; the fifth attempt is refused inside the window
    assert_eq!(outcome, Outcome::Aborted);
    assert_eq!(spawner.launches(), 4);
    for process in spawner.spawned() {
        assert_eq!(process.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(process.kill_calls.load(Ordering::SeqCst), 0);
    }
    assert_eq!(resets.load(Ordering::SeqCst), 0);
    let lines = console.lines();
    assert_eq!(lines.iter().filter(|l| *l == "Received error.").count(), 4);
    assert_eq!(lines.last().map(String::as_str), Some("Too many restarts in a short time. Aborting."));
    assert!(!supervisor.state().lock().must_restart());
}

#[tokio::test(start_paused = true)]
async fn processor_reset_between_launches_when_configured() {
    let spawner = FakeSpawner::scripted([
        FakeLaunch::running().stderr("FATAL\n"),
        FakeLaunch::exiting(0, Duration::from_secs(2)),
    ]);
    let processor = FlaggingProcessor::new("FATAL");
    let resets = processor.resets.clone();
    let settings = Settings {
        reset_processor: true,
        ..Settings::default()
    };
    let (supervisor, _console) = supervisor(spawner.clone(), Box::new(processor), settings);

    assert_eq!(supervisor.run(&miner()).await.unwrap(), Outcome::Finished);
    assert_eq!(spawner.launches(), 2);
    assert_eq!(resets.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_child_is_restarted_once_per_stale_interval() {
    let spawner = FakeSpawner::scripted([
        FakeLaunch::running().stdout("connected\n"),
        FakeLaunch::exiting(0, Duration::from_secs(10)),
    ]);
    let (supervisor, console) = supervisor(spawner.clone(), Box::new(PassthroughProcessor), Settings::default());

    let started = Instant::now();
    assert_eq!(supervisor.run(&miner()).await.unwrap(), Outcome::Finished);

    assert_eq!(spawner.launches(), 2);
    assert_eq!(spawner.spawned()[0].stop_calls.load(Ordering::SeqCst), 1);
    let stale = console
        .lines()
        .iter()
        .filter(|l| l.starts_with("Last output was more than one minute ago."))
        .count();
    assert_eq!(stale, 1);
    assert!(started.elapsed() >= Duration::from_secs(61 + 10));
}

#[tokio::test(start_paused = true)]
async fn stubborn_child_is_killed_and_relaunched() {
    let mut hung = FakeLaunch::running().stderr("FATAL\n");
    hung.on_stop = StopBehavior::Ignores;
    let spawner = FakeSpawner::scripted([hung, FakeLaunch::exiting(0, Duration::from_secs(1))]);
    let (supervisor, console) = supervisor(
        spawner.clone(),
        Box::new(FlaggingProcessor::new("FATAL")),
        Settings::default(),
    );

    assert_eq!(supervisor.run(&miner()).await.unwrap(), Outcome::Finished);

    let first = &spawner.spawned()[0];
    assert_eq!(first.kill_calls.load(Ordering::SeqCst), 1);
    assert!(console.lines().contains(&"Graceful stop failed, terminating...".to_string()));
    assert_eq!(spawner.launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn interrupt_tears_down_and_stops_supervising() {
    let spawner = FakeSpawner::repeating(FakeLaunch::running().stdout("hashing\n"));
    let (supervisor, console) = supervisor(spawner.clone(), Box::new(PassthroughProcessor), Settings::default());

    let running = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(&miner()).await }
    });
    sleep(Duration::from_secs(5)).await;
    let shutdown = supervisor.shutdown();
    let (first, second) = tokio::join!(
        shutdown.interrupt(Interrupt::CtrlC),
        shutdown.interrupt(Interrupt::Close)
    );

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome, Outcome::Interrupted);
    assert!(first ^ second);
    assert_eq!(spawner.launches(), 1);
    assert_eq!(spawner.spawned()[0].stop_calls.load(Ordering::SeqCst), 1);
    assert!(console.lines().contains(&"Received ^C.".to_string()));
}

#[tokio::test(start_paused = true)]
async fn missing_executable_is_fatal_and_not_retried() {
    let spawner = FakeSpawner::scripted(Vec::<FakeLaunch>::new());
    let (supervisor, console) = supervisor(spawner.clone(), Box::new(PassthroughProcessor), Settings::default());

    let err = supervisor.run(&CommandLine::new("ethminer-missing")).await.unwrap_err();

    assert!(matches!(err, ProxyError::LaunchFailed { .. }));
    assert_eq!(err.exit_code(), 0x667);
    assert!(err.shows_usage());
    assert!(console.lines().contains(&"ethminer-missing not found".to_string()));
    assert_eq!(supervisor.state().lock().restart_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn child_that_survives_kill_is_abandoned_and_relaunched() {
    let mut undying = FakeLaunch::running().stderr("FATAL\n");
    undying.on_stop = StopBehavior::Survives;
    let spawner = FakeSpawner::scripted([undying, FakeLaunch::exiting(0, Duration::from_secs(1))]);
    let (supervisor, _console) = supervisor(
        spawner.clone(),
        Box::new(FlaggingProcessor::new("FATAL")),
        Settings::default(),
    );

    let started = Instant::now();
    assert_eq!(supervisor.run(&miner()).await.unwrap(), Outcome::Finished);
    let elapsed = started.elapsed();

    // 1s to the first tick, 20s grace, 5s reap bound, 1s second launch
    assert!(elapsed >= Duration::from_secs(26), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(30), "{:?}", elapsed);
    assert_eq!(spawner.launches(), 2);
    assert_eq!(spawner.spawned()[0].kill_calls.load(Ordering::SeqCst), 1);
    assert!(!spawner.spawned()[0].has_exited());
}

#[tokio::test(start_paused = true)]
async fn output_after_exit_does_not_leak_into_later_state() {
    let spawner = FakeSpawner::scripted([FakeLaunch::exiting(0, Duration::from_secs(1))
        .stdout("early\n")
        .late_stdout(Duration::from_secs(3), "late\n")]);
    let (supervisor, console) = supervisor(spawner.clone(), Box::new(PassthroughProcessor), Settings::default());

    assert_eq!(supervisor.run(&miner()).await.unwrap(), Outcome::Finished);
    sleep(Duration::from_secs(5)).await;

    let lines = console.lines();
    assert!(lines.contains(&"early".to_string()));
    assert!(!lines.contains(&"late".to_string()), "{:?}", lines);
    assert_eq!(lines.last().map(String::as_str), Some("Process closed."));
    assert_eq!(supervisor.state().lock().last_line(), Some("early"));
}

#[tokio::test(start_paused = true)]
async fn capture_failure_is_an_internal_error() {
    let spawner = FakeSpawner::repeating(FakeLaunch::running().broken_stderr());
    let (supervisor, console) = supervisor(spawner.clone(), Box::new(PassthroughProcessor), Settings::default());

    let err = supervisor.run(&miner()).await.unwrap_err();

    assert!(matches!(err, ProxyError::Internal(_)), "{:?}", err);
    assert_eq!(err.exit_code(), 1);
    assert_eq!(spawner.launches(), 1);
    assert_eq!(spawner.spawned()[0].stop_calls.load(Ordering::SeqCst), 1);
    assert!(console
        .lines()
        .contains(&"Internal error: reading Error stream failed: pipe broke".to_string()));
}

#[tokio::test(start_paused = true)]
async fn watchdog_panic_tears_down_the_child() {
    let spawner = FakeSpawner::repeating(FakeLaunch::running().stdout("hashing\n"));
    let (supervisor, console) = supervisor(
        spawner.clone(),
        Box::new(BrokenTitle { exit_first: None }),
        Settings::default(),
    );

    let err = supervisor.run(&miner()).await.unwrap_err();

    assert_eq!(err.exit_code(), 1);
    assert_eq!(spawner.launches(), 1);
    assert_eq!(spawner.spawned()[0].stop_calls.load(Ordering::SeqCst), 1);
    assert!(console.lines().iter().any(|l| l.starts_with("Internal error: watchdog failed")));
}

#[tokio::test(start_paused = true)]
async fn watchdog_panic_is_reported_when_the_child_exits_first() {
    let spawner = FakeSpawner::scripted([FakeLaunch::running()]);
    let processor = BrokenTitle {
        exit_first: Some(spawner.clone()),
    };
    let (supervisor, console) = supervisor(spawner.clone(), Box::new(processor), Settings::default());

    let err = supervisor.run(&miner()).await.unwrap_err();

    assert!(matches!(err, ProxyError::Internal(_)), "{:?}", err);
    assert_eq!(spawner.spawned()[0].stop_calls.load(Ordering::SeqCst), 0);
    assert!(console.lines().iter().any(|l| l.starts_with("Internal error: watchdog failed")));
}

#[tokio::test]
async fn real_child_output_is_captured() {
    let console = Arc::new(RecordingConsole::default());
    let supervisor = Supervisor::new(
        Settings::default(),
        processor::shared(Box::new(PassthroughProcessor)),
        console.clone(),
        Arc::new(TokioSpawner),
    );
    let command = CommandLine::new("/bin/sh")
        .arg("-c")
        .arg("echo \"quoted arg: $1\"; echo oops >&2")
        .arg("sh")
        .arg("two words");

    let outcome = supervisor.run(&command).await.unwrap();

    assert_eq!(outcome, Outcome::Finished);
    let lines = console.lines();
    assert!(lines.contains(&"quoted arg: two words".to_string()), "{:?}", lines);
    assert!(lines.contains(&"oops".to_string()), "{:?}", lines);
}

#[tokio::test]
async fn real_missing_executable_fails_to_launch() {
    let supervisor = Supervisor::new(
        Settings::default(),
        processor::shared(Box::new(PassthroughProcessor)),
        Arc::new(RecordingConsole::default()),
        Arc::new(TokioSpawner),
    );

    let err = supervisor
        .run(&CommandLine::new("/nonexistent/console-proxy-child"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::LaunchFailed { .. }));
}

#[tokio::test]
async fn real_grandchild_output_is_dropped_after_exit() {
    let console = Arc::new(RecordingConsole::default());
    let supervisor = Supervisor::new(
        Settings::default(),
        processor::shared(Box::new(PassthroughProcessor)),
        console.clone(),
        Arc::new(TokioSpawner),
    );
    let command = CommandLine::new("/bin/sh")
        .arg("-c")
        .arg("(sleep 2; echo late) & echo early");

    assert_eq!(supervisor.run(&command).await.unwrap(), Outcome::Finished);
    sleep(Duration::from_secs(3)).await;

    let lines = console.lines();
    assert!(lines.contains(&"early".to_string()), "{:?}", lines);
    assert!(!lines.contains(&"late".to_string()), "{:?}", lines);
    assert_eq!(supervisor.state().lock().last_line(), Some("early"));
}
