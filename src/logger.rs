use anyhow::Context;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::SubscriberBuilder;



/*
    @@@
    @logs_tracing();
    . Creates a daily-rotating log file (<dir>/console-proxy.<date>.log) and wraps it in a non-blocking writer.
    . Configures a tracing subscriber at `level` (with timestamps, targets and levels, no ANSI) writing to it.
    . The console stays reserved for the child's output; the returned guard must live until exit.
*/
pub fn logs_tracing(dir: &Path, level: Level) -> anyhow::Result<WorkerGuard> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("console-proxy")
        .filename_suffix("log")
        .build(dir)
        .with_context(|| format!("cannot write logs to {}", dir.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = SubscriberBuilder::default()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_writer(non_blocking)
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("a global tracing subscriber is already set")?;
    Ok(guard)
}
