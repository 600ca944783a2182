use crate::control::{Interrupt, Shutdown};
use anyhow::Context;
use futures::stream::StreamExt;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::{Handle, Signals};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Ctrl-C, terminal hangup, and termination requests from the session or the system.
pub const HANDLED: [i32; 4] = [SIGINT, SIGHUP, SIGTERM, SIGQUIT];

pub fn interrupt_for(signal: i32) -> Interrupt {
    if signal == SIGINT {
        Interrupt::CtrlC
    } else {
        Interrupt::Close
    }
}



/*
    @@@
    @listen();
    . Replaces the default disposition of the handled signals, so an interrupt never kills the supervisor before cleanup.
    . Each delivered signal stops the restart loop and runs the shutdown escalation on the current child.
    . The returned handle closes the signal stream; the task then ends.
*/
pub fn listen(shutdown: Arc<Shutdown>) -> anyhow::Result<(Handle, JoinHandle<()>)> {
    let signals = Signals::new(HANDLED).context("failed to register signal handlers")?;
    let handle = signals.handle();
    let task = tokio::spawn(handle_signals(signals, shutdown));
    Ok((handle, task))
}

async fn handle_signals(mut signals: Signals, shutdown: Arc<Shutdown>) {
    while let Some(signal) = signals.next().await {
        debug!(signal, "signal delivered");
        shutdown.interrupt(interrupt_for(signal)).await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sigint_counts_as_ctrl_c() {
        assert_eq!(interrupt_for(SIGINT), Interrupt::CtrlC);
        for signal in [SIGHUP, SIGTERM, SIGQUIT] {
            assert_eq!(interrupt_for(signal), Interrupt::Close);
        }
    }
}
