//! Deferred single-shot triggers.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep_until};

enum Command {
    ScheduleAt(Instant),
    Cancel,
}

/// Coalesces a burst of [`schedule`](Self::schedule) calls into a single run
/// of the action once the latest deadline passes undisturbed.
///
/// The timer task exits when the trigger is dropped; an armed deadline dies
/// with it.
pub(crate) struct DebouncedTrigger {
    commands: mpsc::UnboundedSender<Command>,
}

impl DebouncedTrigger {
    pub(crate) fn spawn<A, F>(mut action: A) -> Self
    where
        A: FnMut() -> F + Send + 'static,
        F: Future<Output = ()> + Send,
    {
        let (commands, mut receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut deadline: Option<Instant> = None;
            loop {
                tokio::select! {
                    command = receiver.recv() => match command {
                        Some(Command::ScheduleAt(at)) => deadline = Some(at),
                        Some(Command::Cancel) => deadline = None,
                        None => break,
                    },
                    () = wait_until(deadline) => {
                        deadline = None;
                        action().await;
                    }
                }
            }
        });
        Self { commands }
    }

    /// Arms (or re-arms) the trigger. Only the deadline from the latest call
    /// fires.
    pub(crate) fn schedule(&self, quiet_period: Duration) {
        let _ = self
            .commands
            .send(Command::ScheduleAt(Instant::now() + quiet_period));
    }

    /// Disarms a pending deadline, if any.
    pub(crate) fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
