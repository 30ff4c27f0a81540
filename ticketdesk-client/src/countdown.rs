use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle};

/// Remaining-time ticker behind "retry available in Ns" displays.
///
/// Emits on a watch cell once per period until it reaches zero. The
/// task is aborted on cancel or drop, so a dismissed view cannot leak a
/// timer that fires into freed state.
#[derive(Debug)]
pub struct Countdown {
    task: JoinHandle<()>,
    remaining_rx: watch::Receiver<Duration>,
}

impl Countdown {
    pub fn start(total: Duration, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(10));
        let (tx, remaining_rx) = watch::channel(total);

        let task = tokio::spawn(async move {
            let mut remaining = total;
            let mut ticks = tokio::time::interval(period);
            ticks.tick().await; // first tick fires immediately
            loop {
                ticks.tick().await;
                remaining = remaining.saturating_sub(period);
                if tx.send(remaining).is_err() || remaining.is_zero() {
                    break;
                }
            }
        });

        Self { task, remaining_rx }
    }

    pub fn remaining(&self) -> Duration {
        *self.remaining_rx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Duration> {
        self.remaining_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `"1m 30s"` / `"45s"`, the format the countdown dialog shows.
pub fn format_wait(wait: Duration) -> String {
    let total_seconds = wait.as_secs();
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
