use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::Utc;

use crate::runtime::{Runtime, RuntimeShared};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A watchdog over one script execution.
///
/// The guard spawns a timer thread that issues a termination request once
/// the timeout elapses. Dropping the guard before the deadline cancels the
/// watchdog. Termination is best-effort and may race with natural
/// completion of the script.
pub struct Guard {
    cancel: Arc<AtomicBool>,
    watchdog: Option<JoinHandle<()>>,
}

impl Guard {
    pub(crate) fn new(runtime: &Runtime, timeout_millis: u64) -> Self {
        let shared: Arc<RuntimeShared> = Arc::clone(&runtime.shared);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let watchdog = thread::spawn(move || {
            let started = Utc::now();

            loop {
                if flag.load(Ordering::Acquire) {
                    return;
                }

                let elapsed = (Utc::now() - started).num_milliseconds();

                if elapsed >= 0 && elapsed as u64 >= timeout_millis {
                    break;
                }

                thread::sleep(POLL_INTERVAL);
            }

            log::warn!(
                "guard fired after {timeout_millis}ms; terminating runtime {}",
                shared.id,
            );

            shared.terminate.store(true, Ordering::Release);
        });

        Self {
            cancel,
            watchdog: Some(watchdog),
        }
    }

    /// Cancels the watchdog without waiting for its thread to observe the
    /// cancellation.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);

        drop(self.watchdog.take());
    }
}
