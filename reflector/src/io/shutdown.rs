//! Cooperative stop flag shared by the loop and subprocess waits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

/// Granularity at which sleeps and subprocess waits observe a stop request.
pub const STOP_POLL_SLICE: Duration = Duration::from_millis(100);

/// Shared stop request. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until a stop is requested.
    ///
    /// Returns true when the sleep ended because of a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            if remaining.is_zero() {
                return false;
            }
            thread::sleep(remaining.min(STOP_POLL_SLICE));
        }
    }
}

/// Route SIGINT and SIGTERM to `stop`.
///
/// The signals are blocked for the calling thread (and every thread or child
/// spawned from it afterwards) and consumed by a dedicated waiter thread, so
/// call this before spawning anything else. Children inherit the blocked
/// mask; they are always terminated with SIGKILL, which cannot be blocked.
#[cfg(unix)]
pub fn install_signal_handler(stop: &StopSignal) -> Result<()> {
    use anyhow::Context;
    use nix::sys::signal::{SigSet, Signal};

    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set.thread_block().context("block termination signals")?;

    let stop = stop.clone();
    thread::Builder::new()
        .name("reflector-signals".to_string())
        .spawn(move || {
            while let Ok(signal) = set.wait() {
                tracing::info!(signal = ?signal, "stop requested");
                stop.request_stop();
            }
        })
        .context("spawn signal thread")?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handler(_stop: &StopSignal) -> Result<()> {
    Ok(())
}
