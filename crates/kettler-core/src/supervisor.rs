//! Restart policy around the session loop
//!
//! The session loop runs once and returns on the first failure. The
//! supervisor rebuilds it after a fixed backoff until asked to stop.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default pause before restarting a failed run
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Granularity at which a backoff notices the stop flag
const STOP_POLL: Duration = Duration::from_millis(100);

pub struct Supervisor {
    backoff: Duration,
    stop: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(backoff: Duration, stop: Arc<AtomicBool>) -> Self {
        Self { backoff, stop }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Call `attempt` until it returns `Ok` or the stop flag is set.
    /// Each failure is logged and followed by the backoff.
    ///
    /// Returns the number of failed attempts.
    pub fn run<F, E>(&self, mut attempt: F) -> usize
    where
        F: FnMut() -> Result<(), E>,
        E: Display,
    {
        let mut failures = 0;
        while !self.stopped() {
            match attempt() {
                Ok(()) => break,
                Err(e) => {
                    failures += 1;
                    tracing::error!(
                        error = %e,
                        failures,
                        backoff_secs = self.backoff.as_secs_f64(),
                        "Session loop failed, restarting after backoff"
                    );
                    self.wait_backoff();
                }
            }
        }
        failures
    }

    fn wait_backoff(&self) {
        let deadline = Instant::now() + self.backoff;
        while !self.stopped() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(STOP_POLL));
        }
    }
}
