//! Interruptible sleeps shared by the pool and the executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest pause between retries against an unreachable queue.
pub const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);
/// Granularity at which sleeping workers notice shutdown.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

/// Doubles from `base` per consecutive error, capped at `max`.
pub fn doubling(base: Duration, consecutive_errors: u32, max: Duration) -> Duration {
    let factor = 1u32 << consecutive_errors.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(max)
}

/// Sleeps for `duration` or until `shutdown` is set, whichever comes first.
pub fn pause(shutdown: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_CHECK));
    }
}
