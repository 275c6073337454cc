//! Portable wait / wake for targets without futex support.
//!
//! Waiters spin briefly and then poll the word with short sleeps, so `wake` has nothing to do.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use super::WaitOutcome;

const SPIN_ITERATIONS: u32 = 128;
const POLL_INTERVAL: Duration = Duration::from_micros(50);

pub(super) fn wait(word: &AtomicI32, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
    if word.load(Ordering::Acquire) != expected {
        return WaitOutcome::NotEqual;
    }
    let deadline = timeout.map(|t| Instant::now() + t);

    for _ in 0..SPIN_ITERATIONS {
        core::hint::spin_loop();
        if word.load(Ordering::Acquire) != expected {
            return WaitOutcome::Woken;
        }
    }

    loop {
        if word.load(Ordering::Acquire) != expected {
            return WaitOutcome::Woken;
        }
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        } else {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

pub(super) fn wake(_word: &AtomicI32, _count: i32) {}
