//! Blocking wait / wake on a shared 32-bit word.
//!
//! This is the native counterpart of `Atomics.wait` / `Atomics.notify`: a context blocks while a
//! word holds an expected value and another context wakes it after changing the word. Callers
//! must always re-check the word after [`wait`] returns; spurious wakeups are allowed.

use std::sync::atomic::AtomicI32;
use std::time::Duration;

/// Result of a [`wait`] call, mirroring the `"ok" | "not-equal" | "timed-out"` strings returned
/// by `Atomics.wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Woken,
    NotEqual,
    TimedOut,
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        use futex_linux as imp;
    } else {
        mod fallback;
        use fallback as imp;
    }
}

/// Block while `word == expected`, or until `timeout` elapses.
pub fn wait(word: &AtomicI32, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
    imp::wait(word, expected, timeout)
}

/// Wake at most one context blocked on `word`.
pub fn wake_one(word: &AtomicI32) {
    imp::wake(word, 1);
}

/// Wake every context blocked on `word`.
pub fn wake_all(word: &AtomicI32) {
    imp::wake(word, i32::MAX);
}
