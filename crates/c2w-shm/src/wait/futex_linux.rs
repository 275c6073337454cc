//! Linux futex-based wait / wake.
//!
//! `FUTEX_WAIT` sleeps only if the word still holds the expected value, which closes the window
//! between the caller's check and the sleep. Both contexts live in one process, so the private
//! futex flag is used.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use super::WaitOutcome;

pub(super) fn wait(word: &AtomicI32, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
    if word.load(Ordering::Acquire) != expected {
        return WaitOutcome::NotEqual;
    }

    let timespec = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let timespec_ptr = match &timespec {
        Some(ts) => ts as *const libc::timespec,
        None => std::ptr::null(),
    };

    // SAFETY: `word` is a live, 4-byte aligned atomic for the duration of the syscall.
    let result = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            timespec_ptr,
            std::ptr::null::<u32>(),
            0u32,
        )
    };

    if result == 0 {
        return WaitOutcome::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
        Some(libc::EAGAIN) => WaitOutcome::NotEqual,
        // EINTR: treat as a spurious wakeup.
        _ => WaitOutcome::Woken,
    }
}

pub(super) fn wake(word: &AtomicI32, count: i32) {
    // SAFETY: see `wait`.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            count,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}
