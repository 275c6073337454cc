//! Controller-side state of the guest's single accepted socket.

use std::time::Duration;

use c2w_shm::layout::signal;
use c2w_shm::RingChannel;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Lifecycle of the backend transport behind the accepted socket.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SocketState {
    pub opened: bool,
    pub opening: bool,
    pub accepted: bool,
}

impl SocketState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Answers `recv-is-readable` through the to-guest ring's notify word.
///
/// The ring is checked right away; if it is empty and a positive timeout was given, a task
/// re-checks it every `interval` until data shows up (`1`) or the deadline passes (`-1`). Only
/// one poll runs at a time: starting a new one replaces the old.
#[derive(Debug)]
pub struct ReadinessPoller {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl ReadinessPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    pub fn start(&mut self, ring: &RingChannel, timeout_secs: Option<f64>) {
        if self.cancel() {
            tracing::debug!("replacing ongoing readiness poll");
        }

        if ring.is_readable() {
            ring.signal(signal::READY);
            return;
        }
        let timeout = timeout_secs
            .filter(|t| *t > 0.0)
            .and_then(|t| Duration::try_from_secs_f64(t).ok());
        let Some(timeout) = timeout else {
            ring.signal(signal::TIMEOUT);
            return;
        };

        let ring = ring.clone();
        let interval = self.interval;
        let deadline = Instant::now() + timeout;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if ring.is_readable() {
                    ring.signal(signal::READY);
                    return;
                }
                if Instant::now() >= deadline {
                    ring.signal(signal::TIMEOUT);
                    return;
                }
            }
        }));
    }

    /// Stop a pending poll. Returns whether one was still running.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                running
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ReadinessPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}
