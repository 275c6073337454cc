//! Synchronous request/response area shared between the guest and the controller.
//!
//! The request itself travels out-of-band; this region only carries the result. A request goes
//! through `idle -> dispatching -> idle`:
//!
//! 1. The requester calls [`ControlChannel::arm`] (`ctrl = 0`), posts the request and blocks in
//!    [`ControlChannel::wait`] while `ctrl == 0`.
//! 2. The responder writes `data`, `len` and `status`, stores `ctrl = 1` and wakes the requester.
//!
//! On the responder side every request is answered through a [`Completion`]; dropping one
//! without answering completes it with `status = -1`, so an error path can never leave the
//! requester blocked.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::layout::{control_ctrl, control_state, status, MAX_CAPACITY};
use crate::region::SharedRegion;
use crate::wait;
use crate::ShmError;

/// Result of one control request as observed by the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    pub status: i32,
    pub payload: Vec<u8>,
}

impl ControlReply {
    pub fn is_error(&self) -> bool {
        self.status < 0
    }

    pub fn is_eof(&self) -> bool {
        self.status == status::EOF
    }

    /// Boolean answer carried in `data[0]`.
    pub fn flag(&self) -> bool {
        self.payload.first().copied() == Some(1)
    }
}

#[derive(Clone)]
pub struct ControlChannel {
    region: Arc<SharedRegion>,
    capacity: usize,
}

impl ControlChannel {
    /// Allocate a control region with `data_capacity` payload bytes.
    pub fn new(data_capacity: usize) -> Result<Self, ShmError> {
        if data_capacity == 0 || data_capacity > MAX_CAPACITY {
            return Err(ShmError::InvalidCapacity {
                capacity: data_capacity,
                max: MAX_CAPACITY,
            });
        }
        let region = SharedRegion::new(control_ctrl::BYTES + data_capacity);
        Ok(Self {
            region: Arc::new(region),
            capacity: data_capacity,
        })
    }

    pub fn with_region_bytes(region_bytes: usize) -> Result<Self, ShmError> {
        if region_bytes <= control_ctrl::BYTES {
            return Err(ShmError::RegionTooSmall {
                len: region_bytes,
                header: control_ctrl::BYTES,
            });
        }
        Self::new(region_bytes - control_ctrl::BYTES)
    }

    /// Size of the `data` area; responses are truncated to it.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn word(&self, index: usize) -> &AtomicI32 {
        self.region.word(index)
    }

    /// Mark a request as outstanding. Must precede posting the request.
    pub fn arm(&self) {
        self.word(control_ctrl::CTRL)
            .store(control_state::PENDING, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.word(control_ctrl::CTRL).load(Ordering::Acquire) != control_state::PENDING
    }

    /// Block until the responder flips `ctrl`, then read the result.
    pub fn wait(&self) -> ControlReply {
        let ctrl = self.word(control_ctrl::CTRL);
        while ctrl.load(Ordering::Acquire) == control_state::PENDING {
            wait::wait(ctrl, control_state::PENDING, None);
        }
        self.reply()
    }

    /// Read the current `status` / `len` / `data` without waiting.
    pub fn reply(&self) -> ControlReply {
        let status = self.word(control_ctrl::STATUS).load(Ordering::Acquire);
        let len = self.word(control_ctrl::LEN).load(Ordering::Acquire).max(0) as usize;
        let len = len.min(self.capacity);
        let mut payload = vec![0u8; len];
        // SAFETY: the responder is done with the data area once `ctrl` reads ready.
        unsafe { self.region.copy_out(control_ctrl::BYTES, &mut payload) };
        ControlReply { status, payload }
    }

    /// Write a response and wake the requester. Returns the number of payload bytes stored.
    pub fn respond(&self, status: i32, payload: &[u8]) -> usize {
        let n = payload.len().min(self.capacity);
        if n < payload.len() {
            tracing::warn!(
                len = payload.len(),
                capacity = self.capacity,
                "control response truncated"
            );
        }
        // SAFETY: the requester does not touch the data area while `ctrl` is pending.
        unsafe { self.region.copy_in(control_ctrl::BYTES, &payload[..n]) };
        self.word(control_ctrl::LEN).store(n as i32, Ordering::Release);
        self.word(control_ctrl::STATUS)
            .store(status, Ordering::Release);

        let ctrl = self.word(control_ctrl::CTRL);
        if ctrl.swap(control_state::READY, Ordering::AcqRel) != control_state::PENDING {
            tracing::error!("control response written with no request outstanding");
        }
        wait::wake_all(ctrl);
        n
    }

    /// Obligation to answer the request currently outstanding on this channel.
    pub fn completion(&self) -> Completion {
        Completion {
            channel: self.clone(),
            done: false,
        }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Answers exactly one request. Completes with `status = -1` when dropped unanswered.
#[must_use = "an unanswered completion fails the request when dropped"]
pub struct Completion {
    channel: ControlChannel,
    done: bool,
}

impl Completion {
    /// Largest payload a response can carry.
    pub fn capacity(&self) -> usize {
        self.channel.capacity
    }

    pub fn respond(mut self, status: i32, payload: &[u8]) -> usize {
        self.done = true;
        self.channel.respond(status, payload)
    }

    pub fn ok(self) {
        self.respond(status::OK, &[]);
    }

    pub fn error(self) {
        self.respond(status::ERROR, &[]);
    }

    pub fn status(self, status: i32) {
        self.respond(status, &[]);
    }

    /// Boolean answer in `data[0]`.
    pub fn flag(self, flag: bool) {
        self.flag_with_status(flag, status::OK);
    }

    pub fn flag_with_status(self, flag: bool, status: i32) {
        self.respond(status, &[u8::from(flag)]);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!("request dropped without a response; answering -1");
            self.channel.respond(status::ERROR, &[]);
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").field("done", &self.done).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reply_round_trips_through_region() {
        let chan = ControlChannel::new(64).unwrap();
        chan.arm();
        assert!(!chan.is_ready());
        chan.completion().respond(7, b"payload");
        assert!(chan.is_ready());
        assert_eq!(
            chan.wait(),
            ControlReply {
                status: 7,
                payload: b"payload".to_vec()
            }
        );
    }

    #[test]
    fn payload_is_truncated_to_capacity() {
        let chan = ControlChannel::new(4).unwrap();
        chan.arm();
        assert_eq!(chan.completion().respond(0, b"abcdefgh"), 4);
        assert_eq!(chan.wait().payload, b"abcd");
    }

    #[test]
    fn dropped_completion_answers_error() {
        let chan = ControlChannel::new(16).unwrap();
        chan.arm();
        drop(chan.completion());
        let reply = chan.wait();
        assert!(reply.is_error());
        assert!(reply.payload.is_empty());
    }

    #[test]
    fn flag_is_first_data_byte() {
        let chan = ControlChannel::new(16).unwrap();
        chan.arm();
        chan.completion().flag(true);
        let reply = chan.wait();
        assert!(reply.flag());
        assert_eq!(reply.status, status::OK);

        chan.arm();
        chan.completion().flag_with_status(false, 42);
        let reply = chan.wait();
        assert!(!reply.flag());
        assert_eq!(reply.status, 42);
    }

    #[test]
    fn requester_blocks_until_responder_flips_ctrl() {
        let chan = ControlChannel::new(16).unwrap();
        let responder = chan.clone();
        chan.arm();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            responder.completion().respond(status::EOF, b"x");
        });

        let reply = chan.wait();
        assert!(reply.is_eof());
        assert_eq!(reply.payload, b"x");
        handle.join().unwrap();
    }

    #[test]
    fn misuse_does_not_poison_next_request() {
        let chan = ControlChannel::new(16).unwrap();
        // Two answers for one request.
        chan.arm();
        chan.completion().respond(1, b"first");
        chan.completion().respond(2, b"second");

        chan.arm();
        chan.completion().respond(3, b"ok");
        assert_eq!(
            chan.wait(),
            ControlReply {
                status: 3,
                payload: b"ok".to_vec()
            }
        );
    }

    #[test]
    fn rejects_undersized_region() {
        assert!(matches!(
            ControlChannel::with_region_bytes(12),
            Err(ShmError::RegionTooSmall { len: 12, header: 12 })
        ));
        assert_eq!(
            ControlChannel::with_region_bytes(12 + 100).unwrap().capacity(),
            100
        );
    }
}
