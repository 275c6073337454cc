//! Fixed-capacity circular byte buffer shared between two contexts.
//!
//! The buffer is a byte stream (no record framing). All cursor arithmetic and copies happen
//! while the `ctrl` word is held; a context that finds the word locked blocks on it with
//! [`wait`](crate::wait::wait) until the holder releases it.
//!
//! Cursor rules:
//! - `begin` is the inclusive read cursor, `end` the exclusive write cursor.
//! - `begin == end` always means empty; both are reset to 0 whenever a read empties the ring.
//! - `end` may sit at `capacity` when the writer filled the tail of the buffer. The next write
//!   then continues at offset 0.
//! - Once the writer has wrapped behind `begin`, the byte directly behind `begin` stays free, so
//!   `end` never catches up with `begin`. The same holds when a write would wrap around while
//!   `begin > 0`.
//!
//! Writable space is therefore `capacity - occupied` while nothing wraps (the ring can be filled
//! completely from an empty state), and `capacity - occupied - 1` once a write has to use the
//! head of the buffer. A write of exactly `capacity - occupied` bytes into a wrapped ring is
//! dropped.
//!
//! Overflow is lossy: a write that does not fit into the free space is dropped as a whole and
//! the cursors are left untouched.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::layout::{lock_state, ring_ctrl, signal, RingLayout, MAX_CAPACITY};
use crate::region::SharedRegion;
use crate::wait::{self, WaitOutcome};
use crate::ShmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Not enough free space; nothing was enqueued.
    Dropped,
}

impl WriteOutcome {
    pub fn is_written(self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

/// A handle to a ring region. Cloning the handle shares the region.
#[derive(Clone)]
pub struct RingChannel {
    region: Arc<SharedRegion>,
    layout: RingLayout,
    capacity: usize,
}

impl RingChannel {
    /// Allocate a ring with `capacity` data bytes.
    pub fn new(capacity: usize, layout: RingLayout) -> Result<Self, ShmError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(ShmError::InvalidCapacity {
                capacity,
                max: MAX_CAPACITY,
            });
        }
        let region = SharedRegion::new(layout.header_bytes() + capacity);
        Ok(Self {
            region: Arc::new(region),
            layout,
            capacity,
        })
    }

    /// Allocate a ring whose whole region (header included) is `region_bytes` long, the way the
    /// controller sizes its `SharedArrayBuffer`s.
    pub fn with_region_bytes(region_bytes: usize, layout: RingLayout) -> Result<Self, ShmError> {
        let header = layout.header_bytes();
        if region_bytes <= header {
            return Err(ShmError::RegionTooSmall {
                len: region_bytes,
                header,
            });
        }
        Self::new(region_bytes - header, layout)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    fn word(&self, index: usize) -> &AtomicI32 {
        self.region.word(index)
    }

    fn lock(&self) -> RingGuard<'_> {
        let ctrl = self.word(ring_ctrl::CTRL);
        loop {
            match ctrl.compare_exchange(
                lock_state::FREE,
                lock_state::LOCKED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(_) => {
                    wait::wait(ctrl, lock_state::LOCKED, None);
                }
            }
        }
        RingGuard { ring: self }
    }

    /// Append `data` to the ring, or drop it entirely if it does not fit.
    pub fn write(&self, data: &[u8]) -> WriteOutcome {
        let outcome = {
            let guard = self.lock();
            guard.write(data)
        };
        if outcome.is_written() && self.layout.has_notify() && !data.is_empty() {
            self.signal(signal::READY);
        }
        outcome
    }

    /// Copy up to `buf.len()` occupied bytes into `buf`, returning the number copied.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.lock().read(buf)
    }

    /// Read up to `max` bytes into a fresh vector.
    pub fn read_vec(&self, max: usize) -> Vec<u8> {
        let guard = self.lock();
        let mut out = vec![0u8; max.min(guard.occupied())];
        let n = guard.read(&mut out);
        out.truncate(n);
        out
    }

    pub fn is_readable(&self) -> bool {
        self.readable_len() > 0
    }

    pub fn readable_len(&self) -> usize {
        self.lock().occupied()
    }

    /// Current `(begin, end)` cursors.
    pub fn cursors(&self) -> (usize, usize) {
        let guard = self.lock();
        (guard.begin(), guard.end())
    }

    /// Store `value` into the notify word and wake every waiter on it.
    ///
    /// No-op for [`RingLayout::Plain`] rings.
    pub fn signal(&self, value: i32) {
        if !self.layout.has_notify() {
            return;
        }
        let notify = self.word(ring_ctrl::NOTIFY);
        notify.store(value, Ordering::Release);
        wait::wake_all(notify);
    }

    pub fn reset_signal(&self) {
        if self.layout.has_notify() {
            self.word(ring_ctrl::NOTIFY)
                .store(signal::IDLE, Ordering::Release);
        }
    }

    pub fn signal_value(&self) -> i32 {
        if !self.layout.has_notify() {
            return signal::IDLE;
        }
        self.word(ring_ctrl::NOTIFY).load(Ordering::Acquire)
    }

    /// Block until the notify word leaves [`signal::IDLE`] or `timeout` elapses, returning the
    /// final value of the word.
    pub fn wait_signal(&self, timeout: Option<Duration>) -> i32 {
        if !self.layout.has_notify() {
            return signal::IDLE;
        }
        let notify = self.word(ring_ctrl::NOTIFY);
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let value = notify.load(Ordering::Acquire);
            if value != signal::IDLE {
                return value;
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return signal::IDLE;
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            if wait::wait(notify, signal::IDLE, remaining) == WaitOutcome::TimedOut {
                return notify.load(Ordering::Acquire);
            }
        }
    }
}

impl std::fmt::Debug for RingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingChannel")
            .field("capacity", &self.capacity)
            .field("layout", &self.layout)
            .finish()
    }
}

/// Exclusive hold on a ring's `ctrl` word.
struct RingGuard<'a> {
    ring: &'a RingChannel,
}

impl RingGuard<'_> {
    fn begin(&self) -> usize {
        self.ring.word(ring_ctrl::BEGIN).load(Ordering::Acquire) as usize
    }

    fn end(&self) -> usize {
        self.ring.word(ring_ctrl::END).load(Ordering::Acquire) as usize
    }

    fn set_begin(&self, v: usize) {
        self.ring
            .word(ring_ctrl::BEGIN)
            .store(v as i32, Ordering::Release);
    }

    fn set_end(&self, v: usize) {
        self.ring.word(ring_ctrl::END).store(v as i32, Ordering::Release);
    }

    fn data_offset(&self) -> usize {
        self.ring.layout.header_bytes()
    }

    fn occupied(&self) -> usize {
        let (begin, end) = (self.begin(), self.end());
        if end >= begin {
            end - begin
        } else {
            self.ring.capacity - begin + end
        }
    }

    /// Contiguous free bytes at `end`, then free bytes at the head of the buffer.
    fn free_space(&self) -> (usize, usize) {
        let (begin, end) = (self.begin(), self.end());
        let cap = self.ring.capacity;
        if end >= begin {
            (cap - end, begin.saturating_sub(1))
        } else {
            (begin - end - 1, 0)
        }
    }

    fn write(&self, data: &[u8]) -> WriteOutcome {
        let (len, round) = self.free_space();
        if len + round < data.len() {
            tracing::warn!(
                len = data.len(),
                free = len + round,
                capacity = self.ring.capacity,
                "ring buffer full; dropping write"
            );
            return WriteOutcome::Dropped;
        }

        let end = self.end();
        let base = self.data_offset();
        let first = len.min(data.len());
        // SAFETY: the ctrl word is held and `end..end + first` is free space.
        unsafe { self.ring.region.copy_in(base + end, &data[..first]) };
        self.set_end(end + first);

        let rest = data.len() - first;
        if round > 0 && rest > 0 {
            let second = round.min(rest);
            // SAFETY: `0..second` lies behind `begin - 1` and is free.
            unsafe { self.ring.region.copy_in(base, &data[first..first + second]) };
            self.set_end(second);
        }
        WriteOutcome::Written
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        let (begin, end) = (self.begin(), self.end());
        let cap = self.ring.capacity;
        let (len, round) = if end >= begin {
            (end - begin, 0)
        } else {
            (cap - begin, end)
        };

        let base = self.data_offset();
        let first = len.min(buf.len());
        // SAFETY: the ctrl word is held and `begin..begin + first` is occupied.
        unsafe { self.ring.region.copy_out(base + begin, &mut buf[..first]) };
        let mut new_begin = begin + first;
        let mut copied = first;

        let rest = buf.len() - first;
        if round > 0 && rest > 0 {
            let second = round.min(rest);
            // SAFETY: `0..second` is the wrapped part of the occupied range.
            unsafe { self.ring.region.copy_out(base, &mut buf[first..first + second]) };
            new_begin = second;
            copied += second;
        }

        let end = self.end();
        if new_begin == end {
            self.set_begin(0);
            self.set_end(0);
        } else if new_begin == cap {
            self.set_begin(0);
        } else {
            self.set_begin(new_begin);
        }
        copied
    }
}

impl Drop for RingGuard<'_> {
    fn drop(&mut self) {
        let ctrl = self.ring.word(ring_ctrl::CTRL);
        if let Err(actual) = ctrl.compare_exchange(
            lock_state::LOCKED,
            lock_state::FREE,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            tracing::error!(actual, "unexpected ring ctrl value on release");
            ctrl.store(lock_state::FREE, Ordering::Release);
        }
        wait::wake_one(ctrl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(cap: usize) -> RingChannel {
        RingChannel::new(cap, RingLayout::WithNotify).unwrap()
    }

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(
            RingChannel::new(0, RingLayout::Plain).unwrap_err(),
            ShmError::InvalidCapacity {
                capacity: 0,
                max: MAX_CAPACITY
            }
        );
        assert!(matches!(
            RingChannel::with_region_bytes(16, RingLayout::WithNotify),
            Err(ShmError::RegionTooSmall { len: 16, header: 16 })
        ));
    }

    #[test]
    fn region_bytes_exclude_header() {
        let r = RingChannel::with_region_bytes(1024, RingLayout::WithNotify).unwrap();
        assert_eq!(r.capacity(), 1008);
        let r = RingChannel::with_region_bytes(1024, RingLayout::Plain).unwrap();
        assert_eq!(r.capacity(), 1012);
    }

    #[test]
    fn fills_to_capacity_then_drops() {
        let r = ring(16);
        assert_eq!(r.write(&[1; 10]), WriteOutcome::Written);
        assert_eq!(r.cursors(), (0, 10));
        assert_eq!(r.write(&[2; 6]), WriteOutcome::Written);
        assert_eq!(r.cursors(), (0, 16));
        assert_eq!(r.readable_len(), 16);

        assert_eq!(r.write(&[3]), WriteOutcome::Dropped);
        assert_eq!(r.cursors(), (0, 16));

        let mut out = [0u8; 16];
        assert_eq!(r.read(&mut out), 16);
        assert_eq!(&out[..10], &[1; 10]);
        assert_eq!(&out[10..], &[2; 6]);
        assert_eq!(r.cursors(), (0, 0));
    }

    /// (initial begin, initial end, write len) -> (outcome, begin, end) for capacity 16.
    #[test]
    fn write_boundary_table() {
        let cases: &[(usize, usize, usize, WriteOutcome, (usize, usize))] = &[
            // empty ring
            (0, 0, 16, WriteOutcome::Written, (0, 16)),
            (0, 0, 17, WriteOutcome::Dropped, (0, 0)),
            // begin = 0: no wrap-around space
            (0, 10, 6, WriteOutcome::Written, (0, 16)),
            (0, 10, 7, WriteOutcome::Dropped, (0, 10)),
            // begin = 4: 6 at the tail plus 3 at the head
            (4, 10, 9, WriteOutcome::Written, (4, 3)),
            (4, 10, 10, WriteOutcome::Dropped, (4, 10)),
            (4, 10, 6, WriteOutcome::Written, (4, 16)),
            // end at capacity: only the head is left
            (4, 16, 3, WriteOutcome::Written, (4, 3)),
            (4, 16, 4, WriteOutcome::Dropped, (4, 16)),
            // already wrapped: gap stops one short of begin
            (8, 2, 5, WriteOutcome::Written, (8, 7)),
            (8, 2, 6, WriteOutcome::Dropped, (8, 2)),
        ];

        for &(begin, end, n, expected, cursors) in cases {
            let r = ring_at(16, begin, end);
            let out = r.write(&vec![9; n]);
            assert_eq!(out, expected, "begin={begin} end={end} n={n}");
            assert_eq!(r.cursors(), cursors, "begin={begin} end={end} n={n}");
        }
    }

    #[test]
    fn wrapped_ring_reserves_one_byte() {
        let r = ring_at(16, 8, 2);
        let free = 16 - r.readable_len();
        assert_eq!(free, 6);
        assert_eq!(r.write(&vec![1; free]), WriteOutcome::Dropped);
        assert_eq!(r.write(&vec![1; free - 1]), WriteOutcome::Written);
        assert_eq!(r.cursors(), (8, 7));
        assert_eq!(r.readable_len(), 15);

        // Draining everything lets the next write use the full capacity again.
        assert_eq!(r.read(&mut [0; 16]), 15);
        assert_eq!(r.cursors(), (0, 0));
        assert_eq!(r.write(&[2; 16]), WriteOutcome::Written);
    }

    /// Drive a fresh ring into the `(begin, end)` state through the public API.
    fn ring_at(cap: usize, begin: usize, end: usize) -> RingChannel {
        let r = ring(cap);
        if end >= begin {
            r.write(&vec![0; end]);
            r.read(&mut vec![0; begin]);
        } else {
            r.write(&vec![0; cap]);
            r.read(&mut vec![0; begin]);
            r.write(&vec![0; end]);
        }
        assert_eq!(r.cursors(), (begin, end));
        r
    }

    #[test]
    fn read_across_the_boundary_preserves_order() {
        let r = ring(8);
        assert!(r.write(b"abcdef").is_written());
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert!(r.write(b"ghi").is_written());
        assert_eq!(r.cursors(), (4, 1));

        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf), 5);
        assert_eq!(&buf[..5], b"efghi");
        assert_eq!(r.cursors(), (0, 0));
        assert!(!r.is_readable());
    }

    #[test]
    fn partial_read_folds_begin_at_capacity() {
        let r = ring(8);
        assert!(r.write(b"abcdefgh").is_written());
        let mut buf = [0u8; 2];
        r.read(&mut buf);
        assert!(r.write(b"x").is_written());
        assert_eq!(r.cursors(), (2, 1));

        let mut buf = [0u8; 6];
        assert_eq!(r.read(&mut buf), 6);
        assert_eq!(&buf, b"cdefgh");
        assert_eq!(r.cursors(), (0, 1));
        assert_eq!(r.read_vec(10), b"x");
    }

    #[test]
    fn write_sets_notify_word() {
        let r = ring(32);
        assert_eq!(r.signal_value(), signal::IDLE);
        r.write(b"hi");
        assert_eq!(r.signal_value(), signal::READY);
        r.reset_signal();
        assert_eq!(r.wait_signal(Some(Duration::from_millis(5))), signal::IDLE);

        let plain = RingChannel::new(32, RingLayout::Plain).unwrap();
        plain.write(b"hi");
        assert_eq!(plain.signal_value(), signal::IDLE);
    }

    #[test]
    fn lock_is_released_after_each_operation() {
        let r = ring(16);
        r.write(b"abc");
        r.read_vec(1);
        assert_eq!(
            r.word(ring_ctrl::CTRL).load(Ordering::Acquire),
            lock_state::FREE
        );
    }
}
