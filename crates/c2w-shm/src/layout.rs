//! Shared memory layout contract for the c2w transport.
//!
//! The controller allocates each region once (one per logical transport) and hands it to the
//! guest context. Every region starts with a few 32-bit control words viewed as an
//! `Int32Array` on the JS side, followed by a byte area:
//!
//! - ring: `ctrl@0, begin@4, end@8, notify@12, data@16` (the plain variant has no `notify`
//!   word and puts `data@12`)
//! - control: `ctrl@0, status@4, len@8, data@12`
//!
//! All words are little-endian `i32`.

/// Size of one control word in bytes.
pub const WORD_BYTES: usize = 4;

/// Largest capacity representable in the signed 32-bit cursor / length words.
pub const MAX_CAPACITY: usize = i32::MAX as usize;

/// Size of a ring region (header included) allocated by default: 1 MiB.
pub const DEFAULT_RING_REGION_BYTES: usize = 1024 * 1024;

/// Size of the control data area allocated by default: 1 MiB.
pub const DEFAULT_CONTROL_DATA_BYTES: usize = 1024 * 1024;

/// Word indices into a ring region header.
pub mod ring_ctrl {
    /// Mutual-exclusion word: 0 = free, 1 = locked.
    pub const CTRL: usize = 0;
    /// Inclusive read cursor.
    pub const BEGIN: usize = 1;
    /// Exclusive write cursor.
    pub const END: usize = 2;
    /// Signal word for blocking readiness waiters (notify layout only).
    pub const NOTIFY: usize = 3;
}

/// Values stored in a ring's `ctrl` word.
pub mod lock_state {
    pub const FREE: i32 = 0;
    pub const LOCKED: i32 = 1;
}

/// Values stored in a ring's `notify` word.
pub mod signal {
    /// Nothing signalled yet.
    pub const IDLE: i32 = 0;
    /// Data is available for reading.
    pub const READY: i32 = 1;
    /// A readiness poll reached its deadline without data.
    pub const TIMEOUT: i32 = -1;
}

/// Word indices into a control region header.
pub mod control_ctrl {
    pub const CTRL: usize = 0;
    pub const STATUS: usize = 1;
    pub const LEN: usize = 2;
    pub const WORDS: usize = 3;
    pub const BYTES: usize = WORDS * super::WORD_BYTES;
}

/// Values stored in a control region's `ctrl` word.
pub mod control_state {
    /// A request is outstanding; the requester blocks while the word holds this value.
    pub const PENDING: i32 = 0;
    /// The responder has written `status`/`len`/`data`.
    pub const READY: i32 = 1;
}

/// Status codes written into a control region's `status` word.
pub mod status {
    pub const ERROR: i32 = -1;
    pub const OK: i32 = 0;
    /// End-of-stream marker for chunked reads.
    pub const EOF: i32 = 1;
}

/// Which ring header variant a region uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingLayout {
    /// `ctrl, begin, end, notify` followed by data at byte 16.
    WithNotify,
    /// `ctrl, begin, end` followed by data at byte 12.
    Plain,
}

impl RingLayout {
    pub const fn header_words(self) -> usize {
        match self {
            RingLayout::WithNotify => 4,
            RingLayout::Plain => 3,
        }
    }

    pub const fn header_bytes(self) -> usize {
        self.header_words() * WORD_BYTES
    }

    pub const fn has_notify(self) -> bool {
        matches!(self, RingLayout::WithNotify)
    }
}

/// Number of bytes required to store a ring with `capacity` data bytes.
pub const fn bytes_for_ring(capacity: usize, layout: RingLayout) -> usize {
    layout.header_bytes() + capacity
}

/// Number of bytes required to store a control region with `data_capacity` payload bytes.
pub const fn bytes_for_control(data_capacity: usize) -> usize {
    control_ctrl::BYTES + data_capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sizes_match_js_views() {
        assert_eq!(RingLayout::WithNotify.header_bytes(), 16);
        assert_eq!(RingLayout::Plain.header_bytes(), 12);
        assert_eq!(control_ctrl::BYTES, 12);
        assert_eq!(bytes_for_ring(4096, RingLayout::WithNotify), 4112);
        assert_eq!(bytes_for_control(4096), 12 + 4096);
    }
}
