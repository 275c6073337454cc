//! Backing storage for a shared region.

use std::sync::atomic::AtomicI32;

use crate::layout::WORD_BYTES;

/// A zero-initialised, word-aligned block of memory shared by two execution contexts.
///
/// The memory is stored as `AtomicI32` words so header words can be accessed atomically, while
/// the byte area after the header is copied through raw pointers. Byte copies are only sound when
/// the caller owns the byte area at that moment, which the ring lock and the control protocol
/// guarantee.
pub struct SharedRegion {
    words: Box<[AtomicI32]>,
    len: usize,
}

impl SharedRegion {
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(WORD_BYTES);
        let words = (0..word_count).map(|_| AtomicI32::new(0)).collect();
        Self { words, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn word(&self, index: usize) -> &AtomicI32 {
        &self.words[index]
    }

    /// Copy `src` into the region starting at byte `offset`.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to `offset..offset + src.len()` for the duration
    /// of the copy, and the range must not overlap a word accessed atomically.
    pub unsafe fn copy_in(&self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.len, "copy_in out of bounds");
        let base = self.words.as_ptr() as *mut u8;
        core::ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), src.len());
    }

    /// Copy bytes starting at `offset` into `dst`.
    ///
    /// # Safety
    ///
    /// No other context may write `offset..offset + dst.len()` during the copy.
    pub unsafe fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.len, "copy_out out of bounds");
        let base = self.words.as_ptr() as *const u8;
        core::ptr::copy_nonoverlapping(base.add(offset), dst.as_mut_ptr(), dst.len());
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion").field("len", &self.len).finish()
    }
}
