use std::collections::VecDeque;

/// Growable byte queue used for request/response bodies, header blobs and decoder output.
///
/// Appends are amortised O(1) per byte; draining from the front never reallocates the rest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChunkBuffer {
    buf: VecDeque<u8>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend(data);
    }

    /// Remove and return up to `max` bytes from the front.
    pub fn drain_front(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    /// Copy up to `max` bytes starting at `offset` without consuming them. Reads past the end
    /// return an empty vector.
    pub fn read_at(&self, offset: usize, max: usize) -> Vec<u8> {
        if offset >= self.buf.len() {
            return Vec::new();
        }
        let end = offset + max.min(self.buf.len() - offset);
        self.buf.range(offset..end).copied().collect()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }
}

impl From<Vec<u8>> for ChunkBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            buf: VecDeque::from(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_append_order() {
        let mut buf = ChunkBuffer::new();
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.drain_front(3), b"hel");
        assert_eq!(buf.drain_front(100), b"lo world");
        assert!(buf.is_empty());
        assert!(buf.drain_front(4).is_empty());
    }

    #[test]
    fn read_at_is_clamped_and_non_consuming() {
        let buf = ChunkBuffer::from(b"0123456789".to_vec());
        assert_eq!(buf.read_at(2, 3), b"234");
        assert_eq!(buf.read_at(8, 10), b"89");
        assert!(buf.read_at(10, 1).is_empty());
        assert!(buf.read_at(99, 1).is_empty());
        assert_eq!(buf.len(), 10);
    }
}
