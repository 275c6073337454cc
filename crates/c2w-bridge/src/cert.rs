use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::chunk::ChunkBuffer;

/// Certificate bytes pushed by one guest (`send_cert`) and drained by another (`recv_cert`).
#[derive(Debug, Default)]
pub struct CertBuffer {
    buf: ChunkBuffer,
    done: bool,
}

impl CertBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.append(data);
        self.done = true;
    }

    pub fn is_ready(&self) -> bool {
        self.done
    }

    /// Take up to `max` bytes. `None` until a certificate has been pushed; the flag is set once
    /// the buffer is drained.
    pub fn take(&mut self, max: usize) -> Option<(Vec<u8>, bool)> {
        if !self.done {
            return None;
        }
        let chunk = self.buf.drain_front(max);
        Some((chunk, self.buf.is_empty()))
    }
}

/// A [`CertBuffer`] shared by every bridge it is cloned into.
///
/// The guest that generates the certificate and the guest that trusts it are served by
/// different bridges; both must be built with clones of the same handle.
#[derive(Debug, Clone, Default)]
pub struct SharedCert(Arc<Mutex<CertBuffer>>);

impl SharedCert {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CertBuffer> {
        // A panicking holder leaves the buffer in a consistent state.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, data: &[u8]) {
        self.lock().push(data);
    }

    pub fn is_ready(&self) -> bool {
        self.lock().is_ready()
    }

    pub fn take(&self, max: usize) -> Option<(Vec<u8>, bool)> {
        self.lock().take(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_pushed() {
        let mut cert = CertBuffer::new();
        assert_eq!(cert.take(10), None);

        cert.push(b"-----BEGIN CERTIFICATE-----");
        assert!(cert.is_ready());
        assert_eq!(cert.take(5), Some((b"-----".to_vec(), false)));
        let (rest, eof) = cert.take(100).unwrap();
        assert_eq!(rest, b"BEGIN CERTIFICATE-----");
        assert!(eof);
        assert_eq!(cert.take(100), Some((Vec::new(), true)));
    }

    #[test]
    fn clones_share_one_buffer() {
        let producer = SharedCert::new();
        let consumer = producer.clone();
        assert_eq!(consumer.take(4), None);

        producer.push(b"PEM");
        assert!(consumer.is_ready());
        assert_eq!(consumer.take(4), Some((b"PEM".to_vec(), true)));
        assert_eq!(producer.take(4), Some((Vec::new(), true)));
    }
}
