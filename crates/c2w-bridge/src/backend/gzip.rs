use std::io::Write;

use flate2::write::GzDecoder;

use super::{DecompressError, Decompressor, DecompressorFactory};

/// Gzip decoder fed incrementally; output accumulates until pulled.
pub struct GzipDecompressor {
    decoder: GzDecoder<Vec<u8>>,
    closed: bool,
}

impl GzipDecompressor {
    pub fn new() -> Self {
        Self {
            decoder: GzDecoder::new(Vec::new()),
            closed: false,
        }
    }
}

impl Default for GzipDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for GzipDecompressor {
    fn push(&mut self, input: &[u8]) -> Result<(), DecompressError> {
        if self.closed {
            return Err(DecompressError::WriteAfterClose);
        }
        self.decoder
            .write_all(input)
            .and_then(|()| self.decoder.flush())
            .map_err(|e| DecompressError::Corrupt(e.to_string()))
    }

    fn close(&mut self) -> Result<(), DecompressError> {
        if self.closed {
            return Ok(());
        }
        self.decoder
            .try_finish()
            .map_err(|e| DecompressError::Corrupt(e.to_string()))?;
        self.closed = true;
        Ok(())
    }

    fn pull(&mut self) -> Vec<u8> {
        std::mem::take(self.decoder.get_mut())
    }

    fn is_finished(&self) -> bool {
        self.closed
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipFactory;

impl DecompressorFactory for GzipFactory {
    fn create(&self) -> Box<dyn Decompressor> {
        Box::new(GzipDecompressor::new())
    }
}

/// Decode a complete gzip stream.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, DecompressError> {
    let mut decoder = GzipDecompressor::new();
    decoder.push(data)?;
    decoder.close()?;
    Ok(decoder.pull())
}
