//! Streaming decompression sessions.
//!
//! Input is buffered as the guest writes it. Decoding happens in background pulls on the blocking
//! pool; a read serves whatever output has accumulated and starts the next pull if none is in
//! flight. The decoder itself travels with the pull and comes back with its result, so a session
//! never shares it.

use std::collections::HashMap;

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::backend::{DecompressError, Decompressor};
use crate::chunk::ChunkBuffer;
use crate::conn::MAX_ID;

struct Pull {
    decoder: Box<dyn Decompressor>,
    result: Result<Vec<u8>, DecompressError>,
    finished: bool,
}

pub struct Session {
    /// `None` while a pull owns the decoder.
    decoder: Option<Box<dyn Decompressor>>,
    input: ChunkBuffer,
    writer_closed: bool,
    output: ChunkBuffer,
    pull: Option<oneshot::Receiver<Pull>>,
    done: bool,
    error: Option<DecompressError>,
}

impl Session {
    fn new(decoder: Box<dyn Decompressor>) -> Self {
        Self {
            decoder: Some(decoder),
            input: ChunkBuffer::new(),
            writer_closed: false,
            output: ChunkBuffer::new(),
            pull: None,
            done: false,
            error: None,
        }
    }

    fn write(&mut self, chunk: &[u8], eof: bool) -> Result<(), DecompressError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.writer_closed && !chunk.is_empty() {
            return Err(DecompressError::WriteAfterClose);
        }
        self.input.append(chunk);
        if eof {
            self.writer_closed = true;
        }
        Ok(())
    }

    fn absorb(&mut self) {
        let Some(rx) = self.pull.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(pull) => {
                self.pull = None;
                self.decoder = Some(pull.decoder);
                match pull.result {
                    Ok(out) => {
                        self.output.append(&out);
                        self.done = pull.finished;
                    }
                    Err(err) => self.error = Some(err),
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Closed) => {
                self.pull = None;
                self.error = Some(DecompressError::Corrupt(
                    "decoder task exited without a result".to_string(),
                ));
            }
        }
    }

    fn start_pull(&mut self) {
        if self.pull.is_some() {
            return;
        }
        let Some(mut decoder) = self.decoder.take() else {
            return;
        };
        let input = self.input.drain_front(usize::MAX);
        let close = self.writer_closed;
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let result = decoder.push(&input).and_then(|()| {
                if close {
                    decoder.close()?;
                }
                Ok(decoder.pull())
            });
            let finished = decoder.is_finished();
            let _ = tx.send(Pull {
                decoder,
                result,
                finished,
            });
        });
        self.pull = Some(rx);
    }
}

/// Result of one `decompress_read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    UnknownSession,
    Failed,
    /// `eof` is set on the read that drains the last output byte; the session is gone after it.
    Data { chunk: Vec<u8>, eof: bool },
}

pub struct SessionTable {
    sessions: HashMap<i32, Session>,
    next_id: i32,
    limit: usize,
}

impl SessionTable {
    pub fn new(limit: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 0,
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn create(&mut self, decoder: Box<dyn Decompressor>) -> Option<i32> {
        if self.limit != 0 && self.sessions.len() >= self.limit {
            return None;
        }
        let start = self.next_id;
        while self.sessions.contains_key(&self.next_id) {
            self.next_id = if self.next_id >= MAX_ID { 0 } else { self.next_id + 1 };
            if self.next_id == start {
                return None;
            }
        }
        let id = self.next_id;
        self.sessions.insert(id, Session::new(decoder));
        self.next_id = if id >= MAX_ID { 0 } else { id + 1 };
        Some(id)
    }

    /// Feed input; returns `None` for an unknown id.
    pub fn write(&mut self, id: i32, chunk: &[u8], eof: bool) -> Option<Result<(), DecompressError>> {
        let session = self.sessions.get_mut(&id)?;
        session.absorb();
        Some(session.write(chunk, eof))
    }

    pub fn read(&mut self, id: i32, max: usize) -> ReadOutcome {
        let Some(session) = self.sessions.get_mut(&id) else {
            return ReadOutcome::UnknownSession;
        };
        session.absorb();
        if let Some(err) = &session.error {
            tracing::warn!(id, "decompression failed: {err}");
            return ReadOutcome::Failed;
        }

        let chunk = session.output.drain_front(max);
        if session.done {
            let eof = session.output.is_empty();
            if eof {
                self.sessions.remove(&id);
            }
            return ReadOutcome::Data { chunk, eof };
        }
        session.start_pull();
        ReadOutcome::Data { chunk, eof: false }
    }
}
