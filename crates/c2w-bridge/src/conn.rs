//! Per-request HTTP / layer state, keyed by small integer ids.

use std::collections::HashMap;

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::backend::FetchRequest;
use crate::chunk::ChunkBuffer;
use crate::http::{self, ResponseOutcome};

/// Largest id; ids must fit the signed 32-bit `status` word.
pub const MAX_ID: i32 = 0x7FFF_FFFF;

/// One HTTP exchange (or layer download) between `http_send` and the last body read.
#[derive(Debug)]
pub struct Connection {
    address: String,
    request: FetchRequest,
    request_body: ChunkBuffer,
    body_eof: bool,
    request_sent: bool,
    pending: Option<oneshot::Receiver<ResponseOutcome>>,
    header: Option<ChunkBuffer>,
    body: ChunkBuffer,
    done: bool,
}

impl Connection {
    pub fn new(request: FetchRequest) -> Self {
        Self {
            address: request.url.clone(),
            request,
            request_body: ChunkBuffer::new(),
            body_eof: false,
            request_sent: false,
            pending: None,
            header: None,
            body: ChunkBuffer::new(),
            done: false,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    /// Append a request body chunk. Returns the request to send once the body is complete; this
    /// happens at most once per connection.
    pub fn write_body(&mut self, chunk: &[u8], eof: bool) -> Option<FetchRequest> {
        self.request_body.append(chunk);
        self.body_eof = eof;
        if !eof || self.request_sent {
            return None;
        }
        self.request_sent = true;
        let mut request = self.request.clone();
        http::attach_body(&mut request, self.request_body.to_vec());
        Some(request)
    }

    /// Mark the request as sent without a body phase (layer downloads).
    pub fn mark_sent(&mut self) {
        self.body_eof = true;
        self.request_sent = true;
    }

    pub fn is_sent(&self) -> bool {
        self.request_sent
    }

    pub fn is_body_complete(&self) -> bool {
        self.body_eof
    }

    pub fn await_response(&mut self, rx: oneshot::Receiver<ResponseOutcome>) {
        self.pending = Some(rx);
    }

    /// Absorb the background fetch result if it has arrived.
    pub fn poll(&mut self) {
        let Some(rx) = self.pending.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(outcome) => self.complete(outcome),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Closed) => {
                tracing::warn!(address = %self.address, "fetch task vanished");
                self.complete(http::service_unavailable());
            }
        }
    }

    pub fn complete(&mut self, outcome: ResponseOutcome) {
        self.pending = None;
        self.header = Some(ChunkBuffer::from(outcome.header));
        self.body = ChunkBuffer::from(outcome.body);
        self.done = true;
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn header_mut(&mut self) -> Option<&mut ChunkBuffer> {
        self.header.as_mut()
    }

    pub fn body(&self) -> &ChunkBuffer {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ChunkBuffer {
        &mut self.body
    }
}

/// Id allocator plus record storage.
///
/// Ids are found by linear probing from a cursor over `0..=max_id`, wrapping to 0. An id is only
/// handed out again after its record has been removed.
#[derive(Debug)]
pub struct ConnectionTable {
    records: HashMap<i32, Connection>,
    cursor: i32,
    max_id: i32,
    limit: usize,
}

impl ConnectionTable {
    /// `limit` bounds the number of live records; `0` means unbounded.
    pub fn new(limit: usize) -> Self {
        Self::with_max_id(MAX_ID, limit)
    }

    pub fn with_max_id(max_id: i32, limit: usize) -> Self {
        Self {
            records: HashMap::new(),
            cursor: 0,
            max_id,
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn next_free_id(&mut self) -> Option<i32> {
        if self.limit != 0 && self.records.len() >= self.limit {
            return None;
        }
        let start = self.cursor;
        loop {
            if !self.records.contains_key(&self.cursor) {
                return Some(self.cursor);
            }
            self.cursor = if self.cursor >= self.max_id {
                0
            } else {
                self.cursor + 1
            };
            if self.cursor == start {
                return None;
            }
        }
    }

    /// Store `conn` under a fresh id, or return `None` when no id is available.
    pub fn insert(&mut self, conn: Connection) -> Option<i32> {
        let id = self.next_free_id()?;
        self.records.insert(id, conn);
        Some(id)
    }

    /// Look up a record, absorbing any completed fetch first.
    pub fn get_mut(&mut self, id: i32) -> Option<&mut Connection> {
        let conn = self.records.get_mut(&id)?;
        conn.poll();
        Some(conn)
    }

    pub fn remove(&mut self, id: i32) -> Option<Connection> {
        self.records.remove(&id)
    }
}
