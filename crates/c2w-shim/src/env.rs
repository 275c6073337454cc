//! `env` imports: HTTP, layer downloads, decompression and certificate hand-off.

use std::thread;
use std::time::Duration;

use c2w_bridge::http::ResponseHeader;
use c2w_bridge::Request;
use c2w_shm::layout::status;

use crate::client::ControlClient;
use crate::ShimError;

const CERT_RETRY: Duration = Duration::from_millis(100);
const READABLE_POLL: Duration = Duration::from_millis(10);
const UPLOAD_CHUNK: usize = 64 * 1024;

/// A complete response as seen by the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub header: ResponseHeader,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct GuestControl {
    client: ControlClient,
}

impl GuestControl {
    pub fn new(client: ControlClient) -> Self {
        Self { client }
    }

    pub fn client_mut(&mut self) -> &mut ControlClient {
        &mut self.client
    }

    /// Open an HTTP exchange; `init` is a JSON fetch init object. Returns the connection id.
    pub fn http_send(&mut self, address: &str, init: &[u8]) -> Result<i32, ShimError> {
        let reply = self.client.call_ok(Request::HttpSend {
            address: address.to_string(),
            req: init.to_vec(),
        })?;
        Ok(reply.status)
    }

    pub fn http_writebody(&mut self, id: i32, body: &[u8], eof: bool) -> Result<usize, ShimError> {
        self.client.call_ok(Request::HttpWriteBody {
            id,
            body: body.to_vec(),
            is_eof: eof,
        })?;
        Ok(body.len())
    }

    pub fn http_isreadable(&mut self, id: i32) -> Result<bool, ShimError> {
        Ok(self.client.call_ok(Request::HttpIsReadable { id })?.flag())
    }

    /// Next chunk of the header blob, and whether it was the last.
    pub fn http_recv(&mut self, id: i32, max: usize) -> Result<(Vec<u8>, bool), ShimError> {
        let reply = self.client.call_ok(Request::HttpRecv { id, len: max })?;
        let eof = reply.is_eof();
        Ok((reply.payload, eof))
    }

    pub fn http_readbody(&mut self, id: i32, max: usize) -> Result<(Vec<u8>, bool), ShimError> {
        let reply = self.client.call_ok(Request::HttpReadBody { id, len: max })?;
        let eof = reply.is_eof();
        Ok((reply.payload, eof))
    }

    pub fn layer_request(&mut self, address: &str, digest: &str, gzip: bool) -> Result<i32, ShimError> {
        let reply = self.client.call_ok(Request::LayerRequest {
            address: address.to_string(),
            digest: digest.to_string(),
            is_gzip: gzip,
        })?;
        Ok(reply.status)
    }

    /// `Some(len)` once the verified body is available.
    pub fn layer_isreadable(&mut self, id: i32) -> Result<Option<usize>, ShimError> {
        let reply = self.client.call_ok(Request::LayerIsReadable { id })?;
        Ok(reply.flag().then(|| reply.status.max(0) as usize))
    }

    pub fn layer_readat(&mut self, id: i32, offset: usize, max: usize) -> Result<Vec<u8>, ShimError> {
        let reply = self.client.call_ok(Request::LayerReadAt {
            id,
            offset,
            len: max,
        })?;
        Ok(reply.payload)
    }

    pub fn decompress_init(&mut self) -> Result<i32, ShimError> {
        Ok(self.client.call_ok(Request::DecompressInit)?.status)
    }

    pub fn decompress_write(&mut self, id: i32, chunk: &[u8], eof: bool) -> Result<(), ShimError> {
        self.client.call_ok(Request::DecompressWrite {
            id,
            chunk: chunk.to_vec(),
            is_eof: eof,
        })?;
        Ok(())
    }

    /// Decoded bytes produced so far. An empty chunk without EOF means "not yet".
    pub fn decompress_read(&mut self, id: i32, max: usize) -> Result<(Vec<u8>, bool), ShimError> {
        let reply = self.client.call_ok(Request::DecompressRead { id, len: max })?;
        let eof = reply.is_eof();
        Ok((reply.payload, eof))
    }

    pub fn send_cert(&mut self, cert: &[u8]) -> Result<(), ShimError> {
        self.client.call_ok(Request::SendCert { buf: cert.to_vec() })?;
        Ok(())
    }

    /// Collect the whole certificate, retrying every 100 ms until one has been pushed.
    pub fn recv_cert_all(&mut self) -> Result<Vec<u8>, ShimError> {
        let mut cert = Vec::new();
        loop {
            let len = self.client.capacity();
            let reply = self.client.call(Request::RecvCert { len })?;
            if reply.is_error() {
                thread::sleep(CERT_RETRY);
                continue;
            }
            cert.extend_from_slice(&reply.payload);
            if reply.status == status::EOF {
                return Ok(cert);
            }
        }
    }

    /// Perform a whole exchange: upload `body` in chunks, wait for the response, then drain the
    /// header blob and the body.
    pub fn round_trip(&mut self, address: &str, init: &[u8], body: &[u8]) -> Result<HttpResponse, ShimError> {
        let id = self.http_send(address, init)?;

        let mut chunks = body.chunks(UPLOAD_CHUNK).peekable();
        if chunks.peek().is_none() {
            self.http_writebody(id, &[], true)?;
        }
        while let Some(chunk) = chunks.next() {
            self.http_writebody(id, chunk, chunks.peek().is_none())?;
        }

        while !self.http_isreadable(id)? {
            thread::sleep(READABLE_POLL);
        }

        let max = self.client.capacity();
        let mut raw_header = Vec::new();
        loop {
            let (chunk, eof) = self.http_recv(id, max)?;
            raw_header.extend_from_slice(&chunk);
            if eof {
                break;
            }
        }
        let header: ResponseHeader = serde_json::from_slice(&raw_header)?;

        let mut body = Vec::new();
        loop {
            let (chunk, eof) = self.http_readbody(id, max)?;
            body.extend_from_slice(&chunk);
            if eof {
                break;
            }
        }
        tracing::debug!(%address, status = header.status, len = body.len(), "http round trip done");
        Ok(HttpResponse { header, body })
    }
}
