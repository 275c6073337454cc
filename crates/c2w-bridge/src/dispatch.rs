//! The controller's dispatch loop.
//!
//! Each request is answered through exactly one [`Completion`]; handlers consume it on every
//! path, and the guard answers `-1` if one is ever dropped. Slow work (fetches, decoding, the
//! readiness timer) runs on spawned tasks and is only observed by later requests.

use std::sync::Arc;

use c2w_shm::layout::status;
use c2w_shm::{Completion, ControlChannel, RingChannel};
use tokio::sync::mpsc;

use crate::backend::{
    DecompressorFactory, FetchRequest, GzipFactory, HttpFetcher, ReqwestFetcher, Transport,
    TransportEvent, TransportEvents,
};
use crate::cert::SharedCert;
use crate::config::BridgeConfig;
use crate::conn::{Connection, ConnectionTable};
use crate::decompress::{ReadOutcome, SessionTable};
use crate::error::BridgeError;
use crate::protocol::Request;
use crate::socket::{ReadinessPoller, SocketState};
use crate::{http, layer, Regions, RequestReceiver};

/// Host services a bridge is wired to.
pub struct Backends {
    pub transport: Option<Box<dyn Transport>>,
    pub fetcher: Arc<dyn HttpFetcher>,
    pub decompressors: Arc<dyn DecompressorFactory>,
    pub cert: SharedCert,
}

impl Backends {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            transport: None,
            fetcher,
            decompressors: Arc::new(GzipFactory),
            cert: SharedCert::new(),
        }
    }

    /// `reqwest` for HTTP and `flate2` for gzip; no socket transport.
    pub fn native() -> Result<Self, BridgeError> {
        let fetcher = ReqwestFetcher::new().map_err(|e| BridgeError::Transport(e.to_string()))?;
        Ok(Self::new(Arc::new(fetcher)))
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Share the certificate hand-off with other bridges built from clones of `cert`.
    pub fn with_cert(mut self, cert: SharedCert) -> Self {
        self.cert = cert;
        self
    }

    pub fn with_decompressors(mut self, factory: impl DecompressorFactory + 'static) -> Self {
        self.decompressors = Arc::new(factory);
        self
    }
}

pub struct StreamBridge {
    control: ControlChannel,
    to_guest: RingChannel,
    from_guest: RingChannel,
    transport: Option<Box<dyn Transport>>,
    events_tx: TransportEvents,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    socket: SocketState,
    fetcher: Arc<dyn HttpFetcher>,
    decompressors: Arc<dyn DecompressorFactory>,
    connections: ConnectionTable,
    sessions: SessionTable,
    cert: SharedCert,
    poller: ReadinessPoller,
}

impl StreamBridge {
    pub fn new(regions: &Regions, config: &BridgeConfig, backends: Backends) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            control: regions.control.clone(),
            to_guest: regions.to_guest.clone(),
            from_guest: regions.from_guest.clone(),
            transport: backends.transport,
            events_tx,
            events_rx,
            socket: SocketState::default(),
            fetcher: backends.fetcher,
            decompressors: backends.decompressors,
            connections: ConnectionTable::new(config.max_connections),
            sessions: SessionTable::new(config.max_connections),
            cert: backends.cert,
            poller: ReadinessPoller::new(config.poll_interval),
        }
    }

    pub fn socket_state(&self) -> SocketState {
        self.socket
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Serve requests until every sender is gone, interleaving transport events.
    pub async fn run(mut self, mut requests: RequestReceiver) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.on_transport_event(event),
            }
        }
        self.poller.cancel();
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
        tracing::debug!("request channel closed; bridge stopped");
    }

    /// Decode a JSON request and handle it. Undecodable messages are answered with `-1`.
    pub fn handle_message(&mut self, raw: &str) {
        match Request::from_json(raw) {
            Ok(request) => self.handle(request),
            Err(err) => {
                tracing::error!("unknown request: {err}");
                self.control.completion().error();
            }
        }
    }

    pub fn handle(&mut self, request: Request) {
        self.pump_events();
        tracing::debug!(tag = request.tag(), "control request");
        let done = self.control.completion();
        match request {
            Request::Accept => self.accept(done),
            Request::Send { buf } => self.send(done, buf),
            Request::Recv { len } => self.recv(done, len),
            Request::RecvIsReadable { timeout } => {
                self.poller.start(&self.to_guest, timeout);
                done.ok();
            }
            Request::RecvIsReadableCancel => {
                self.poller.cancel();
                done.ok();
            }
            Request::NotifySendFromNet { len } => self.send_from_ring(done, len),
            Request::HttpSend { address, req } => self.http_send(done, &address, &req),
            Request::HttpWriteBody { id, body, is_eof } => {
                self.http_write_body(done, id, &body, is_eof)
            }
            Request::HttpIsReadable { id } => {
                let ready = self
                    .connections
                    .get_mut(id)
                    .is_some_and(|conn| conn.has_header());
                done.flag(ready);
            }
            Request::HttpRecv { id, len } => self.http_recv(done, id, len),
            Request::HttpReadBody { id, len } => self.http_read_body(done, id, len),
            Request::SendCert { buf } => {
                self.cert.push(&buf);
                done.ok();
            }
            Request::RecvCert { len } => {
                let max = len.min(done.capacity());
                match self.cert.take(max) {
                    Some((chunk, eof)) => {
                        done.respond(if eof { status::EOF } else { status::OK }, &chunk);
                    }
                    None => done.error(),
                }
            }
            Request::LayerRequest {
                address,
                digest,
                is_gzip,
            } => self.layer_request(done, address, digest, is_gzip),
            Request::LayerIsReadable { id } => match self.connections.get_mut(id) {
                Some(conn) if conn.has_header() && conn.is_done() => {
                    let len = i32::try_from(conn.body().len()).unwrap_or(i32::MAX);
                    done.flag_with_status(true, len);
                }
                _ => done.flag_with_status(false, 0),
            },
            Request::LayerReadAt { id, offset, len } => match self.connections.get_mut(id) {
                Some(conn) if conn.is_done() => {
                    let chunk = conn.body().read_at(offset, len.min(done.capacity()));
                    done.respond(status::OK, &chunk);
                }
                _ => {
                    tracing::warn!(id, "layer body is not available");
                    done.error();
                }
            },
            Request::DecompressInit => {
                match self.sessions.create(self.decompressors.create()) {
                    Some(id) => done.status(id),
                    None => {
                        tracing::warn!("no decompression session id available");
                        done.error();
                    }
                }
            }
            Request::DecompressWrite { id, chunk, is_eof } => {
                match self.sessions.write(id, &chunk, is_eof) {
                    Some(Ok(())) => done.ok(),
                    Some(Err(err)) => {
                        tracing::warn!(id, "decompress_write failed: {err}");
                        done.error();
                    }
                    None => {
                        tracing::warn!(id, "unknown decompression session");
                        done.error();
                    }
                }
            }
            Request::DecompressRead { id, len } => {
                match self.sessions.read(id, len.min(done.capacity())) {
                    ReadOutcome::Data { chunk, eof } => {
                        done.respond(if eof { status::EOF } else { status::OK }, &chunk);
                    }
                    ReadOutcome::Failed => done.error(),
                    ReadOutcome::UnknownSession => {
                        tracing::warn!(id, "unknown decompression session");
                        done.error();
                    }
                }
            }
        }
    }

    /// Apply transport events that arrived since the last request.
    pub fn pump_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_transport_event(event);
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                tracing::debug!("backend transport opened");
                self.socket.opened = true;
                self.socket.opening = false;
            }
            // Lossy on overflow; the ring logs the drop.
            TransportEvent::Data(data) => {
                self.to_guest.write(&data);
            }
            TransportEvent::Closed => {
                tracing::debug!("backend transport closed");
                self.socket.reset();
            }
            TransportEvent::Error(err) => {
                tracing::warn!("backend transport error: {err}");
                self.socket.reset();
            }
        }
    }

    fn accept(&mut self, done: Completion) {
        if self.socket.opened {
            self.socket.accepted = true;
            done.flag(true);
            return;
        }
        if !self.socket.opening {
            match self.transport.as_mut() {
                Some(transport) => match transport.open(self.events_tx.clone()) {
                    Ok(()) => self.socket.opening = true,
                    Err(err) => tracing::warn!("failed to open backend transport: {err}"),
                },
                None => tracing::warn!("accept without a backend transport"),
            }
        }
        done.flag(false);
    }

    fn transport_send(&mut self, data: Vec<u8>) -> Result<(), BridgeError> {
        if !self.socket.opened {
            return Err(BridgeError::TransportNotOpen);
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or(BridgeError::TransportNotOpen)?;
        transport.send(data)
    }

    fn send(&mut self, done: Completion, buf: Vec<u8>) {
        if !self.socket.accepted {
            tracing::error!("cannot send to unaccepted socket");
            return done.error();
        }
        match self.transport_send(buf) {
            Ok(()) => done.ok(),
            Err(err) => {
                tracing::warn!("send failed: {err}");
                done.error();
            }
        }
    }

    fn recv(&mut self, done: Completion, len: usize) {
        if !self.socket.accepted {
            tracing::error!("cannot recv from unaccepted socket");
            return done.error();
        }
        let chunk = self.to_guest.read_vec(len.min(done.capacity()));
        done.respond(status::OK, &chunk);
    }

    fn send_from_ring(&mut self, done: Completion, len: usize) {
        let data = self.from_guest.read_vec(self.from_guest.capacity());
        if data.len() != len {
            tracing::debug!(announced = len, drained = data.len(), "outbound ring length mismatch");
        }
        if data.is_empty() {
            return done.ok();
        }
        match self.transport_send(data) {
            Ok(()) => done.ok(),
            Err(err) => {
                tracing::warn!("dropping outbound bytes: {err}");
                done.error();
            }
        }
    }

    fn http_send(&mut self, done: Completion, address: &str, raw: &[u8]) {
        let request = match http::normalize_request(address, raw) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(%address, "invalid fetch request: {err}");
                return done.error();
            }
        };
        match self.connections.insert(Connection::new(request)) {
            Some(id) => done.status(id),
            None => {
                tracing::error!("failed to get id");
                done.error();
            }
        }
    }

    fn http_write_body(&mut self, done: Completion, id: i32, body: &[u8], eof: bool) {
        let Some(conn) = self.connections.get_mut(id) else {
            tracing::warn!(id, "http_writebody for unknown connection");
            return done.error();
        };
        if let Some(request) = conn.write_body(body, eof) {
            tracing::debug!(id, url = %request.url, method = %request.method, "issuing fetch");
            conn.await_response(http::spawn_fetch(self.fetcher.clone(), request));
        }
        done.ok();
    }

    fn http_recv(&mut self, done: Completion, id: i32, len: usize) {
        let Some(header) = self.connections.get_mut(id).and_then(|c| c.header_mut()) else {
            tracing::warn!(id, "response is not available");
            return done.error();
        };
        let chunk = header.drain_front(len.min(done.capacity()));
        let code = if header.is_empty() { status::EOF } else { status::OK };
        done.respond(code, &chunk);
    }

    fn http_read_body(&mut self, done: Completion, id: i32, len: usize) {
        let Some(conn) = self.connections.get_mut(id).filter(|c| c.has_header()) else {
            tracing::warn!(id, "response body is not available");
            return done.error();
        };
        let chunk = conn.body_mut().drain_front(len.min(done.capacity()));
        let finished = conn.is_done() && conn.body().is_empty();
        if finished {
            self.connections.remove(id);
        }
        done.respond(if finished { status::EOF } else { status::OK }, &chunk);
    }

    fn layer_request(&mut self, done: Completion, address: String, digest: String, is_gzip: bool) {
        let request = FetchRequest::get(address);
        let mut conn = Connection::new(request.clone());
        conn.mark_sent();
        let Some(id) = self.connections.insert(conn) else {
            tracing::error!("failed to get id");
            return done.error();
        };
        let rx = layer::spawn_layer_fetch(self.fetcher.clone(), request, digest, is_gzip);
        if let Some(conn) = self.connections.get_mut(id) {
            conn.await_response(rx);
        }
        done.status(id);
    }
}

impl std::fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBridge")
            .field("socket", &self.socket)
            .field("connections", &self.connections.len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
