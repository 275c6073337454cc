#![cfg(not(target_arch = "wasm32"))]

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use c2w_bridge::backend::{
    FetchError, FetchRequest, FetchResponse, HttpFetcher, Transport, TransportEvent, TransportEvents,
};
use c2w_bridge::{request_channel, Backends, BridgeConfig, BridgeError, Regions, StreamBridge};
use c2w_shim::{ControlClient, DataPath, Errno, GuestControl, SocketShim};

const LISTEN_FD: u32 = 4;
const CONN_FD: u32 = 5;

#[derive(Clone, Default)]
struct LoopbackTransport {
    events: Arc<Mutex<Option<TransportEvents>>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl LoopbackTransport {
    fn deliver(&self, data: &[u8]) {
        let events = self.events.lock().unwrap();
        events
            .as_ref()
            .unwrap()
            .send(TransportEvent::Data(data.to_vec()))
            .unwrap();
    }

    fn sent(&self) -> Vec<u8> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self, events: TransportEvents) -> Result<(), BridgeError> {
        events.send(TransportEvent::Opened).unwrap();
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn send(&mut self, data: Vec<u8>) -> Result<(), BridgeError> {
        self.sent.lock().unwrap().extend(data);
        Ok(())
    }

    fn close(&mut self) {}
}

fn echo_fetcher() -> Arc<dyn HttpFetcher> {
    let fetcher = |request: FetchRequest| async move {
        Ok::<_, FetchError>(FetchResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![("x-method".to_string(), request.method.clone())],
            redirected: false,
            body: Ok(request.body.unwrap_or_else(|| request.url.clone().into_bytes())),
            url: request.url,
            kind: "cors".to_string(),
        })
    };
    Arc::new(fetcher)
}

struct Guest {
    regions: Regions,
    client: Option<ControlClient>,
}

impl Guest {
    fn take_client(&mut self) -> ControlClient {
        self.client.take().unwrap()
    }
}

/// Start a bridge on the current runtime and hand back the guest's end of it.
fn start(config: BridgeConfig, backends: Backends) -> Guest {
    let regions = Regions::allocate(&config).unwrap();
    let (tx, rx) = request_channel();
    tokio::spawn(StreamBridge::new(&regions, &config, backends).run(rx));
    Guest {
        client: Some(ControlClient::new(regions.control.clone(), tx)),
        regions,
    }
}

fn accept_blocking(sock: &mut SocketShim) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match sock.accept(LISTEN_FD) {
            Ok(fd) => return fd,
            Err(Errno::Again) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
            Err(err) => panic!("accept failed: {err}"),
        }
    }
}

async fn guest<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    tokio::task::spawn_blocking(f).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_round_trip_from_guest_thread() {
    let mut g = start(BridgeConfig::default(), Backends::new(echo_fetcher()));
    let mut env = GuestControl::new(g.take_client());

    let (get, post) = guest(move || {
        let get = env
            .round_trip("http://x/y", br#"{"method":"GET"}"#, b"")
            .unwrap();
        let payload: Vec<u8> = (0..200_000u32).map(|v| v as u8).collect();
        let post = env
            .round_trip("http://x/upload", br#"{"method":"POST"}"#, &payload)
            .unwrap();
        (get, post)
    })
    .await;

    assert_eq!(get.header.status, 200);
    assert_eq!(get.header.kind, "cors");
    assert_eq!(get.body, b"http://x/y");
    assert_eq!(post.header.headers.get("x-method").map(String::as_str), Some("POST"));
    assert_eq!(post.body.len(), 200_000);
    assert!(post.body.iter().enumerate().all(|(i, b)| *b == i as u8));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn small_control_region_still_carries_whole_responses() {
    let config = BridgeConfig {
        control_capacity: 7,
        ..BridgeConfig::default()
    };
    let mut g = start(config, Backends::new(echo_fetcher()));
    let mut env = GuestControl::new(g.take_client());
    let resp = guest(move || env.round_trip("http://example.com/a/long/path", b"", b"").unwrap()).await;
    assert_eq!(resp.header.url, "http://example.com/a/long/path");
    assert_eq!(resp.body, b"http://example.com/a/long/path");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ring_socket_accepts_sends_and_receives() {
    let transport = LoopbackTransport::default();
    let mut g = start(
        BridgeConfig::default(),
        Backends::new(echo_fetcher()).with_transport(transport.clone()),
    );
    let sock = SocketShim::new(g.take_client(), &g.regions, DataPath::Ring, LISTEN_FD, CONN_FD);

    let mut sock = guest(move || {
        let mut sock = sock;
        assert_eq!(accept_blocking(&mut sock), CONN_FD);
        assert_eq!(sock.send(CONN_FD, b"GET / HTTP/1.1\r\n\r\n"), Ok(18));
        let mut buf = [0u8; 16];
        assert_eq!(sock.recv(CONN_FD, &mut buf), Err(Errno::Again));
        assert_eq!(sock.poll_readable(CONN_FD, Some(20_000_000)), Ok(false));
        sock
    })
    .await;
    assert_eq!(transport.sent(), b"GET / HTTP/1.1\r\n\r\n");

    transport.deliver(b"HTTP/1.1 200 OK\r\n");
    sock = guest(move || {
        assert_eq!(sock.poll_readable(CONN_FD, Some(2_000_000_000)), Ok(true));
        let mut buf = [0u8; 64];
        let n = sock.recv(CONN_FD, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"HTTP/1.1 200 OK\r\n");
        sock
    })
    .await;

    guest(move || {
        assert_eq!(sock.accept(LISTEN_FD), Err(Errno::Inval));
        assert_eq!(sock.send(9, b"x"), Err(Errno::Inval));
        assert!(sock.fdstat(LISTEN_FD).is_ok());
        assert!(sock.fdstat(CONN_FD).is_ok());

        sock.close(CONN_FD).unwrap();
        assert_eq!(sock.fdstat(CONN_FD), Err(Errno::Inval));
        assert_eq!(sock.accept(LISTEN_FD), Ok(CONN_FD));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn control_socket_moves_bytes_through_requests() {
    let transport = LoopbackTransport::default();
    let mut g = start(
        BridgeConfig::default(),
        Backends::new(echo_fetcher()).with_transport(transport.clone()),
    );
    let sock = SocketShim::new(g.take_client(), &g.regions, DataPath::Control, LISTEN_FD, CONN_FD);

    let sock = guest(move || {
        let mut sock = sock;
        accept_blocking(&mut sock);
        assert_eq!(sock.send(CONN_FD, b"hello"), Ok(5));
        let mut buf = [0u8; 8];
        assert_eq!(sock.recv(CONN_FD, &mut buf), Err(Errno::Again));
        sock
    })
    .await;
    assert_eq!(transport.sent(), b"hello");

    transport.deliver(b"0123456789");
    guest(move || {
        let mut sock = sock;
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = Vec::new();
        while got.len() < 10 {
            let mut buf = [0u8; 4];
            match sock.recv(CONN_FD, &mut buf) {
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(Errno::Again) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
                Err(err) => panic!("recv failed: {err}"),
            }
        }
        assert_eq!(got, b"0123456789");
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decompress_and_cert_imports() {
    let mut g = start(BridgeConfig::default(), Backends::new(echo_fetcher()));
    let mut env = GuestControl::new(g.take_client());

    let plain = b"the quick brown fox jumps over the lazy dog ".repeat(200);
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
    enc.write_all(&plain).unwrap();
    let packed = enc.finish().unwrap();

    let (out, cert) = guest(move || {
        let id = env.decompress_init().unwrap();
        env.decompress_write(id, &packed, true).unwrap();
        let mut out = Vec::new();
        loop {
            let (chunk, eof) = env.decompress_read(id, 1024).unwrap();
            out.extend(chunk);
            if eof {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(env.decompress_read(id, 16).is_err());

        env.send_cert(b"-----BEGIN CERTIFICATE-----\n").unwrap();
        let cert = env.recv_cert_all().unwrap();
        (out, cert)
    })
    .await;

    assert_eq!(out, plain);
    assert_eq!(cert, b"-----BEGIN CERTIFICATE-----\n");
}
