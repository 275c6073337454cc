use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{Transport, TransportEvent, TransportEvents};
use crate::error::BridgeError;

const READ_CHUNK: usize = 16 * 1024;

/// [`Transport`] that relays the guest's accepted connection to a TCP peer.
pub struct TcpTransport {
    addr: String,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            outbound: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, events: TransportEvents) -> Result<(), BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        tokio::spawn(pump(self.addr.clone(), events, rx));
        Ok(())
    }

    fn send(&mut self, data: Vec<u8>) -> Result<(), BridgeError> {
        let outbound = self.outbound.as_ref().ok_or(BridgeError::TransportNotOpen)?;
        outbound
            .send(data)
            .map_err(|_| BridgeError::Transport("connection task has exited".to_string()))
    }

    fn close(&mut self) {
        // Dropping the sender makes the pump shut the socket down.
        self.outbound = None;
    }
}

async fn pump(
    addr: String,
    events: TransportEvents,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(%addr, "tcp connect failed: {err}");
            let _ = events.send(TransportEvent::Error(err.to_string()));
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    tracing::debug!(%addr, "tcp transport connected");
    let _ = events.send(TransportEvent::Opened);

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    let _ = events.send(TransportEvent::Closed);
                    break;
                }
                Ok(n) => {
                    if events.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = events.send(TransportEvent::Error(err.to_string()));
                    break;
                }
            },
            data = outbound.recv() => match data {
                Some(data) => {
                    if let Err(err) = writer.write_all(&data).await {
                        let _ = events.send(TransportEvent::Error(err.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = writer.shutdown().await;
                    let _ = events.send(TransportEvent::Closed);
                    break;
                }
            },
        }
    }
    tracing::debug!(%addr, "tcp transport finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn relays_bytes_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut transport = TcpTransport::new(addr.to_string());
        transport.open(events_tx).unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));

        transport.send(b"hello".to_vec()).unwrap();
        let mut echoed = Vec::new();
        while echoed.len() < 5 {
            match events.recv().await {
                Some(TransportEvent::Data(d)) => echoed.extend(d),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(echoed, b"hello");

        server.await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut transport = TcpTransport::new(addr.to_string());
        transport.open(events_tx).unwrap();
        assert!(matches!(events.recv().await, Some(TransportEvent::Error(_))));
    }

    #[test]
    fn send_before_open_fails() {
        let mut transport = TcpTransport::new("127.0.0.1:1");
        assert!(matches!(
            transport.send(b"x".to_vec()),
            Err(BridgeError::TransportNotOpen)
        ));
    }
}
