//! The relay's guest: serves local TCP clients one at a time through the socket shim.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use c2w_shim::{Errno, Fd, SocketShim};

const IDLE_POLL: Duration = Duration::from_millis(10);
const IDLE_POLL_NS: u64 = 10_000_000;
const BUF_SIZE: usize = 16 * 1024;

pub fn serve(mut sock: SocketShim, listener: TcpListener) -> anyhow::Result<()> {
    for stream in listener.incoming() {
        let stream = stream.context("accepting local client")?;
        let peer = stream.peer_addr().ok();
        let fd = accept(&mut sock)?;
        tracing::info!(?peer, "client connected");
        if let Err(err) = relay(&mut sock, fd, stream) {
            tracing::warn!(?peer, "relay ended: {err:#}");
        }
        sock.close(fd)?;
        tracing::info!(?peer, "client disconnected");
    }
    Ok(())
}

fn accept(sock: &mut SocketShim) -> anyhow::Result<Fd> {
    let listen_fd = sock.listen_fd();
    loop {
        match sock.accept(listen_fd) {
            Ok(fd) => return Ok(fd),
            Err(Errno::Again) => thread::sleep(IDLE_POLL),
            Err(err) => return Err(err).context("sock_accept"),
        }
    }
}

fn relay(sock: &mut SocketShim, fd: Fd, mut stream: TcpStream) -> anyhow::Result<()> {
    stream.set_read_timeout(Some(IDLE_POLL))?;
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => send_all(sock, fd, &buf[..n])?,
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(err) => return Err(err).context("reading from client"),
        }

        if sock.poll_readable(fd, Some(IDLE_POLL_NS))? {
            loop {
                match sock.recv(fd, &mut buf) {
                    Ok(n) => stream.write_all(&buf[..n]).context("writing to client")?,
                    Err(Errno::Again) => break,
                    Err(err) => return Err(err).context("sock_recv"),
                }
            }
        }
    }
}

fn send_all(sock: &mut SocketShim, fd: Fd, data: &[u8]) -> anyhow::Result<()> {
    loop {
        match sock.send(fd, data) {
            Ok(_) => return Ok(()),
            // Outbound ring is full until the controller drains it.
            Err(Errno::Again) => thread::sleep(IDLE_POLL),
            Err(err) => return Err(err).context("sock_send"),
        }
    }
}
