//! The guest's socket primitives: one listening descriptor and at most one accepted connection.

use std::time::Duration;

use c2w_bridge::{Regions, Request};
use c2w_shm::layout::signal;
use c2w_shm::RingChannel;

use crate::client::ControlClient;
use crate::errno::Errno;

pub type Fd = u32;

/// Extra time the guest waits past its own timeout before it gives up on the controller's
/// answer and cancels the poll.
const SIGNAL_GRACE: Duration = Duration::from_millis(500);

/// How socket bytes travel between guest and controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPath {
    /// Bytes go through the shared rings; only notifications use the control channel.
    Ring,
    /// Bytes are carried by `send` / `recv` control requests.
    Control,
}

/// Subset of the WASI `fdstat` the guest asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdStat {
    pub filetype: u8,
    pub flags: u16,
}

impl FdStat {
    pub const FILETYPE_SOCKET_STREAM: u8 = 6;
    pub const FDFLAGS_NONBLOCK: u16 = 2;

    fn socket() -> Self {
        Self {
            filetype: Self::FILETYPE_SOCKET_STREAM,
            flags: Self::FDFLAGS_NONBLOCK,
        }
    }
}

#[derive(Debug)]
pub struct SocketShim {
    client: ControlClient,
    to_guest: RingChannel,
    from_guest: RingChannel,
    path: DataPath,
    listen_fd: Fd,
    conn_fd: Fd,
    conn_in_use: bool,
}

impl SocketShim {
    pub fn new(
        client: ControlClient,
        regions: &Regions,
        path: DataPath,
        listen_fd: Fd,
        conn_fd: Fd,
    ) -> Self {
        Self {
            client,
            to_guest: regions.to_guest.clone(),
            from_guest: regions.from_guest.clone(),
            path,
            listen_fd,
            conn_fd,
            conn_in_use: false,
        }
    }

    pub fn listen_fd(&self) -> Fd {
        self.listen_fd
    }

    pub fn is_connected(&self) -> bool {
        self.conn_in_use
    }

    pub fn accept(&mut self, fd: Fd) -> Result<Fd, Errno> {
        if fd != self.listen_fd {
            tracing::warn!(fd, "sock_accept: unknown fd");
            return Err(Errno::Inval);
        }
        if self.conn_in_use {
            tracing::warn!("sock_accept: multi-connection is unsupported");
            return Err(Errno::Inval);
        }
        let reply = self.client.call_ok(Request::Accept)?;
        if !reply.flag() {
            return Err(Errno::Again);
        }
        self.conn_in_use = true;
        Ok(self.conn_fd)
    }

    fn check_conn(&self, fd: Fd, op: &'static str) -> Result<(), Errno> {
        if fd != self.conn_fd {
            tracing::warn!(fd, op, "unknown fd");
            return Err(Errno::Inval);
        }
        Ok(())
    }

    /// Returns the number of bytes handed to the controller.
    pub fn send(&mut self, fd: Fd, data: &[u8]) -> Result<usize, Errno> {
        self.check_conn(fd, "sock_send")?;
        if data.is_empty() {
            return Ok(0);
        }
        match self.path {
            DataPath::Ring => {
                if !self.from_guest.write(data).is_written() {
                    return Err(Errno::Again);
                }
                self.client
                    .call_ok(Request::NotifySendFromNet { len: data.len() })?;
            }
            DataPath::Control => {
                self.client.call_ok(Request::Send { buf: data.to_vec() })?;
            }
        }
        Ok(data.len())
    }

    /// Fill `buf` with received bytes. An empty connection is [`Errno::Again`], never `Ok(0)`.
    pub fn recv(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno> {
        self.check_conn(fd, "sock_recv")?;
        if buf.is_empty() {
            return Ok(0);
        }
        let n = match self.path {
            DataPath::Ring => self.to_guest.read(buf),
            DataPath::Control => {
                if !self.wait_readable(None)? {
                    return Err(Errno::Again);
                }
                let reply = self.client.call_ok(Request::Recv { len: buf.len() })?;
                let n = reply.payload.len().min(buf.len());
                buf[..n].copy_from_slice(&reply.payload[..n]);
                n
            }
        };
        if n == 0 {
            return Err(Errno::Again);
        }
        Ok(n)
    }

    /// Wait up to `timeout_ns` for the connection to become readable. `None` checks once.
    pub fn poll_readable(&mut self, fd: Fd, timeout_ns: Option<u64>) -> Result<bool, Errno> {
        self.check_conn(fd, "poll_oneoff")?;
        if self.path == DataPath::Ring && self.to_guest.is_readable() {
            return Ok(true);
        }
        self.wait_readable(timeout_ns.map(Duration::from_nanos))
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool, Errno> {
        self.to_guest.reset_signal();
        self.client.call_ok(Request::RecvIsReadable {
            timeout: timeout.map(|t| t.as_secs_f64()),
        })?;
        let limit = timeout.unwrap_or(Duration::ZERO) + SIGNAL_GRACE;
        match self.to_guest.wait_signal(Some(limit)) {
            signal::READY => Ok(true),
            signal::TIMEOUT => Ok(false),
            _ => {
                tracing::warn!("readiness poll went unanswered; cancelling");
                self.client.call_ok(Request::RecvIsReadableCancel)?;
                Ok(false)
            }
        }
    }

    /// Closing the accepted fd only frees the slot; the rings stay in place for the next accept.
    pub fn close(&mut self, fd: Fd) -> Result<(), Errno> {
        if fd == self.conn_fd {
            self.conn_in_use = false;
            return Ok(());
        }
        if fd == self.listen_fd {
            return Ok(());
        }
        Err(Errno::Inval)
    }

    pub fn shutdown(&mut self, fd: Fd) {
        if fd == self.conn_fd {
            self.conn_in_use = false;
        }
    }

    pub fn fdstat(&self, fd: Fd) -> Result<FdStat, Errno> {
        if fd == self.listen_fd || (fd == self.conn_fd && self.conn_in_use) {
            return Ok(FdStat::socket());
        }
        Err(Errno::Inval)
    }
}
