//! Guest side of the networking bridge.
//!
//! Everything here is synchronous: each call posts a request to the controller and parks the
//! calling thread on the shared control word until it is answered. Run it on a dedicated guest
//! thread, never on the runtime that drives the [`c2w_bridge::StreamBridge`].
#![forbid(unsafe_code)]

pub mod client;
pub mod env;
pub mod errno;
pub mod socket;

pub use client::ControlClient;
pub use env::{GuestControl, HttpResponse};
pub use errno::Errno;
pub use socket::{DataPath, Fd, FdStat, SocketShim};

#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error("controller is gone")]
    Disconnected,

    #[error("{request} failed with status {status}")]
    Failed { request: &'static str, status: i32 },

    #[error("invalid response header: {0}")]
    Header(#[from] serde_json::Error),
}

impl From<ShimError> for Errno {
    fn from(_: ShimError) -> Self {
        Errno::Inval
    }
}
