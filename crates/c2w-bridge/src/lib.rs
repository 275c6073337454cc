//! Controller side of the guest networking bridge.
//!
//! The guest posts [`Request`]s over a message channel and blocks on the shared
//! [`ControlChannel`] until the [`StreamBridge`] answers. Socket bytes bypass the control channel
//! and flow through two [`RingChannel`]s:
//!
//! - `to_guest` (with a notify word): bytes received from the backend transport.
//! - `from_guest` (plain): bytes the guest wants sent; announced by `notify-send-from-net`.
//!
//! HTTP fetches, layer downloads, decompression and the certificate hand-off are all served
//! through the control channel in chunks no larger than its data area.
#![forbid(unsafe_code)]

pub mod backend;
pub mod cert;
pub mod chunk;
pub mod config;
pub mod conn;
pub mod decompress;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod layer;
pub mod protocol;
pub mod socket;

use c2w_shm::{ControlChannel, RingChannel, RingLayout};
use tokio::sync::mpsc;

pub use cert::SharedCert;
pub use config::BridgeConfig;
pub use dispatch::{Backends, StreamBridge};
pub use error::{BridgeError, ConfigError};
pub use protocol::Request;

pub type RequestSender = mpsc::UnboundedSender<Request>;
pub type RequestReceiver = mpsc::UnboundedReceiver<Request>;

/// The three shared regions connecting one guest to one bridge.
#[derive(Debug, Clone)]
pub struct Regions {
    pub control: ControlChannel,
    pub to_guest: RingChannel,
    pub from_guest: RingChannel,
}

impl Regions {
    pub fn allocate(config: &BridgeConfig) -> Result<Self, BridgeError> {
        Ok(Self {
            control: ControlChannel::new(config.control_capacity)?,
            to_guest: RingChannel::with_region_bytes(config.ring_region_bytes, RingLayout::WithNotify)?,
            from_guest: RingChannel::with_region_bytes(config.ring_region_bytes, RingLayout::Plain)?,
        })
    }
}

pub fn request_channel() -> (RequestSender, RequestReceiver) {
    mpsc::unbounded_channel()
}
