//! Shared-memory networking bridge between a sandboxed guest and the host.
//!
//! - [`shm`]: ring and control regions plus the wait/wake primitive.
//! - [`bridge`]: the controller that answers guest requests using host networking.
//! - [`shim`]: the guest's blocking socket and `env` primitives.
//!
//! [`connect`] wires one guest to one controller.
#![forbid(unsafe_code)]

pub use c2w_bridge as bridge;
pub use c2w_shim as shim;
pub use c2w_shm as shm;

use c2w_bridge::{Backends, BridgeConfig, BridgeError, Regions, RequestReceiver, StreamBridge};
use c2w_shim::{ControlClient, DataPath, Fd, GuestControl, SocketShim};

/// The guest's end: shared regions plus a control client.
#[derive(Debug)]
pub struct Guest {
    pub regions: Regions,
    pub client: ControlClient,
}

impl Guest {
    pub fn socket(self, path: DataPath, listen_fd: Fd, conn_fd: Fd) -> SocketShim {
        SocketShim::new(self.client, &self.regions, path, listen_fd, conn_fd)
    }

    pub fn env(self) -> GuestControl {
        GuestControl::new(self.client)
    }
}

/// The controller's end; drive it with [`Controller::run`] on a tokio runtime.
#[derive(Debug)]
pub struct Controller {
    bridge: StreamBridge,
    requests: RequestReceiver,
}

impl Controller {
    pub async fn run(self) {
        self.bridge.run(self.requests).await
    }
}

pub fn connect(config: &BridgeConfig, backends: Backends) -> Result<(Guest, Controller), BridgeError> {
    let regions = Regions::allocate(config)?;
    let (tx, rx) = c2w_bridge::request_channel();
    let bridge = StreamBridge::new(&regions, config, backends);
    let guest = Guest {
        client: ControlClient::new(regions.control.clone(), tx),
        regions,
    };
    Ok((
        guest,
        Controller {
            bridge,
            requests: rx,
        },
    ))
}
