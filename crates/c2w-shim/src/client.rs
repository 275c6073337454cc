use c2w_bridge::{Request, RequestSender};
use c2w_shm::{ControlChannel, ControlReply};

use crate::ShimError;

/// Requester half of the control channel.
///
/// At most one request may be outstanding; the `&mut self` receivers enforce that for a single
/// client, and each guest must own exactly one client per control region.
#[derive(Debug)]
pub struct ControlClient {
    control: ControlChannel,
    requests: RequestSender,
}

impl ControlClient {
    pub fn new(control: ControlChannel, requests: RequestSender) -> Self {
        Self { control, requests }
    }

    /// Largest payload a single reply can carry.
    pub fn capacity(&self) -> usize {
        self.control.capacity()
    }

    /// Post `request` and block until it is answered.
    pub fn call(&mut self, request: Request) -> Result<ControlReply, ShimError> {
        let tag = request.tag();
        self.control.arm();
        self.requests
            .send(request)
            .map_err(|_| ShimError::Disconnected)?;
        let reply = self.control.wait();
        tracing::trace!(tag, status = reply.status, len = reply.payload.len(), "control reply");
        Ok(reply)
    }

    /// Like [`ControlClient::call`], but a negative status is an error.
    pub fn call_ok(&mut self, request: Request) -> Result<ControlReply, ShimError> {
        let tag = request.tag();
        let reply = self.call(request)?;
        if reply.is_error() {
            return Err(ShimError::Failed {
                request: tag,
                status: reply.status,
            });
        }
        Ok(reply)
    }
}
