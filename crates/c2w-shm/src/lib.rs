//! Shared-memory transport primitives for bridging a sandboxed guest to host I/O.
//!
//! Two kinds of regions are shared between the guest (worker) context and the controller
//! context:
//!
//! - [`RingChannel`]: a fixed-capacity circular byte buffer guarded by a control word, used for
//!   streaming socket bytes in one direction.
//! - [`ControlChannel`]: a small request/response area. The request tag travels out-of-band
//!   (a native message channel); the region carries only the result code and payload.
//!
//! Both regions are plain arrays of little-endian 32-bit words followed by a byte area, so the
//! same layout can be mirrored by a `SharedArrayBuffer` on the JS side. See [`layout`].

pub mod control;
pub mod layout;
pub mod region;
pub mod ring;
pub mod wait;

pub use control::{Completion, ControlChannel, ControlReply};
pub use layout::RingLayout;
pub use region::SharedRegion;
pub use ring::{RingChannel, WriteOutcome};
pub use wait::WaitOutcome;

/// Errors raised while constructing shared regions.
///
/// Runtime operations on the regions never fail: overflow is reported through
/// [`WriteOutcome::Dropped`] and control results through status codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShmError {
    #[error("invalid capacity {capacity} (must be in 1..={max})")]
    InvalidCapacity { capacity: usize, max: usize },

    #[error("region of {len} bytes is too small for a {header}-byte header")]
    RegionTooSmall { len: usize, header: usize },
}
