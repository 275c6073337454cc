/// WASI errno values surfaced by the socket primitives (`wasi-libc` numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u16)]
pub enum Errno {
    /// Nothing to accept or read yet; retry.
    #[error("resource temporarily unavailable")]
    Again = 6,

    #[error("invalid argument")]
    Inval = 28,
}

impl Errno {
    pub const EAGAIN: u16 = Errno::Again as u16;
    pub const EINVAL: u16 = Errno::Inval as u16;

    pub fn raw(self) -> u16 {
        self as u16
    }
}
