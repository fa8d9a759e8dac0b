use memory::{GuestMemoryError, MapError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Memory(#[from] GuestMemoryError),
    #[error("RAM size 0x{size:x} must be a multiple of 4 KiB")]
    InvalidRamSize { size: u64 },
    #[error("invalid {what} layout: {reason}")]
    InvalidLayout {
        what: &'static str,
        reason: &'static str,
    },
    #[error("window {index} is not managed by this controller")]
    UnknownWindow { index: usize },
    #[error("window 0x{base:x}+0x{size:x} is not usable: {reason}")]
    InvalidWindow {
        base: u64,
        size: u64,
        reason: &'static str,
    },
    #[error("slot {index} is not part of this bank")]
    UnknownSlot { index: usize },
    #[error("system BIOS image of {len} bytes must be 64 KiB or 128 KiB")]
    InvalidRom { len: usize },
}

pub type Result<T> = std::result::Result<T, PlatformError>;
