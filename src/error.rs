//! DMA error

use core::fmt;

use crate::descriptor::Direction;

/// An error when preparing or running a DMA transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The channel only supports memory-to-device and device-to-memory
    /// transfers.
    InvalidDirection(Direction),
    /// The channel is flow controlled, but it has no burst size for this
    /// direction.
    MissingBurst,
    /// A flow controlled fragment isn't a whole number of bursts.
    UnalignedLength {
        /// The fragment length, in bytes.
        length: u32,
        /// The channel's burst, in bytes.
        burst: u32,
    },
    /// The burst size has no CRCI block size, or doesn't fit in a row.
    UnsupportedBurst(u32),
    /// The scatter/gather list has nothing to move.
    EmptyTransfer,
    /// There wasn't enough controller-visible memory for the command list.
    NoMemory,
    /// The controller reported an error, or the channel was flushed.
    ///
    /// This is sticky. It's cleared by the next transfer prepared on the
    /// channel.
    Hardware,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDirection(direction) => {
                write!(f, "unsupported transfer direction {direction:?}")
            }
            Self::MissingBurst => f.write_str("flow controlled channel has no burst size"),
            Self::UnalignedLength { length, burst } => write!(
                f,
                "length {length} is not a multiple of the {burst} byte burst"
            ),
            Self::UnsupportedBurst(burst) => write!(f, "unsupported burst size {burst}"),
            Self::EmptyTransfer => f.write_str("transfer has no data"),
            Self::NoMemory => f.write_str("out of descriptor memory"),
            Self::Hardware => f.write_str("the ADM reported a transfer error"),
        }
    }
}
