use core::fmt::{Debug, Display, Formatter, Result as FmtResult};

/// Error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E: Sized + Debug> {
    /// Wire not high before reset
    WireFault,
    /// No presence on wire
    NoPresence,
    /// True and complement bit both read high mid-search
    SearchAborted,
    /// Computed and received CRC-8
    CrcMismatch(u8, u8),
    /// Every byte read back as zero
    AllZeros,
    PortError(E),
}

impl<E: Sized + Debug> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::PortError(e)
    }
}

impl<E: Sized + Debug> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Error::WireFault => f.write_str("wire stuck low"),
            Error::NoPresence => f.write_str("no presence pulse"),
            Error::SearchAborted => f.write_str("no device answered during search"),
            Error::CrcMismatch(computed, expected) => write!(
                f,
                "crc mismatch: computed {:02x}, expected {:02x}",
                computed, expected
            ),
            Error::AllZeros => f.write_str("all bytes read as zero"),
            Error::PortError(e) => write!(f, "port error: {:?}", e),
        }
    }
}
