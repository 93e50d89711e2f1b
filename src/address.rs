use core::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    ops::Deref,
    str::FromStr,
};

/// Factory programmed ROM code: family code, 48 bit serial, CRC-8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Address {
    raw: [u8; Self::BYTES as usize],
}

impl From<[u8; Self::BYTES as usize]> for Address {
    fn from(raw: [u8; Self::BYTES as usize]) -> Self {
        Address { raw }
    }
}

impl From<Address> for [u8; Address::BYTES as usize] {
    fn from(addr: Address) -> [u8; Address::BYTES as usize] {
        addr.raw
    }
}

impl Deref for Address {
    type Target = [u8; Self::BYTES as usize];

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl Address {
    /// The length of device address in bytes
    pub const BYTES: u8 = 8;

    /// The length of device address in bits
    pub const BITS: u8 = Self::BYTES * 8;

    pub fn family_code(&self) -> u8 {
        self.raw[0]
    }

    /// The trailing check byte
    pub fn crc(&self) -> u8 {
        self.raw[Self::BYTES as usize - 1]
    }

    pub fn is_crc_valid(&self) -> bool {
        crate::crc8(&self.raw[..Self::BYTES as usize - 1]) == self.crc()
    }

    /// Parses an address written into firmware configuration.
    ///
    /// # Panics
    ///
    /// A string that is not exactly 16 hex digits is a misconfiguration, not a
    /// runtime condition, so this panics instead of returning an error. Use
    /// [`str::parse`] for untrusted input.
    pub fn from_hex(s: &str) -> Self {
        match s.parse() {
            Ok(addr) => addr,
            Err(e) => panic!("malformed device address {:?}: {}", s, e),
        }
    }
}

/// Error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    /// Input is not exactly 16 characters long
    WrongLength(usize),
    /// Non hex character at the given position
    InvalidDigit(usize),
}

impl Display for AddressError {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            AddressError::WrongLength(len) => {
                write!(f, "expected 16 hex digits, got {} characters", len)
            }
            AddressError::InvalidDigit(pos) => write!(f, "invalid hex digit at {}", pos),
        }
    }
}

fn hex_to_u8(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.as_bytes();
        if digits.len() != Self::BYTES as usize * 2 {
            return Err(AddressError::WrongLength(digits.len()));
        }

        let mut raw = [0u8; Self::BYTES as usize];
        for (i, pair) in digits.chunks_exact(2).enumerate() {
            let h = hex_to_u8(pair[0]).ok_or(AddressError::InvalidDigit(i * 2))?;
            let l = hex_to_u8(pair[1]).ok_or(AddressError::InvalidDigit(i * 2 + 1))?;
            raw[i] = (h << 4) | l;
        }

        Ok(Address { raw })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        for byte in self.raw.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
