#![no_std]
#![doc = include_str!("../README.md")]

#[cfg(test)]
extern crate std;

mod address;
mod command;
mod driver;
#[cfg(feature = "ds18b20")]
pub mod ds18b20;
mod iowire;
mod result;
mod search;
#[cfg(test)]
mod sim;
mod wait;

pub use address::{Address, AddressError};
#[cfg(feature = "ds18b20")]
pub use command::Ds18b20Command;
pub use command::{Command, OpCode};
pub use driver::Driver;
pub use iowire::IoWire;
pub use result::Error;
pub use search::{SearchIter, SearchKind, SearchState};
pub use wait::{Clock, Yield};

/// Dallas/Maxim CRC-8 (x^8 + x^5 + x^4 + 1) split into low and high nibble halves
const CRC8_TABLE: [u8; 32] = [
    0x00, 0x5E, 0xBC, 0xE2, 0x61, 0x3F, 0xDD, 0x83, 0xC2, 0x9C, 0x7E, 0x20, 0xA3, 0xFD, 0x1F, 0x41,
    0x00, 0x9D, 0x23, 0xBE, 0x46, 0xDB, 0x65, 0xF8, 0x8C, 0x11, 0xAF, 0x32, 0xCA, 0x57, 0xE9, 0x74,
];

pub fn compute_partial_crc8(crc: u8, data: &[u8]) -> u8 {
    data.iter().fold(crc, |crc, byte| {
        let crc = crc ^ byte;
        CRC8_TABLE[(crc & 0x0F) as usize] ^ CRC8_TABLE[16 + (crc >> 4) as usize]
    })
}

pub fn crc8(data: &[u8]) -> u8 {
    compute_partial_crc8(0, data)
}

/// Checks a payload whose last byte is the CRC-8 of the bytes before it
pub fn ensure_correct_crc8<E: core::fmt::Debug>(data: &[u8]) -> Result<(), Error<E>> {
    match data.split_last() {
        Some((&expected, payload)) => {
            let computed = crc8(payload);
            if computed == expected {
                Ok(())
            } else {
                Err(Error::CrcMismatch(computed, expected))
            }
        }
        None => Ok(()),
    }
}
