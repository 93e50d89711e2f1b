//! Command bytes sent after a reset. ROM commands pick which devices listen,
//! function commands tell the selected devices what to do.

/// Anything that goes on the wire as a single command byte
pub trait OpCode {
    fn op_code(&self) -> u8;
}

/// ROM level commands understood by every device on the bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Followed by 8 address bytes; only the matching device stays active
    MatchRom = 0x55,
    SearchRom = 0xF0,
    /// Search among devices with a pending alarm condition
    SearchRomAlarmed = 0xEC,
    /// Addresses every device at once
    SkipRom = 0xCC,
    /// Only valid with a single device on the bus
    ReadRom = 0x33,
}

impl OpCode for Command {
    fn op_code(&self) -> u8 {
        *self as u8
    }
}

/// DS18B20 function commands, valid after a ROM command selected the sensor
#[cfg(feature = "ds18b20")]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Ds18b20Command {
    /// Starts a temperature conversion; the sensor reads 0 slots until done
    Convert = 0x44,
    /// Followed by high alarm, low alarm and configuration bytes
    WriteScratchpad = 0x4E,
    /// Answered with 9 bytes, the last one being their CRC-8
    ReadScratchpad = 0xBE,
    /// Persists alarms and configuration to EEPROM
    CopyScratchpad = 0x48,
    RecallE2 = 0xB8,
}

#[cfg(feature = "ds18b20")]
impl OpCode for Ds18b20Command {
    fn op_code(&self) -> u8 {
        *self as u8
    }
}
