//! Simulated bus for tests: devices decode slots by how long the master held
//! the line low, and answer by pulling it low during the sample window.

use crate::{crc8, Clock};
use core::cell::RefCell;
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use std::rc::Rc;
use std::vec::Vec;

/// Longer low pulses are zeros
const SHORT_SLOT_NS: u64 = 15_000;
const RESET_NS: u64 = 480_000;
/// A transmitting device keeps the line low this long after the falling edge
const HOLD_NS: u64 = 45_000;
const PRESENCE_DELAY_NS: u64 = 15_000;
const PRESENCE_NS: u64 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Powered up, waiting for the first reset
    Idle,
    RomCommand,
    Search { bit: u8, step: u8 },
    Match { byte: usize },
    Function,
    Transmit { len: usize, bit: usize },
    WriteScratchpad { byte: usize },
    Converting { until_ns: u64 },
    /// Deselected until the next reset
    Inactive,
}

pub(crate) struct SimDevice {
    pub rom: [u8; 8],
    pub scratchpad: [u8; 9],
    pub eeprom: [u8; 3],
    pub alarm: bool,
    pub conversion_ms: u64,
    /// Temperature registers loaded by the next conversion
    pub next_temperature: [u8; 2],
    pub corrupt_crc: bool,
    /// Drop off the bus at this 0-indexed search bit
    pub vanish_at_bit: Option<u8>,
    pub scratchpad_writes: usize,
    phase: Phase,
    rx: u8,
    rx_bits: u8,
    tx: [u8; 9],
}

impl SimDevice {
    pub fn with_family(family: u8, serial: [u8; 6]) -> Self {
        let mut rom = [family, 0, 0, 0, 0, 0, 0, 0];
        rom[1..7].copy_from_slice(&serial);
        rom[7] = crc8(&rom[..7]);
        SimDevice {
            rom,
            scratchpad: [0x50, 0x05, 0x4b, 0x46, 0x7f, 0xff, 0x0c, 0x10, 0x00],
            eeprom: [0x4b, 0x46, 0x7f],
            alarm: false,
            conversion_ms: 10,
            next_temperature: [0x91, 0x01],
            corrupt_crc: false,
            vanish_at_bit: None,
            scratchpad_writes: 0,
            phase: Phase::Idle,
            rx: 0,
            rx_bits: 0,
            tx: [0; 9],
        }
    }

    pub fn ds18b20(serial: [u8; 6]) -> Self {
        Self::with_family(crate::ds18b20::FAMILY_CODE, serial)
    }

    fn reset(&mut self) {
        self.phase = Phase::RomCommand;
        self.rx = 0;
        self.rx_bits = 0;
    }

    fn rom_bit(&self, bit: u8) -> bool {
        self.rom[(bit / 8) as usize] & (1 << (bit % 8)) != 0
    }

    /// Handles one slot; returns whether this device pulls the line low for
    /// the sample window
    fn slot(&mut self, short: bool, now: u64) -> bool {
        match self.phase {
            Phase::Idle | Phase::Inactive => false,
            Phase::Search { bit, step } => {
                if self.vanish_at_bit == Some(bit) {
                    self.phase = Phase::Inactive;
                    return false;
                }
                let value = self.rom_bit(bit);
                match step {
                    0 => {
                        self.phase = Phase::Search { bit, step: 1 };
                        !value
                    }
                    1 => {
                        self.phase = Phase::Search { bit, step: 2 };
                        value
                    }
                    _ => {
                        self.phase = if short != value || bit == 63 {
                            Phase::Inactive
                        } else {
                            Phase::Search {
                                bit: bit + 1,
                                step: 0,
                            }
                        };
                        false
                    }
                }
            }
            Phase::Transmit { len, bit } => {
                let value = self.tx[bit / 8] & (1 << (bit % 8)) != 0;
                self.phase = if bit + 1 == len * 8 {
                    Phase::Inactive
                } else {
                    Phase::Transmit { len, bit: bit + 1 }
                };
                !value
            }
            Phase::Converting { until_ns } => now < until_ns,
            _ => {
                self.receive(short, now);
                false
            }
        }
    }

    fn receive(&mut self, bit: bool, now: u64) {
        if bit {
            self.rx |= 1 << self.rx_bits;
        }
        self.rx_bits += 1;
        if self.rx_bits < 8 {
            return;
        }
        let byte = self.rx;
        self.rx = 0;
        self.rx_bits = 0;

        let phase = self.phase;
        self.phase = match phase {
            Phase::RomCommand => match byte {
                0xF0 => Phase::Search { bit: 0, step: 0 },
                0xEC if self.alarm => Phase::Search { bit: 0, step: 0 },
                0x55 => Phase::Match { byte: 0 },
                0xCC => Phase::Function,
                0x33 => {
                    self.tx[..8].copy_from_slice(&self.rom);
                    Phase::Transmit { len: 8, bit: 0 }
                }
                _ => Phase::Inactive,
            },
            Phase::Match { byte: i } => {
                if byte != self.rom[i] {
                    Phase::Inactive
                } else if i == 7 {
                    Phase::Function
                } else {
                    Phase::Match { byte: i + 1 }
                }
            }
            Phase::Function => match byte {
                0xBE => {
                    self.tx[..8].copy_from_slice(&self.scratchpad[..8]);
                    self.tx[8] = crc8(&self.scratchpad[..8]);
                    if self.corrupt_crc {
                        self.tx[8] ^= 0xff;
                    }
                    Phase::Transmit { len: 9, bit: 0 }
                }
                0x4E => Phase::WriteScratchpad { byte: 0 },
                0x44 => {
                    self.scratchpad[..2].copy_from_slice(&self.next_temperature);
                    Phase::Converting {
                        until_ns: now + self.conversion_ms * 1_000_000,
                    }
                }
                0x48 => {
                    self.eeprom.copy_from_slice(&self.scratchpad[2..5]);
                    Phase::Inactive
                }
                0xB8 => {
                    self.scratchpad[2..5].copy_from_slice(&self.eeprom);
                    Phase::Inactive
                }
                _ => Phase::Inactive,
            },
            Phase::WriteScratchpad { byte: i } => {
                self.scratchpad[2 + i] = byte;
                if i == 2 {
                    self.scratchpad_writes += 1;
                    Phase::Inactive
                } else {
                    Phase::WriteScratchpad { byte: i + 1 }
                }
            }
            other => other,
        };
    }
}

struct Bus {
    now_ns: u64,
    driving_low: bool,
    low_since: u64,
    /// Window during which some device holds the line low
    pull: Option<(u64, u64)>,
    resets: usize,
    devices: Vec<SimDevice>,
}

impl Bus {
    fn is_high(&self) -> bool {
        if self.driving_low {
            return false;
        }
        !matches!(self.pull, Some((from, until)) if self.now_ns >= from && self.now_ns < until)
    }

    fn drive_low(&mut self) {
        if !self.driving_low {
            self.driving_low = true;
            self.low_since = self.now_ns;
        }
    }

    fn release(&mut self) {
        if !self.driving_low {
            return;
        }
        self.driving_low = false;
        let now = self.now_ns;
        let held = now - self.low_since;

        if held >= RESET_NS {
            self.resets += 1;
            self.devices.iter_mut().for_each(SimDevice::reset);
            self.pull = if self.devices.is_empty() {
                None
            } else {
                Some((now + PRESENCE_DELAY_NS, now + PRESENCE_DELAY_NS + PRESENCE_NS))
            };
        } else {
            let short = held < SHORT_SLOT_NS;
            let mut pulled = false;
            for device in self.devices.iter_mut() {
                pulled |= device.slot(short, now);
            }
            self.pull = if pulled {
                Some((now, self.low_since + HOLD_NS))
            } else {
                None
            };
        }
    }
}

#[derive(Clone)]
pub(crate) struct SimBus(Rc<RefCell<Bus>>);

impl SimBus {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        SimBus(Rc::new(RefCell::new(Bus {
            now_ns: 0,
            driving_low: false,
            low_since: 0,
            pull: None,
            resets: 0,
            devices,
        })))
    }

    pub fn pin(&self) -> SimPin {
        SimPin(self.0.clone())
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay(self.0.clone())
    }

    pub fn clock(&self) -> SimClock {
        SimClock(self.0.clone())
    }

    pub fn now_us(&self) -> u64 {
        self.0.borrow().now_ns / 1_000
    }

    pub fn now_ms(&self) -> u32 {
        (self.0.borrow().now_ns / 1_000_000) as u32
    }

    /// Time passing while the driver has yielded
    pub fn advance_ms(&self, ms: u64) {
        self.0.borrow_mut().now_ns += ms * 1_000_000;
    }

    pub fn resets(&self) -> usize {
        self.0.borrow().resets
    }

    pub fn with_device<R>(&self, index: usize, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        f(&mut self.0.borrow_mut().devices[index])
    }
}

pub(crate) struct SimPin(Rc<RefCell<Bus>>);

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().drive_low();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().release();
        Ok(())
    }
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.borrow().is_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.borrow().is_high())
    }
}

pub(crate) struct SimDelay(Rc<RefCell<Bus>>);

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().now_ns += u64::from(ns);
    }
}

pub(crate) struct SimClock(Rc<RefCell<Bus>>);

impl Clock for SimClock {
    fn now_ms(&mut self) -> u32 {
        (self.0.borrow().now_ns / 1_000_000) as u32
    }
}
