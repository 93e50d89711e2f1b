//! DS18B20 scratchpad access, resolution configuration and temperature
//! conversion for every sensor sharing one bus.

use byteorder::{ByteOrder, LittleEndian};
use embedded_hal::delay::DelayNs;

use crate::wait::elapsed_ms;
use crate::{Address, Clock, Driver, Error, IoWire, OpCode, SearchKind, SearchState, Yield};
use core::fmt::Debug;
use core::ops::Deref;

pub const FAMILY_CODE: u8 = 0x28;

/// Returned by [`Ds18b20Bus::get_temp_c`] when no trustworthy reading exists
pub const DEVICE_DISCONNECTED_C: f32 = -127.0;
/// Returned by [`Ds18b20Bus::get_temp_f`] when no trustworthy reading exists
pub const DEVICE_DISCONNECTED_F: f32 = -196.6;
/// Raw readings at or below this (-55 °C) come from an unconverted sensor
pub const DEVICE_DISCONNECTED_RAW: i16 = -7040;

pub use crate::command::Ds18b20Command as Command;

/// Conversion resolution, stored as the configuration register pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Resolution {
    Bits9 = 0b0001_1111,
    Bits10 = 0b0011_1111,
    Bits11 = 0b0101_1111,
    #[default]
    Bits12 = 0b0111_1111,
}

impl Resolution {
    /// Maps a bit count onto a resolution, clamping it into 9..=12
    pub fn from_bits(bits: u8) -> Resolution {
        match bits {
            0..=9 => Resolution::Bits9,
            10 => Resolution::Bits10,
            11 => Resolution::Bits11,
            _ => Resolution::Bits12,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            Resolution::Bits9 => 9,
            Resolution::Bits10 => 10,
            Resolution::Bits11 => 11,
            Resolution::Bits12 => 12,
        }
    }

    pub fn config_byte(&self) -> u8 {
        *self as u8
    }

    /// Worst case conversion time
    pub fn conversion_time_ms(&self) -> u32 {
        match self {
            Resolution::Bits9 => 94,
            Resolution::Bits10 => 188,
            Resolution::Bits11 => 375,
            Resolution::Bits12 => 750,
        }
    }
}

impl TryFrom<u8> for Resolution {
    type Error = u8;

    /// Decodes a configuration register
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b0001_1111 => Ok(Resolution::Bits9),
            0b0011_1111 => Ok(Resolution::Bits10),
            0b0101_1111 => Ok(Resolution::Bits11),
            0b0111_1111 => Ok(Resolution::Bits12),
            other => Err(other),
        }
    }
}

/// Fixed point temperature, 1/128 °C per step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Temperature(i16);

impl Temperature {
    pub fn from_raw(raw: i16) -> Self {
        Temperature(raw)
    }

    /// The register holds 1/16 °C steps; shifting by three leaves 1/128 °C
    /// steps with the sign kept from the MSB
    pub fn from_registers(lsb: u8, msb: u8) -> Self {
        Temperature(LittleEndian::read_i16(&[lsb, msb]) << 3)
    }

    pub fn raw(&self) -> i16 {
        self.0
    }

    pub fn celsius(&self) -> f32 {
        self.0 as f32 / 128.0
    }

    /// F = C * 1.8 + 32 = raw / 128 * 1.8 + 32
    pub fn fahrenheit(&self) -> f32 {
        self.0 as f32 * 0.0140625 + 32.0
    }

    pub fn is_disconnected(&self) -> bool {
        self.0 <= DEVICE_DISCONNECTED_RAW
    }
}

/// Snapshot of a sensor's 9 byte working memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratchpad {
    raw: [u8; Self::BYTES],
}

impl Scratchpad {
    pub const BYTES: usize = 9;

    const TEMP_LSB: usize = 0;
    const TEMP_MSB: usize = 1;
    const HIGH_ALARM: usize = 2;
    const LOW_ALARM: usize = 3;
    const CONFIGURATION: usize = 4;
    const CRC: usize = 8;

    pub fn temperature(&self) -> Temperature {
        Temperature::from_registers(self.raw[Self::TEMP_LSB], self.raw[Self::TEMP_MSB])
    }

    pub fn high_alarm(&self) -> i8 {
        self.raw[Self::HIGH_ALARM] as i8
    }

    pub fn low_alarm(&self) -> i8 {
        self.raw[Self::LOW_ALARM] as i8
    }

    pub fn config(&self) -> u8 {
        self.raw[Self::CONFIGURATION]
    }

    /// `None` for a configuration register outside the four known patterns
    pub fn resolution(&self) -> Option<Resolution> {
        Resolution::try_from(self.config()).ok()
    }

    pub fn crc(&self) -> u8 {
        self.raw[Self::CRC]
    }

    /// A floating bus reads as all zeros, which also passes the CRC
    pub fn is_all_zeros(&self) -> bool {
        self.raw.iter().all(|b| *b == 0)
    }

    pub fn validate<E: Debug>(&self) -> Result<(), Error<E>> {
        if self.is_all_zeros() {
            return Err(Error::AllZeros);
        }
        crate::ensure_correct_crc8(&self.raw)
    }
}

impl From<[u8; Scratchpad::BYTES]> for Scratchpad {
    fn from(raw: [u8; Scratchpad::BYTES]) -> Self {
        Scratchpad { raw }
    }
}

impl Deref for Scratchpad {
    type Target = [u8; Scratchpad::BYTES];

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

/// All DS18B20 sensors on one bus
pub struct Ds18b20Bus<W: IoWire> {
    driver: Driver<W>,
    resolution: Resolution,
}

impl<E: Debug, W: IoWire<Error = E>> Ds18b20Bus<W> {
    pub fn new(driver: Driver<W>) -> Self {
        Ds18b20Bus {
            driver,
            resolution: Resolution::default(),
        }
    }

    /// Sets the resolution used to bound conversion waits without touching
    /// any sensor. [`set_resolution`](Self::set_resolution) only ever raises it.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn driver(&mut self) -> &mut Driver<W> {
        &mut self.driver
    }

    pub fn into_inner(self) -> Driver<W> {
        self.driver
    }

    /// Enumerates every device into `addresses`, at most `addresses.len()`
    /// of them, and returns how many were found
    pub fn search_all(
        &mut self,
        addresses: &mut [Address],
        delay: &mut impl DelayNs,
    ) -> Result<usize, Error<E>> {
        self.enumerate(SearchKind::Normal, addresses, delay)
    }

    /// Like [`search_all`](Self::search_all), restricted to devices with a
    /// pending alarm
    pub fn search_alarmed(
        &mut self,
        addresses: &mut [Address],
        delay: &mut impl DelayNs,
    ) -> Result<usize, Error<E>> {
        self.enumerate(SearchKind::Alarmed, addresses, delay)
    }

    fn enumerate(
        &mut self,
        kind: SearchKind,
        addresses: &mut [Address],
        delay: &mut impl DelayNs,
    ) -> Result<usize, Error<E>> {
        let mut state = SearchState::new();
        let mut devices = 0;

        while devices < addresses.len() {
            match self.driver.search(&mut state, kind, delay) {
                Ok(Some(address)) => {
                    log::info!("sensor {}: {}", devices, address);
                    addresses[devices] = address;
                    devices += 1;
                }
                Ok(None) => break,
                // already logged, the pass goes on
                Err(Error::CrcMismatch(_, _)) => continue,
                Err(Error::SearchAborted) => break,
                Err(e) => return Err(e),
            }
        }

        log::info!("found {} devices", devices);
        Ok(devices)
    }

    /// Reads all 9 bytes from `address` without checking them.
    ///
    /// Fails with [`Error::NoPresence`] when no device answers either the
    /// opening or the closing reset.
    pub fn read_scratchpad(
        &mut self,
        address: &Address,
        delay: &mut impl DelayNs,
    ) -> Result<Scratchpad, Error<E>> {
        let mut raw = [0u8; Scratchpad::BYTES];
        self.driver.reset_select_write_read(
            delay,
            address,
            &[Command::ReadScratchpad.op_code()],
            &mut raw,
        )?;
        self.driver.reset(delay)?;
        Ok(Scratchpad::from(raw))
    }

    /// Writes the alarm thresholds and configuration register. Nothing is
    /// acknowledged; read the scratchpad back to confirm.
    pub fn write_scratchpad(
        &mut self,
        address: &Address,
        high_alarm: i8,
        low_alarm: i8,
        config: u8,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error<E>> {
        self.driver.reset_select_write_only(
            delay,
            address,
            &[
                Command::WriteScratchpad.op_code(),
                high_alarm as u8,
                low_alarm as u8,
                config,
            ],
        )?;
        self.driver.reset_presence(delay)?;
        Ok(())
    }

    /// The scratchpad of `address`, if the device answers and the data is
    /// trustworthy
    pub fn connected_scratchpad(
        &mut self,
        address: &Address,
        delay: &mut impl DelayNs,
    ) -> Result<Option<Scratchpad>, Error<E>> {
        let scratchpad = match self.read_scratchpad(address, delay) {
            Ok(scratchpad) => scratchpad,
            Err(Error::NoPresence) => return Ok(None),
            Err(e) => return Err(e),
        };
        match scratchpad.validate() {
            Ok(()) => Ok(Some(scratchpad)),
            Err(Error::AllZeros) | Err(Error::CrcMismatch(_, _)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_connected(
        &mut self,
        address: &Address,
        delay: &mut impl DelayNs,
    ) -> Result<bool, Error<E>> {
        Ok(self.connected_scratchpad(address, delay)?.is_some())
    }

    /// Configures the resolution of `address`; `bits` is clamped into 9..=12.
    ///
    /// Only writes when the register differs. Returns `Ok(false)` when the
    /// device is unreachable. All sensors convert together, so the wait bound
    /// keeps the highest resolution configured on this bus.
    pub fn set_resolution(
        &mut self,
        address: &Address,
        bits: u8,
        delay: &mut impl DelayNs,
    ) -> Result<bool, Error<E>> {
        let resolution = Resolution::from_bits(bits);
        let scratchpad = match self.connected_scratchpad(address, delay)? {
            Some(scratchpad) => scratchpad,
            None => {
                log::debug!("set resolution {} on {}: not connected", bits, address);
                return Ok(false);
            }
        };

        if scratchpad.config() != resolution.config_byte() {
            self.write_scratchpad(
                address,
                scratchpad.high_alarm(),
                scratchpad.low_alarm(),
                resolution.config_byte(),
                delay,
            )?;
        }
        self.resolution = self.resolution.max(resolution);
        log::debug!(
            "set resolution {} on {}, waiting for {} bit conversions",
            resolution.bits(),
            address,
            self.resolution.bits()
        );
        Ok(true)
    }

    /// Starts a conversion on every sensor and waits until the bus reports
    /// completion or the conversion time of the current resolution passed.
    ///
    /// `yielder` runs between polls so other tasks keep running. Returns
    /// whether completion was observed before the timeout.
    pub fn request_temperatures(
        &mut self,
        delay: &mut impl DelayNs,
        clock: &mut impl Clock,
        yielder: &mut impl Yield,
    ) -> Result<bool, Error<E>> {
        self.driver
            .reset_skip_write_only(delay, &[Command::Convert.op_code()])?;

        let timeout = self.resolution.conversion_time_ms();
        let start = clock.now_ms();
        loop {
            if self.is_conversion_complete(delay)? {
                log::debug!("conversion done after {} ms", elapsed_ms(clock, start));
                return Ok(true);
            }
            if elapsed_ms(clock, start) >= timeout {
                log::debug!("conversion wait timed out after {} ms", timeout);
                return Ok(false);
            }
            yielder.yield_now();
        }
    }

    /// Sensors hold the line low while converting
    pub fn is_conversion_complete(&mut self, delay: &mut impl DelayNs) -> Result<bool, Error<E>> {
        Ok(self.driver.read_bit(delay)?)
    }

    /// The last converted temperature of `address`, or `None` when the
    /// sensor is absent, its scratchpad is untrustworthy or it never converted
    pub fn read_temperature(
        &mut self,
        address: &Address,
        delay: &mut impl DelayNs,
    ) -> Result<Option<Temperature>, Error<E>> {
        Ok(self
            .connected_scratchpad(address, delay)?
            .map(|scratchpad| scratchpad.temperature())
            .filter(|temperature| !temperature.is_disconnected()))
    }

    /// Degrees Celsius, or [`DEVICE_DISCONNECTED_C`]
    pub fn get_temp_c(&mut self, address: &Address, delay: &mut impl DelayNs) -> Result<f32, Error<E>> {
        Ok(self
            .read_temperature(address, delay)?
            .map_or(DEVICE_DISCONNECTED_C, |t| t.celsius()))
    }

    /// Degrees Fahrenheit, or [`DEVICE_DISCONNECTED_F`]
    pub fn get_temp_f(&mut self, address: &Address, delay: &mut impl DelayNs) -> Result<f32, Error<E>> {
        Ok(self
            .read_temperature(address, delay)?
            .map_or(DEVICE_DISCONNECTED_F, |t| t.fahrenheit()))
    }

    /// Converts and reads the only sensor on the bus without addressing it
    pub fn read_single_temperature(&mut self, delay: &mut impl DelayNs) -> Result<Temperature, Error<E>> {
        self.driver
            .reset_skip_write_only(delay, &[Command::Convert.op_code()])?;
        delay.delay_ms(self.resolution.conversion_time_ms());

        let mut raw = [0u8; Scratchpad::BYTES];
        self.driver
            .reset_skip_write_read(delay, &[Command::ReadScratchpad.op_code()], &mut raw)?;
        self.driver.reset_presence(delay)?;

        let scratchpad = Scratchpad::from(raw);
        scratchpad.validate()?;
        Ok(scratchpad.temperature())
    }

    /// Copies thresholds and configuration into the sensor's EEPROM
    pub fn save_config(&mut self, address: &Address, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.driver
            .reset_select_write_only(delay, address, &[Command::CopyScratchpad.op_code()])?;
        // EEPROM write time
        delay.delay_ms(10);
        self.driver.reset_presence(delay)?;
        Ok(())
    }

    /// Reloads thresholds and configuration from the sensor's EEPROM
    pub fn recall_config(&mut self, address: &Address, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.driver
            .reset_select_write_only(delay, address, &[Command::RecallE2.op_code()])?;
        self.driver.reset_presence(delay)?;
        Ok(())
    }
}
