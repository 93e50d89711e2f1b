use crate::{ensure_correct_crc8, Address, Command, Error, IoWire, OpCode};
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;

pub struct Driver<W: IoWire> {
    io_wire: W,
}

impl<E: Debug, W: IoWire<Error = E>> Driver<W> {
    pub fn new(io_wire: W) -> Self {
        Driver { io_wire }
    }

    pub fn into_inner(self) -> W {
        self.io_wire
    }

    pub fn reset_write_read(
        &mut self,
        delay: &mut impl DelayNs,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error<E>> {
        self.reset(delay)?;
        self.write_bytes(delay, write)?;
        self.read_bytes(delay, read)?;
        Ok(())
    }

    pub fn reset_select_write_read(
        &mut self,
        delay: &mut impl DelayNs,
        addr: &Address,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error<E>> {
        self.reset(delay)?;
        self.select(delay, addr)?;
        self.write_bytes(delay, write)?;
        self.read_bytes(delay, read)?;
        Ok(())
    }

    pub fn reset_select_write_only(
        &mut self,
        delay: &mut impl DelayNs,
        addr: &Address,
        write: &[u8],
    ) -> Result<(), Error<E>> {
        self.reset(delay)?;
        self.select(delay, addr)?;
        self.write_bytes(delay, write)?;
        Ok(())
    }

    pub fn reset_skip_write_read(
        &mut self,
        delay: &mut impl DelayNs,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Error<E>> {
        self.reset(delay)?;
        self.skip(delay)?;
        self.write_bytes(delay, write)?;
        self.read_bytes(delay, read)?;
        Ok(())
    }

    pub fn reset_skip_write_only(
        &mut self,
        delay: &mut impl DelayNs,
        write: &[u8],
    ) -> Result<(), Error<E>> {
        self.reset(delay)?;
        self.skip(delay)?;
        self.write_bytes(delay, write)?;
        Ok(())
    }

    /// Addresses every device on the bus at once
    pub fn skip(&mut self, delay: &mut impl DelayNs) -> Result<(), E> {
        self.write_command(delay, Command::SkipRom)
    }

    /// Addresses the single device whose ROM matches `addr`
    pub fn select(&mut self, delay: &mut impl DelayNs, addr: &Address) -> Result<(), E> {
        self.write_command(delay, Command::MatchRom)?;
        self.write_bytes(delay, addr.as_ref())
    }

    /// Reads the ROM of the only device on the bus.
    ///
    /// With more than one device attached the answers collide and the CRC
    /// check fails.
    pub fn read_rom(&mut self, delay: &mut impl DelayNs) -> Result<Address, Error<E>> {
        let mut raw = [0u8; Address::BYTES as usize];
        self.reset_write_read(delay, &[Command::ReadRom.op_code()], &mut raw)?;
        ensure_correct_crc8(&raw)?;
        Ok(Address::from(raw))
    }

    /// Performs a reset and listens for a presence pulse
    /// Returns Err(WireFault) if the wire seems to be shortened,
    /// Err(NoPresence) if no device answered the reset
    pub fn reset(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.io_wire.release()?;
        self.ensure_wire_high(delay)?;

        let presence = critical_section::with(|_| -> Result<bool, E> {
            self.io_wire.drive_low()?;
            delay.delay_us(480);
            self.io_wire.release()?;
            delay.delay_us(70);
            self.io_wire.is_low()
        })?;
        delay.delay_us(410);

        if presence {
            Ok(())
        } else {
            Err(Error::NoPresence)
        }
    }

    pub fn reset_presence(&mut self, delay: &mut impl DelayNs) -> Result<bool, Error<E>> {
        self.reset(delay).map(|_| true).or_else(|error| {
            if matches!(error, Error::NoPresence) {
                Ok(false)
            } else {
                Err(error)
            }
        })
    }

    fn ensure_wire_high(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        for _ in 0..125 {
            if self.io_wire.is_high()? {
                return Ok(());
            }
            delay.delay_us(2);
        }
        Err(Error::WireFault)
    }

    pub fn read_bytes(&mut self, delay: &mut impl DelayNs, dst: &mut [u8]) -> Result<(), E> {
        for d in dst {
            *d = self.read_byte(delay)?;
        }
        Ok(())
    }

    /// Least significant bit first
    pub fn read_byte(&mut self, delay: &mut impl DelayNs) -> Result<u8, E> {
        let mut byte = 0_u8;
        for i in 0..8 {
            if self.read_bit(delay)? {
                byte |= 0x01 << i;
            }
            delay.delay_us(15);
        }
        Ok(byte)
    }

    pub fn read_bit(&mut self, delay: &mut impl DelayNs) -> Result<bool, E> {
        let val = critical_section::with(|_| -> Result<bool, E> {
            self.io_wire.drive_low()?;
            delay.delay_us(6);
            self.io_wire.release()?;
            delay.delay_us(9);
            self.io_wire.is_high()
        })?;
        delay.delay_us(55);
        Ok(val)
    }

    pub fn write_command(&mut self, delay: &mut impl DelayNs, cmd: impl OpCode) -> Result<(), E> {
        self.write_byte(delay, cmd.op_code())
    }

    pub fn write_bytes(&mut self, delay: &mut impl DelayNs, bytes: &[u8]) -> Result<(), E> {
        for b in bytes {
            self.write_byte(delay, *b)?;
        }
        Ok(())
    }

    /// Least significant bit first
    pub fn write_byte(&mut self, delay: &mut impl DelayNs, byte: u8) -> Result<(), E> {
        let mut byte = byte;
        for _ in 0..8 {
            self.write_bit(delay, (byte & 0x01) == 0x01)?;
            byte >>= 1;
        }
        delay.delay_us(100);
        Ok(())
    }

    /// A one is a short low pulse, a zero holds the line low for most of the slot
    pub fn write_bit(&mut self, delay: &mut impl DelayNs, high: bool) -> Result<(), E> {
        critical_section::with(|_| -> Result<(), E> {
            self.io_wire.drive_low()?;
            delay.delay_us(if high { 6 } else { 60 });
            self.io_wire.release()
        })?;
        delay.delay_us(if high { 64 } else { 10 });
        Ok(())
    }
}
