use crate::{Address, Command, Driver, Error, IoWire};
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;

/// Which devices take part in a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchKind {
    #[default]
    Normal,
    /// Only devices with a pending alarm condition answer
    Alarmed,
}

impl SearchKind {
    fn command(self) -> Command {
        match self {
            SearchKind::Normal => Command::SearchRom,
            SearchKind::Alarmed => Command::SearchRomAlarmed,
        }
    }
}

/// Position in the ROM search tree, carried from one search call to the next.
///
/// Bit positions are 1-indexed; zero means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchState {
    rom: [u8; Address::BYTES as usize],
    last_discrepancy: u8,
    last_family_discrepancy: u8,
    last_device: bool,
}

impl SearchState {
    pub fn new() -> SearchState {
        SearchState::default()
    }

    /// Starts the traversal at the lowest ROM carrying `family`.
    ///
    /// When no such device is attached the first result has another family
    /// code, so callers compare [`Address::family_code`].
    pub fn for_family(family: u8) -> SearchState {
        let mut rom = [0u8; Address::BYTES as usize];
        rom[0] = family;
        SearchState {
            rom,
            last_discrepancy: Address::BITS,
            ..SearchState::default()
        }
    }

    /// Replays exactly the path of `address`
    pub(crate) fn verifying(address: &Address) -> SearchState {
        SearchState {
            rom: **address,
            last_discrepancy: Address::BITS,
            ..SearchState::default()
        }
    }

    /// Makes the next search jump past every remaining device of the family
    /// that was just returned
    pub fn skip_family(&mut self) {
        self.last_discrepancy = self.last_family_discrepancy;
        self.last_family_discrepancy = 0;
        if self.last_discrepancy == 0 {
            self.last_device = true;
        }
    }

    /// Forgets the explored branches so the next search starts a fresh pass
    pub fn reset(&mut self) {
        self.last_discrepancy = 0;
        self.last_family_discrepancy = 0;
        self.last_device = false;
    }

    pub fn last_discrepancy(&self) -> u8 {
        self.last_discrepancy
    }

    pub fn last_family_discrepancy(&self) -> u8 {
        self.last_family_discrepancy
    }

    /// The previous search returned the last device of the pass
    pub fn is_exhausted(&self) -> bool {
        self.last_device
    }

    fn rom_bit(&self, bit: u8) -> bool {
        let bit = bit - 1;
        self.rom[(bit / 8) as usize] & (0x01 << (bit % 8)) != 0x00
    }

    fn write_rom_bit(&mut self, bit: u8, value: bool) {
        let bit = bit - 1;
        let mask = 0x01 << (bit % 8);
        if value {
            self.rom[(bit / 8) as usize] |= mask;
        } else {
            self.rom[(bit / 8) as usize] &= !mask;
        }
    }
}

pub struct SearchIter<'a, W: IoWire, Delay: DelayNs> {
    state: Option<SearchState>,
    kind: SearchKind,
    wire: &'a mut Driver<W>,
    delay: &'a mut Delay,
}

impl<'a, W: IoWire, Delay: DelayNs> Iterator for SearchIter<'a, W, Delay> {
    type Item = Result<Address, Error<W::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut state = self.state.take()?;
        let result = self
            .wire
            .search(&mut state, self.kind, &mut *self.delay)
            .transpose()?;
        // a device with a broken ROM CRC still advanced the state
        if matches!(result, Ok(_) | Err(Error::CrcMismatch(_, _))) {
            self.state = Some(state);
        }
        Some(result)
    }
}

enum Traversal {
    Complete,
    /// Nobody answered the very first bit
    Silent,
    Aborted,
}

impl<E: Debug, W: IoWire<Error = E>> Driver<W> {
    pub fn search_next(
        &mut self,
        search: &mut SearchState,
        delay: &mut impl DelayNs,
    ) -> Result<Option<Address>, Error<E>> {
        self.search(search, SearchKind::Normal, delay)
    }

    pub fn search_next_alarmed(
        &mut self,
        search: &mut SearchState,
        delay: &mut impl DelayNs,
    ) -> Result<Option<Address>, Error<E>> {
        self.search(search, SearchKind::Alarmed, delay)
    }

    /// Iterates over one fresh search pass
    pub fn devices<'a, Delay: DelayNs>(
        &'a mut self,
        kind: SearchKind,
        delay: &'a mut Delay,
    ) -> SearchIter<'a, W, Delay> {
        SearchIter {
            state: Some(SearchState::new()),
            kind,
            wire: self,
            delay,
        }
    }

    /// Checks that the device with `address` is attached, without disturbing
    /// any search in progress
    pub fn verify(&mut self, address: &Address, delay: &mut impl DelayNs) -> Result<bool, Error<E>> {
        let mut state = SearchState::verifying(address);
        match self.search(&mut state, SearchKind::Normal, delay) {
            Ok(found) => Ok(found.as_ref() == Some(address)),
            Err(Error::SearchAborted) | Err(Error::CrcMismatch(_, _)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Finds the next device of the pass described by `state`.
    ///
    /// Returns `Ok(None)` once the pass is exhausted, when no device answers
    /// the reset, or when no device takes part in the search at all (e.g. no
    /// alarm is pending). Every device of a pass is returned exactly once.
    pub fn search(
        &mut self,
        state: &mut SearchState,
        kind: SearchKind,
        delay: &mut impl DelayNs,
    ) -> Result<Option<Address>, Error<E>> {
        if state.last_device {
            return Ok(None);
        }

        if !self.reset_presence(delay)? {
            state.reset();
            return Ok(None);
        }

        self.write_command(delay, kind.command())?;

        let traversal = critical_section::with(|_| self.traverse(state, delay))?;
        match traversal {
            Traversal::Complete => {}
            Traversal::Silent => {
                state.reset();
                return Ok(None);
            }
            Traversal::Aborted => {
                state.reset();
                log::warn!("search aborted, no device answered mid-traversal");
                return Err(Error::SearchAborted);
            }
        }

        let address = Address::from(state.rom);
        if !address.is_crc_valid() {
            let computed = crate::crc8(&address[..Address::BYTES as usize - 1]);
            log::warn!("found {} with bad crc, expected {:02x}", address, computed);
            return Err(Error::CrcMismatch(computed, address.crc()));
        }
        Ok(Some(address))
    }

    /// Walks the 64 ROM bits: read the bit and its complement, pick a branch,
    /// write it back so devices on the other branch drop out
    fn traverse(&mut self, state: &mut SearchState, delay: &mut impl DelayNs) -> Result<Traversal, E> {
        let mut last_zero = 0;

        for id_bit_number in 1..=Address::BITS {
            let id_bit = self.read_bit(delay)?;
            let cmp_id_bit = self.read_bit(delay)?;

            if id_bit && cmp_id_bit {
                return Ok(if id_bit_number == 1 {
                    Traversal::Silent
                } else {
                    Traversal::Aborted
                });
            }

            let direction = if id_bit != cmp_id_bit {
                // all remaining devices agree on this bit
                id_bit
            } else {
                let direction = if id_bit_number < state.last_discrepancy {
                    state.rom_bit(id_bit_number)
                } else {
                    id_bit_number == state.last_discrepancy
                };
                if !direction {
                    last_zero = id_bit_number;
                    if last_zero < 9 {
                        state.last_family_discrepancy = last_zero;
                    }
                }
                direction
            };

            state.write_rom_bit(id_bit_number, direction);
            self.write_bit(delay, direction)?;
        }

        state.last_discrepancy = last_zero;
        state.last_device = last_zero == 0;
        Ok(Traversal::Complete)
    }
}
