//! Keeping the calibration across resets
//!
//! Either as a byte in EEPROM the bootloader loads on entry, or baked into
//! the bootloader itself as `LDI r16, value; OUT OSCCAL, r16` in its first
//! two words. Baking rewrites the bootloader's first page, so it goes
//! through a scratch copy in page 0 and every step can be repeated from
//! whatever a power loss leaves behind.

use embedded_hal::watchdog::Watchdog;

use crate::hal::flash::{erase_page, rewrite_page};
use crate::hal::{Eeprom, FlashDevice, Oscillator};
use crate::isa::{self, ERASED};
use crate::trace;

/// EEPROM content before the first calibration
const UNCALIBRATED: u8 = 0xff;

/// Page 0: `rjmp` back into the calibrator, the bootloader's byte address,
/// then words 2.. of the bootloader's first page.
const SCRATCH: u16 = 0;
const SCRATCH_OFFSET: u16 = SCRATCH + 2;

pub trait CalibrationStore {
    type Error;

    fn commit(&mut self, value: u8) -> Result<(), Self::Error>;
}

pub struct EepromStore<E> {
    eeprom: E,
    addr: u16,
}

impl<E: Eeprom> EepromStore<E> {
    pub fn new(eeprom: E, addr: u16) -> Self {
        Self { eeprom, addr }
    }

    pub fn release(self) -> E {
        self.eeprom
    }
}

impl<E: Eeprom> CalibrationStore for EepromStore<E> {
    type Error = E::Error;

    fn commit(&mut self, value: u8) -> Result<(), E::Error> {
        nb::block!(self.eeprom.write(self.addr, value))
    }
}

/// Load a stored calibration into the oscillator. An erased byte means
/// none was ever stored and the factory value stays.
pub fn restore_from_eeprom<E, O>(eeprom: &E, addr: u16, osc: &mut O) -> Option<u8>
where
    E: Eeprom,
    O: Oscillator,
{
    let value = eeprom.read(addr);
    if value == UNCALIBRATED {
        return None;
    }
    osc.set_trim(value);
    Some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakeError<E> {
    Flash(E),
    /// Nothing but erased pages between the calibrator and the top of flash
    NoBootloader,
}

pub struct BakedStore<F, W> {
    flash: F,
    watchdog: W,
    program_end: u16,
    osccal_io: u8,
}

impl<F: FlashDevice, W: Watchdog> BakedStore<F, W> {
    /// `program_end` is the first byte past the calibrator image
    pub fn new(flash: F, watchdog: W, program_end: u16, osccal_io: u8) -> Self {
        Self { flash, watchdog, program_end, osccal_io }
    }

    pub fn release(self) -> (F, W) {
        (self.flash, self.watchdog)
    }

    /// Bootloader address recorded by an earlier, completed staging step
    fn staged(&self) -> Option<u16> {
        match self.flash.read_word(SCRATCH_OFFSET) {
            ERASED => None,
            offset => Some(offset),
        }
    }

    /// First page after the calibrator whose first byte is programmed.
    ///
    /// Only the first byte is checked: the page below the bootloader may
    /// still hold the application jump slots in its last bytes.
    fn find_bootloader(&self) -> Option<u16> {
        let page = F::PAGE_SIZE;
        let mut addr = (self.program_end as u32 + page as u32 - 1) & !(page as u32 - 1);
        while addr < F::FLASH_SIZE {
            if self.flash.read_byte(addr as u16) != 0xff {
                return Some(addr as u16);
            }
            addr += page as u32;
        }
        None
    }

    fn stage(&mut self, offset: u16) -> Result<(), F::Error> {
        let entry = isa::rjmp(SCRATCH, SCRATCH + F::PAGE_SIZE);
        rewrite_page(&mut self.flash, &mut self.watchdog, SCRATCH, |flash, at| match at {
            0 => entry,
            2 => offset,
            _ => flash.read_word(offset + at),
        })
    }

    fn bake(&mut self, offset: u16, value: u8) -> Result<(), F::Error> {
        let restore = isa::osccal_restore(value, self.osccal_io);
        rewrite_page(&mut self.flash, &mut self.watchdog, offset, |flash, at| match at {
            0 => restore[0],
            2 => restore[1],
            _ => flash.read_word(SCRATCH + at),
        })
    }

    fn commit_steps(&mut self, value: u8) -> Result<(), BakeError<F::Error>> {
        let offset = match self.staged() {
            Some(offset) => offset,
            None => {
                let offset = self.find_bootloader().ok_or(BakeError::NoBootloader)?;
                self.stage(offset).map_err(BakeError::Flash)?;
                offset
            }
        };
        trace!("bake {} at {}", value, crate::logger::Hex(offset));

        self.bake(offset, value).map_err(BakeError::Flash)?;

        // Reset goes straight to the bootloader from here on
        let reset = isa::rjmp(0, offset);
        rewrite_page(&mut self.flash, &mut self.watchdog, 0, |_, at| if at == 0 { reset } else { ERASED })
            .map_err(BakeError::Flash)?;

        // The application slots below the bootloader still lead here
        erase_page(&mut self.flash, &mut self.watchdog, offset.wrapping_sub(F::PAGE_SIZE))
            .map_err(BakeError::Flash)
    }
}

impl<F: FlashDevice, W: Watchdog> CalibrationStore for BakedStore<F, W> {
    type Error = BakeError<F::Error>;

    fn commit(&mut self, value: u8) -> Result<(), Self::Error> {
        self.commit_steps(value)
    }
}

/// Commit `value` and hand control to `halt`, which never returns.
///
/// A failed commit is only logged; the next run of the program tries again.
pub fn store_and_halt<S: CalibrationStore>(store: &mut S, value: u8, halt: fn() -> !) -> ! {
    if store.commit(value).is_err() {
        trace!("commit failed");
    }
    halt()
}
