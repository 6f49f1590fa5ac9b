//! Boot-mode controller
//!
//! Every reset lands here first. The reset cause alone decides whether the
//! application runs or the bootloader takes the bus; the bootloader then
//! polls the driver and executes latched flash commands until the host tells
//! it to leave.

pub mod command;
pub mod config_block;
pub mod descriptor;
pub mod dispatch;

use embedded_hal::watchdog::Watchdog;

use self::command::{CommandProcessor, Outcome};
use self::dispatch::{Dispatch, Tables};
use crate::calibration::persist;
use crate::config::{self, Capabilities};
use crate::hal::usb::{UsbCallbacks, UsbDriver};
use crate::hal::{Eeprom, FlashDevice, Oscillator, PreservedRegister};
use crate::trace;

const PORF: u8 = 1 << 0;
const EXTRF: u8 = 1 << 1;
const BORF: u8 = 1 << 2;
const WDRF: u8 = 1 << 3;

/// Passed to the application in place of MCUSR when the host ended the
/// session; the same value as the exit request.
const EXIT_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    PowerOn,
    BrownOut,
    WatchdogOrExternal,
    /// The bootloader left on the host's request
    ExitCommand,
}

impl ResetCause {
    /// Decode MCUSR, or the value a restart after a session passes in its
    /// place. An empty register means the reset pin or a jump to the reset
    /// vector, which both ask for the bootloader.
    pub fn from_mcusr(flags: u8) -> Self {
        if flags & PORF != 0 {
            ResetCause::PowerOn
        } else if flags & BORF != 0 {
            ResetCause::BrownOut
        } else if flags & EXIT_FLAG != 0 {
            ResetCause::ExitCommand
        } else {
            ResetCause::WatchdogOrExternal
        }
    }

    /// Value handed to the application in r24
    pub fn to_mcusr(self) -> u8 {
        match self {
            ResetCause::PowerOn => PORF,
            ResetCause::BrownOut => BORF,
            ResetCause::WatchdogOrExternal => EXTRF | WDRF,
            ResetCause::ExitCommand => EXIT_FLAG,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    User,
    Bootloader,
}

/// Which image runs after a reset
pub const fn decide(cause: ResetCause) -> Mode {
    match cause {
        ResetCause::PowerOn | ResetCause::BrownOut | ResetCause::ExitCommand => Mode::User,
        ResetCause::WatchdogOrExternal => Mode::Bootloader,
    }
}

/// The bootloader-active bit in a register that survives reset.
///
/// Optionally drags along the driver's interrupt-free bit, which is set and
/// cleared together with it.
pub struct ModeFlag<R> {
    reg: R,
    mask: u8,
}

impl<R: PreservedRegister> ModeFlag<R> {
    pub fn new(reg: R) -> Self {
        Self::with_bits(reg, config::MODE_GPIOR_BIT, config::IRQLESS_GPIOR_BIT)
    }

    pub fn with_bits(reg: R, mode_bit: u8, irqless_bit: u8) -> Self {
        Self { reg, mask: 1 << mode_bit | 1 << irqless_bit }
    }

    pub fn is_bootloader(&self) -> bool {
        self.reg.read() & self.mask != 0
    }

    pub fn enter(&mut self) {
        self.reg.set_bits(self.mask);
    }

    pub fn leave(&mut self) {
        self.reg.clear_bits(self.mask);
    }

    pub fn release(self) -> R {
        self.reg
    }
}

/// Why the serve loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    Exit,
    Corrupt,
}

pub struct BootController<D, W, R, F, E, O> {
    usb: D,
    watchdog: W,
    mode: ModeFlag<R>,
    processor: CommandProcessor<F, E>,
    osc: O,
    caps: Capabilities,
}

impl<D, W, R, F, E, O> BootController<D, W, R, F, E, O>
where
    D: UsbDriver,
    W: Watchdog,
    R: PreservedRegister,
    F: FlashDevice,
    E: Eeprom,
    O: Oscillator,
{
    pub fn new(
        usb: D,
        watchdog: W,
        mode: ModeFlag<R>,
        processor: CommandProcessor<F, E>,
        osc: O,
        caps: Capabilities,
    ) -> Self {
        Self { usb, watchdog, mode, processor, osc, caps }
    }

    /// Start over from reset: the driver is quiet and the mode flag clear,
    /// then the bootloader is armed if the cause asks for it.
    pub fn cold_entry(&mut self, cause: ResetCause) -> Mode {
        self.usb.shutdown();
        self.mode.leave();

        let mode = decide(cause);
        if mode == Mode::Bootloader {
            self.mode.enter();
            if config::OSCCAL_FROM_EEPROM {
                persist::restore_from_eeprom(self.processor.eeprom(), config::EEPROM_OSCCAL, &mut self.osc);
            }
            self.processor.reset();
            self.usb.init();
        }
        trace!("mode {}", mode as u8);
        mode
    }

    /// Poll the driver and run what the host asks for until it leaves or a
    /// corrupted command forces a restart.
    pub fn serve<U>(&mut self, user: &mut U, tables: Tables<'_>) -> Result<Served, F::Error>
    where
        U: UsbCallbacks + ?Sized,
    {
        loop {
            let mut dispatch =
                Dispatch::new(&self.mode, self.caps, &mut self.processor, &mut *user, tables);
            self.usb.poll(&mut dispatch);

            match self.processor.take() {
                Outcome::Idle => self.watchdog.feed(),
                Outcome::Exit => return Ok(Served::Exit),
                Outcome::Corrupt => return Ok(Served::Corrupt),
                Outcome::Execute(command) => self.processor.execute(command)?,
            }
        }
    }

    /// Run from reset until the application is due; returns the cause it
    /// gets to see.
    pub fn run<U>(&mut self, cause: ResetCause, user: &mut U, tables: Tables<'_>) -> Result<ResetCause, F::Error>
    where
        U: UsbCallbacks + ?Sized,
    {
        let mut cause = cause;
        loop {
            if self.cold_entry(cause) == Mode::User {
                return Ok(cause);
            }
            cause = match self.serve(user, tables)? {
                Served::Exit => ResetCause::ExitCommand,
                // Drop off the bus and enumerate again
                Served::Corrupt => ResetCause::WatchdogOrExternal,
            };
        }
    }

    pub fn mode(&self) -> &ModeFlag<R> {
        &self.mode
    }

    pub fn processor(&self) -> &CommandProcessor<F, E> {
        &self.processor
    }

    pub fn release(self) -> (D, W, ModeFlag<R>, CommandProcessor<F, E>, O) {
        (self.usb, self.watchdog, self.mode, self.processor, self.osc)
    }
}
