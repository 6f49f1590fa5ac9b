//! Flash command processor
//!
//! Commands arrive in the SETUP stage and are only latched there; the main
//! loop executes them after the driver returns, since a page erase or write
//! halts the CPU longer than the bus allows inside a transaction.

use super::config_block::ConfigBlock;
use crate::config;
use crate::hal::usb::{UsbCallbacks, NO_MSG};
use crate::hal::{Eeprom, FlashDevice};
use crate::protocol::{self, FlashCommand, Opcode, ProtocolError, Region, Request};
use crate::trace;

/// What the main loop has to do after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Idle,
    Execute(FlashCommand),
    Exit,
    /// A command failed its integrity check; nothing was executed
    Corrupt,
}

#[derive(Clone, Copy)]
struct ReadState {
    region: Region,
    offset: u16,
    remaining: u16,
}

pub struct CommandProcessor<F, E> {
    flash: F,
    eeprom: E,
    check_crc: bool,
    config_reply: [u8; 6],
    data_space: Option<fn(u16) -> u8>,
    pending: Outcome,
    read: Option<ReadState>,
}

impl<F: FlashDevice, E: Eeprom> CommandProcessor<F, E> {
    pub fn new(flash: F, eeprom: E) -> Self {
        let signature = [flash.read_signature(2), flash.read_signature(4)];
        Self {
            flash,
            eeprom,
            check_crc: config::INTEGRITY_CHECK,
            config_reply: ConfigBlock::current().reply(signature),
            data_space: None,
            pending: Outcome::Idle,
            read: None,
        }
    }

    pub fn with_integrity_check(mut self, enabled: bool) -> Self {
        self.check_crc = enabled;
        self
    }

    /// Serve RAM reads through `read`. Without it they answer nothing.
    pub fn with_data_space(mut self, read: fn(u16) -> u8) -> Self {
        self.data_space = Some(read);
        self
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn eeprom(&self) -> &E {
        &self.eeprom
    }

    /// Forget any latched command and read in progress
    pub fn reset(&mut self) {
        self.pending = Outcome::Idle;
        self.read = None;
    }

    /// Hand the latched command to the main loop
    pub fn take(&mut self) -> Outcome {
        core::mem::replace(&mut self.pending, Outcome::Idle)
    }

    pub fn execute(&mut self, command: FlashCommand) -> Result<(), F::Error> {
        match command.opcode {
            Opcode::Fill => self.flash.fill_word(command.address, command.data),
            Opcode::Erase => self.flash.erase_page(F::page_of(command.address)),
            Opcode::Write => self.flash.write_page(F::page_of(command.address)),
            Opcode::Exit => Ok(()),
        }
    }

    pub fn release(self) -> (F, E) {
        (self.flash, self.eeprom)
    }

    fn read_byte(&self, region: Region, addr: u16) -> u8 {
        match region {
            Region::Ram => self.data_space.map_or(0, |read| read(addr)),
            Region::Flash => self.flash.read_byte(addr),
            Region::Fuse => self.flash.read_fuse(addr),
            Region::Signature => self.flash.read_signature(addr),
            Region::Eeprom => self.eeprom.read(addr),
            Region::Config => self.config_reply.get(addr as usize).copied().unwrap_or(0),
        }
    }
}

impl<F: FlashDevice, E: Eeprom> UsbCallbacks for CommandProcessor<F, E> {
    fn setup(&mut self, request: &[u8]) -> u8 {
        match protocol::parse(request, self.check_crc) {
            Ok(Request::Command(command)) => {
                self.pending = match command.opcode {
                    Opcode::Exit => Outcome::Exit,
                    _ => Outcome::Execute(command),
                };
                0
            }
            Ok(Request::Read { region, offset, len }) => {
                let remaining = match region {
                    Region::Config => len.min(6u16.saturating_sub(offset)),
                    Region::Ram if self.data_space.is_none() => 0,
                    _ => len,
                };
                self.read = Some(ReadState { region, offset, remaining });
                NO_MSG
            }
            Ok(Request::Ignored) | Err(ProtocolError::ShortPacket) => 0,
            Err(ProtocolError::InvalidChecksum) => {
                trace!("crc {}", crate::logger::Hex(request[1] as u16));
                self.pending = Outcome::Corrupt;
                0
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> u8 {
        let mut state = match self.read {
            Some(state) => state,
            None => return 0,
        };
        let count = buf.len().min(state.remaining as usize);
        for slot in buf[..count].iter_mut() {
            *slot = self.read_byte(state.region, state.offset);
            state.offset = state.offset.wrapping_add(1);
        }
        state.remaining -= count as u16;
        self.read = if state.remaining == 0 { None } else { Some(state) };
        count as u8
    }
}
