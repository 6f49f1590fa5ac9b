//! Simulated parts for host tests

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::calibration::FrameMeter;
use crate::hal::usb::{UsbCallbacks, UsbDriver};
use crate::hal::{Eeprom, FlashDevice, Oscillator, PreservedRegister};
use crate::isa;

/// Power went away in the middle of a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerLoss;

/// Flash with a page buffer that behaves like the SPM unit.
///
/// `cut_after(n)` lets `n` more erases or writes through and fails every
/// one after that, the way a brown-out would stop the sequence.
pub struct SimFlash<const SIZE: usize, const PAGE: u16> {
    mem: Vec<u8>,
    buffer: Vec<u8>,
    budget: Option<usize>,
    pub mutations: usize,
    pub fuses: [u8; 4],
    pub signature: [u8; 6],
}

impl<const SIZE: usize, const PAGE: u16> SimFlash<SIZE, PAGE> {
    pub fn new() -> Self {
        Self {
            mem: vec![0xff; SIZE],
            buffer: vec![0xff; PAGE as usize],
            budget: None,
            mutations: 0,
            fuses: [0xe1, 0xff, 0xfe, 0xd5],
            signature: [0x1e, 0x5c, 0x93, 0x00, 0x0b, 0x00],
        }
    }

    /// A part whose flash already holds `image`
    pub fn from_bytes(image: &[u8]) -> Self {
        let mut flash = Self::new();
        flash.load(0, image);
        flash
    }

    pub fn cut_after(&mut self, ops: usize) {
        self.budget = Some(ops);
    }

    /// Back on power: the page buffer is lost, the flash contents are not
    pub fn power_cycle(&mut self) {
        self.budget = None;
        self.buffer.iter_mut().for_each(|b| *b = 0xff);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mem
    }

    pub fn load(&mut self, addr: u16, data: &[u8]) {
        self.mem[addr as usize..addr as usize + data.len()].copy_from_slice(data);
    }

    pub fn load_words(&mut self, addr: u16, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            self.load(addr + 2 * i as u16, &word.to_le_bytes());
        }
    }

    fn mutate(&mut self) -> Result<(), PowerLoss> {
        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                return Err(PowerLoss);
            }
            *budget -= 1;
        }
        self.mutations += 1;
        Ok(())
    }
}

impl<const SIZE: usize, const PAGE: u16> Default for SimFlash<SIZE, PAGE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize, const PAGE: u16> FlashDevice for SimFlash<SIZE, PAGE> {
    type Error = PowerLoss;

    const PAGE_SIZE: u16 = PAGE;
    const FLASH_SIZE: u32 = SIZE as u32;

    fn read_byte(&self, addr: u16) -> u8 {
        self.mem[addr as usize % SIZE]
    }

    fn fill_word(&mut self, addr: u16, word: u16) -> Result<(), PowerLoss> {
        if self.budget == Some(0) {
            return Err(PowerLoss);
        }
        let offset = (addr % PAGE) as usize & !1;
        self.buffer[offset..offset + 2].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    fn erase_page(&mut self, addr: u16) -> Result<(), PowerLoss> {
        self.mutate()?;
        let page = Self::page_of(addr) as usize;
        self.mem[page..page + PAGE as usize].iter_mut().for_each(|b| *b = 0xff);
        Ok(())
    }

    fn write_page(&mut self, addr: u16) -> Result<(), PowerLoss> {
        self.mutate()?;
        let page = Self::page_of(addr) as usize;
        for (cell, data) in self.mem[page..page + PAGE as usize].iter_mut().zip(&self.buffer) {
            *cell &= *data;
        }
        self.buffer.iter_mut().for_each(|b| *b = 0xff);
        Ok(())
    }

    fn read_fuse(&self, index: u16) -> u8 {
        self.fuses.get(index as usize).copied().unwrap_or(0xff)
    }

    fn read_signature(&self, index: u16) -> u8 {
        self.signature.get(index as usize).copied().unwrap_or(0xff)
    }
}

/// Where execution ends up after reset: follow `rjmp`s and slide over erased
/// words until anything else is found.
pub fn boot<const SIZE: usize, const PAGE: u16>(flash: &SimFlash<SIZE, PAGE>) -> u16 {
    let mut pc = 0u16;
    for _ in 0..SIZE {
        let word = flash.read_word(pc);
        pc = match isa::rjmp_target(pc, word, SIZE as u32) {
            Some(target) => target,
            None if word == isa::ERASED => pc.wrapping_add(2) % SIZE as u16,
            None => return pc,
        };
    }
    panic!("reset never reaches code");
}

pub struct SimEeprom {
    pub mem: Vec<u8>,
    /// `WouldBlock` answers left before the next write is accepted
    pub busy: usize,
}

impl SimEeprom {
    pub fn new() -> Self {
        Self { mem: vec![0xff; 512], busy: 0 }
    }
}

impl Eeprom for SimEeprom {
    type Error = core::convert::Infallible;

    fn read(&self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    fn write(&mut self, addr: u16, value: u8) -> nb::Result<(), Self::Error> {
        if self.busy > 0 {
            self.busy -= 1;
            return Err(nb::Error::WouldBlock);
        }
        self.mem[addr as usize] = value;
        Ok(())
    }
}

#[derive(Default)]
pub struct SimRegister {
    pub value: u8,
}

impl PreservedRegister for SimRegister {
    fn read(&self) -> u8 {
        self.value
    }

    fn write(&mut self, value: u8) {
        self.value = value;
    }
}

#[derive(Default)]
pub struct SimWatchdog {
    pub feeds: usize,
}

impl embedded_hal::watchdog::Watchdog for SimWatchdog {
    fn feed(&mut self) {
        self.feeds += 1;
    }
}

/// Frequency of the simulated RC oscillator in arbitrary units.
///
/// Dual range layout: the upper half overlaps the lower one so that 128
/// runs at the speed of 96.
pub fn dual_range_frequency(trim: u8) -> i16 {
    if trim < 0x80 {
        trim as i16
    } else {
        trim as i16 - 128 + 96
    }
}

/// RC oscillator whose trim register is shared with a [`SimMeter`]
pub struct SimOscillator {
    trim: Rc<Cell<u8>>,
    pub writes: Vec<u8>,
}

impl Oscillator for SimOscillator {
    fn trim(&self) -> u8 {
        self.trim.get()
    }

    fn set_trim(&mut self, value: u8) {
        self.writes.push(value);
        self.trim.set(value);
    }
}

/// Frame timing as seen through the oscillator: `target` minus the current
/// frequency, so a slow oscillator reads positive.
pub struct SimMeter {
    trim: Rc<Cell<u8>>,
    target: i16,
    frequency: fn(u8) -> i16,
    pub calls: usize,
}

impl FrameMeter for SimMeter {
    fn measure(&mut self) -> i16 {
        self.calls += 1;
        self.target - (self.frequency)(self.trim.get())
    }
}

pub fn rc_oscillator(initial: u8, target: i16, frequency: fn(u8) -> i16) -> (SimOscillator, SimMeter) {
    let trim = Rc::new(Cell::new(initial));
    (
        SimOscillator { trim: trim.clone(), writes: Vec::new() },
        SimMeter { trim, target, frequency, calls: 0 },
    )
}

/// One bus event delivered during a poll
#[derive(Debug, Clone)]
pub enum BusEvent {
    Setup(Vec<u8>),
    /// IN data stage of the given length
    Read(usize),
    Descriptor(Vec<u8>),
    Reset,
}

/// Transport that replays scripted bus traffic, one event per poll
#[derive(Default)]
pub struct SimUsb {
    pub script: VecDeque<BusEvent>,
    pub inits: usize,
    pub shutdowns: usize,
    pub polls: usize,
    pub setup_replies: Vec<u8>,
    pub read_data: Vec<Vec<u8>>,
    pub descriptors: Vec<Option<crate::hal::usb::Descriptor>>,
}

impl SimUsb {
    pub fn new(events: impl IntoIterator<Item = BusEvent>) -> Self {
        Self { script: events.into_iter().collect(), ..Default::default() }
    }
}

impl UsbDriver for SimUsb {
    fn init(&mut self) {
        self.inits += 1;
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }

    fn poll(&mut self, callbacks: &mut dyn UsbCallbacks) {
        self.polls += 1;
        match self.script.pop_front() {
            Some(BusEvent::Setup(packet)) => {
                callbacks.rx(&packet);
                let reply = callbacks.setup(&packet);
                self.setup_replies.push(reply);
            }
            Some(BusEvent::Read(len)) => {
                let mut data = Vec::new();
                // Low-speed control transfers move at most 8 bytes per packet
                while data.len() < len {
                    let mut chunk = [0u8; 8];
                    let want = (len - data.len()).min(8);
                    let got = callbacks.read(&mut chunk[..want]) as usize;
                    data.extend_from_slice(&chunk[..got]);
                    if got < want {
                        break;
                    }
                }
                self.read_data.push(data);
            }
            Some(BusEvent::Descriptor(request)) => {
                let found = callbacks.descriptor(&request);
                self.descriptors.push(found);
            }
            Some(BusEvent::Reset) => {
                callbacks.reset(true);
                callbacks.reset(false);
            }
            None => {}
        }
    }
}
