//! Routes driver callbacks to the bootloader or the application
//!
//! Both share one copy of the USB driver. The mode flag decides who answers;
//! the capability word decides which optional application callbacks exist.

use super::descriptor::{Table, UserPointer};
use super::ModeFlag;
use crate::config::Capabilities;
use crate::hal::usb::{Descriptor, UsbCallbacks, NO_MSG};
use crate::hal::PreservedRegister;
use crate::protocol::Setup;

/// Descriptor tables searched before asking the application
#[derive(Clone, Copy)]
pub struct Tables<'a> {
    pub user: Option<UserPointer<'a>>,
    pub builtin: Table<'a>,
}

pub struct Dispatch<'a, R, B: ?Sized, U: ?Sized> {
    mode: &'a ModeFlag<R>,
    caps: Capabilities,
    bootloader: &'a mut B,
    user: &'a mut U,
    tables: Tables<'a>,
}

impl<'a, R, B, U> Dispatch<'a, R, B, U>
where
    R: PreservedRegister,
    B: UsbCallbacks + ?Sized,
    U: UsbCallbacks + ?Sized,
{
    pub fn new(
        mode: &'a ModeFlag<R>,
        caps: Capabilities,
        bootloader: &'a mut B,
        user: &'a mut U,
        tables: Tables<'a>,
    ) -> Self {
        Self { mode, caps, bootloader, user, tables }
    }

    fn in_bootloader(&self) -> bool {
        self.mode.is_bootloader()
    }
}

impl<R, B, U> UsbCallbacks for Dispatch<'_, R, B, U>
where
    R: PreservedRegister,
    B: UsbCallbacks + ?Sized,
    U: UsbCallbacks + ?Sized,
{
    fn setup(&mut self, request: &[u8]) -> u8 {
        if self.in_bootloader() {
            self.bootloader.setup(request)
        } else {
            self.user.setup(request)
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> u8 {
        if self.in_bootloader() {
            self.bootloader.read(buf)
        } else if self.caps.fn_read {
            self.user.read(buf)
        } else {
            0
        }
    }

    fn write(&mut self, data: &[u8]) -> u8 {
        if self.in_bootloader() {
            self.bootloader.write(data)
        } else if self.caps.fn_write {
            self.user.write(data)
        } else {
            NO_MSG
        }
    }

    fn write_out(&mut self, data: &[u8]) {
        if self.in_bootloader() {
            self.bootloader.write_out(data)
        } else if self.caps.fn_write_out {
            self.user.write_out(data)
        }
    }

    fn rx(&mut self, data: &[u8]) {
        if self.in_bootloader() {
            self.bootloader.rx(data)
        } else if self.caps.rx_user_hook {
            self.user.rx(data)
        }
    }

    fn reset(&mut self, active: bool) {
        if self.in_bootloader() {
            self.bootloader.reset(active)
        } else if self.caps.reset_hook {
            self.user.reset(active)
        }
    }

    fn set_address(&mut self) {
        if self.in_bootloader() {
            self.bootloader.set_address()
        } else if self.caps.set_address_hook {
            self.user.set_address()
        }
    }

    /// The application's table first so the bootloader keeps its USB
    /// identity, then the built-in table, then the application's own lookup.
    fn descriptor(&mut self, request: &[u8]) -> Option<Descriptor> {
        let setup = Setup::new(request).ok()?;
        let (kind, index) = (setup.descriptor_type(), setup.descriptor_index());

        let user = self.tables.user.and_then(|pointer| pointer.table());
        if let Some(found) = user.and_then(|table| table.find(kind, index)) {
            return Some(found);
        }
        if let Some(found) = self.tables.builtin.find(kind, index) {
            return Some(found);
        }
        if self.in_bootloader() {
            None
        } else {
            self.user.descriptor(request)
        }
    }
}

/// Answers every callback like a driver built without it. Stands in for
/// whichever side cannot be reached in the current build or mode.
pub struct Silent;

impl UsbCallbacks for Silent {
    fn setup(&mut self, _request: &[u8]) -> u8 {
        0
    }
}
