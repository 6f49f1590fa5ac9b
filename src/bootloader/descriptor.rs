//! Descriptor tables
//!
//! A table is a run of descriptors, each starting with its length and type,
//! ended by a zero length byte. A configuration descriptor is followed by
//! its interfaces and endpoints and spans its total length.

use crate::config::{Capabilities, UsbIdentity};
use crate::hal::usb::{Descriptor, Origin};
use crate::hal::FlashDevice;

pub const DEVICE: u8 = 1;
pub const CONFIGURATION: u8 = 2;
pub const STRING: u8 = 3;
pub const INTERFACE: u8 = 4;
pub const ENDPOINT: u8 = 5;

/// Tables are short; anything longer is erased or foreign flash
const MAX_RECORDS: u8 = 16;

const TRANSFER_INTERRUPT: u8 = 3;

/// Random access to the bytes a table lives in
pub trait ByteSource {
    fn byte_at(&self, addr: u16) -> u8;
}

impl<const N: usize> ByteSource for [u8; N] {
    fn byte_at(&self, addr: u16) -> u8 {
        self.get(addr as usize).copied().unwrap_or(0)
    }
}

impl ByteSource for &[u8] {
    fn byte_at(&self, addr: u16) -> u8 {
        self.get(addr as usize).copied().unwrap_or(0)
    }
}

/// Program memory seen through a flash device
pub struct FlashBytes<'a, F>(pub &'a F);

impl<F: FlashDevice> ByteSource for FlashBytes<'_, F> {
    fn byte_at(&self, addr: u16) -> u8 {
        self.0.read_byte(addr)
    }
}

#[cfg(target_arch = "avr")]
impl ByteSource for crate::hal::flash::ProgMem {
    fn byte_at(&self, addr: u16) -> u8 {
        self.read_byte(addr)
    }
}

#[derive(Clone, Copy)]
pub struct Table<'a> {
    source: &'a dyn ByteSource,
    base: u16,
    origin: Origin,
}

impl<'a> Table<'a> {
    pub fn builtin(source: &'a dyn ByteSource, base: u16) -> Self {
        Self { source, base, origin: Origin::Builtin }
    }

    /// The application's table, found through the pointer at `pointer_addr`.
    ///
    /// Absent when the pointer is null or erased, or the table is empty.
    pub fn user(source: &'a dyn ByteSource, pointer_addr: u16) -> Option<Self> {
        let base = u16::from_le_bytes([
            source.byte_at(pointer_addr),
            source.byte_at(pointer_addr.wrapping_add(1)),
        ]);
        if base == 0x0000 || base == 0xffff || source.byte_at(base) == 0 {
            return None;
        }
        Some(Self { source, base, origin: Origin::UserTable })
    }

    /// The `index`th descriptor of type `kind`
    pub fn find(&self, kind: u8, index: u8) -> Option<Descriptor> {
        let mut addr = self.base;
        let mut seen = 0;
        for _ in 0..MAX_RECORDS {
            let len = self.source.byte_at(addr);
            if len == 0 {
                return None;
            }
            let record = self.source.byte_at(addr.wrapping_add(1));
            let span = if record == CONFIGURATION {
                u16::from_le_bytes([
                    self.source.byte_at(addr.wrapping_add(2)),
                    self.source.byte_at(addr.wrapping_add(3)),
                ])
                .max(len as u16)
            } else {
                len as u16
            };
            if record == kind {
                if seen == index {
                    return Some(Descriptor { origin: self.origin, addr, len: span });
                }
                seen += 1;
            }
            addr = addr.wrapping_add(span);
        }
        None
    }
}

/// Where the application keeps the address of its table.
///
/// Resolved on every lookup: the host may erase and rewrite the page holding
/// the pointer or the table during a session.
#[derive(Clone, Copy)]
pub struct UserPointer<'a> {
    source: &'a dyn ByteSource,
    addr: u16,
}

impl<'a> UserPointer<'a> {
    pub fn new(source: &'a dyn ByteSource, addr: u16) -> Self {
        Self { source, addr }
    }

    pub fn table(&self) -> Option<Table<'a>> {
        Table::user(self.source, self.addr)
    }
}

/// Size of the table [`builtin`] generates
pub const fn builtin_len(identity: &UsbIdentity, caps: &Capabilities) -> usize {
    configuration_len(caps) as usize
        + 18
        + 4
        + string_len(identity.vendor_name)
        + string_len(identity.product_name)
        + 1
}

/// The bootloader's own descriptors: configuration, device, then the
/// language, vendor and product strings.
pub const fn builtin<const N: usize>(identity: &UsbIdentity, caps: &Capabilities) -> [u8; N] {
    let total = configuration_len(caps);
    let attributes = 0x80 | (identity.self_powered as u8) << 6 | (caps.remote_wake as u8) << 5;

    let mut t = Builder::<N>::new()
        .bytes(&[9, CONFIGURATION])
        .word(total)
        .bytes(&[1, 1, 0, attributes, identity.max_power_ma / 2])
        .bytes(&[9, INTERFACE, 0, 0, caps.intr_endpoints(), identity.interface_class, 0, 0, 0]);
    if caps.intr_endpoints() > 0 && caps.intr_in_endpoint {
        t = t.endpoint(0x81, identity.intr_poll_interval_ms);
    }
    if caps.intr_endpoints() > 0 && caps.intr_in_endpoint3 {
        t = t.endpoint(0x80 | identity.ep3_number, identity.intr_poll_interval_ms);
    }

    t.bytes(&[18, DEVICE, 0x10, 0x01, 0, 0, 0, 8])
        .word(identity.vendor_id)
        .word(identity.product_id)
        .word(identity.device_version)
        .bytes(&[1, 2, 0, 1])
        .bytes(&[4, STRING, 0x09, 0x04])
        .string(identity.vendor_name)
        .string(identity.product_name)
        .bytes(&[0])
        .buf
}

const fn configuration_len(caps: &Capabilities) -> u16 {
    9 + 9 + 7 * caps.intr_endpoints() as u16
}

const fn string_len(s: &str) -> usize {
    2 + 2 * s.len()
}

struct Builder<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Builder<N> {
    const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    const fn byte(mut self, b: u8) -> Self {
        if self.len < N {
            self.buf[self.len] = b;
        }
        self.len += 1;
        self
    }

    const fn bytes(mut self, bytes: &[u8]) -> Self {
        let mut i = 0;
        while i < bytes.len() {
            self = self.byte(bytes[i]);
            i += 1;
        }
        self
    }

    const fn word(self, w: u16) -> Self {
        self.byte(w as u8).byte((w >> 8) as u8)
    }

    const fn endpoint(self, address: u8, interval: u8) -> Self {
        self.bytes(&[7, ENDPOINT, address, TRANSFER_INTERRUPT, 8, 0, interval])
    }

    /// ASCII only; each byte becomes one UTF-16 code unit
    const fn string(self, s: &str) -> Self {
        let chars = s.as_bytes();
        let mut t = self.byte(string_len(s) as u8).byte(STRING);
        let mut i = 0;
        while i < chars.len() {
            t = t.byte(chars[i]).byte(0);
            i += 1;
        }
        t
    }
}
