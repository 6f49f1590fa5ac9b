//! Build configuration for the bootloader and its companion programs

use crate::calibration::TrimLayout;

/// CPU frequency in Hz
pub const CPU_FREQ_HZ: u32 = parse_u32(env!("MCU_FREQ_HZ"));

/// Self-programming page size in bytes
pub const PAGE_SIZE: u16 = 64;

/// Total flash size in bytes
pub const FLASH_SIZE: u32 = 8192;

/// Part erases four pages at once (ATtiny441/841/1634)
pub const FOUR_PAGE_ERASE: bool = false;

/// Pages occupied by the bootloader at the top of flash
pub const BOOTLOADER_PAGES: u8 = parse_u32(env!("MEIOSIS_BOOTLOADER_PAGES")) as u8;

/// First byte of the bootloader
pub const BOOTLOADER_START: u16 =
    (FLASH_SIZE - BOOTLOADER_PAGES as u32 * PAGE_SIZE as u32) as u16;

/// EEPROM address of the calibration byte
pub const EEPROM_OSCCAL: u16 = 0;

/// Load the stored calibration byte on every bootloader entry
pub const OSCCAL_FROM_EEPROM: bool = true;

/// I/O address of OSCCAL, used when encoding `OUT OSCCAL, r16`
pub const OSCCAL_IO_ADDR: u8 = 0x31;

/// Bit in GPIOR2 marking bootloader mode
pub const MODE_GPIOR_BIT: u8 = 0;

/// Bit in GPIOR2 the transport uses for interrupt-free operation
pub const IRQLESS_GPIOR_BIT: u8 = if SHARED_IRQ_FLAG { MODE_GPIOR_BIT } else { 1 };

pub const SHARED_IRQ_FLAG: bool = cfg!(feature = "shared-irq-flag");

/// Validate host-to-device commands with their CRC before touching flash.
///
/// Costs a few bytes. Leaving it out means a corrupted erase or write is
/// executed as received.
pub const INTEGRITY_CHECK: bool = cfg!(feature = "crc");

/// Interrupt vector number used by the transport (INT0)
pub const USB_INTR_VECTOR: u8 = 1;

/// PORTB bit wired to D-; D+ sits on INT0 (PB2)
pub const USB_DMINUS_BIT: u8 = 0;

/// Start of the application's jump slots just below the bootloader: the
/// reset entry at +0 and the USB interrupt entry at +2.
pub const USER_TRAMPOLINE: u16 = BOOTLOADER_START - 4;

/// Word holding the address of the application's descriptor table
pub const USER_DESCRIPTOR_PTR: u16 = BOOTLOADER_START - 6;

/// Lowest of the application's eight callback slots, which run up to the
/// descriptor pointer. `build.rs` binds the driver's `user_*` symbols here.
pub const USER_CALLBACK_SLOTS: u16 = BOOTLOADER_START - 22;

/// Device signature bytes 0..2
pub const SIGNATURE: [u8; 3] = [0x1e, 0x93, 0x0b];

/// ATtiny85 has two overlapping OSCCAL ranges
pub const TRIM_LAYOUT: TrimLayout = TrimLayout::DualRange;

/// Settle time after each OSCCAL write in microseconds
pub const OSCCAL_SETTLE_US: u8 = 5;

/// Largest OSCCAL change applied in one write
pub const OSCCAL_MAX_STEP: u8 = 32;

/// Transport features compiled into the bootloader.
///
/// The user application is linked against the same driver, so these must
/// match what it was built with; the host tool compares the capability word
/// before flashing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub count_sof: bool,
    pub check_data_toggling: bool,
    pub long_transfers: bool,
    pub suppress_intr_code: bool,
    pub flow_control: bool,
    pub remote_wake: bool,
    pub intr_in_endpoint: bool,
    pub intr_in_endpoint3: bool,
    pub fn_write: bool,
    pub fn_read: bool,
    pub fn_write_out: bool,
    pub rx_user_hook: bool,
    pub reset_hook: bool,
    pub set_address_hook: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        count_sof: false,
        check_data_toggling: false,
        long_transfers: false,
        suppress_intr_code: false,
        flow_control: false,
        remote_wake: false,
        intr_in_endpoint: false,
        intr_in_endpoint3: false,
        fn_write: false,
        fn_read: false,
        fn_write_out: false,
        rx_user_hook: false,
        reset_hook: false,
        set_address_hook: false,
    };

    /// Capability word as stored in the trailer and reported to the host
    pub const fn word(&self) -> u16 {
        (self.count_sof as u16) << 1
            | (self.check_data_toggling as u16) << 2
            | (self.long_transfers as u16) << 3
            | (self.suppress_intr_code as u16) << 4
            | (self.flow_control as u16) << 5
            | (self.remote_wake as u16) << 6
            | (self.intr_in_endpoint as u16) << 7
            | (self.intr_in_endpoint3 as u16) << 8
            | (self.fn_write as u16) << 9
            | (self.fn_read as u16) << 10
            | (self.fn_write_out as u16) << 11
            | (self.rx_user_hook as u16) << 12
            | (self.reset_hook as u16) << 13
            | (self.set_address_hook as u16) << 14
    }

    pub const fn from_word(word: u16) -> Self {
        Self {
            count_sof: bit(word, 1),
            check_data_toggling: bit(word, 2),
            long_transfers: bit(word, 3),
            suppress_intr_code: bit(word, 4),
            flow_control: bit(word, 5),
            remote_wake: bit(word, 6),
            intr_in_endpoint: bit(word, 7),
            intr_in_endpoint3: bit(word, 8),
            fn_write: bit(word, 9),
            fn_read: bit(word, 10),
            fn_write_out: bit(word, 11),
            rx_user_hook: bit(word, 12),
            reset_hook: bit(word, 13),
            set_address_hook: bit(word, 14),
        }
    }

    /// Number of interrupt-IN endpoints described in the configuration
    pub const fn intr_endpoints(&self) -> u8 {
        if self.suppress_intr_code {
            return 0;
        }
        self.intr_in_endpoint as u8 + self.intr_in_endpoint3 as u8
    }
}

pub const CAPABILITIES: Capabilities = Capabilities {
    intr_in_endpoint: true,
    fn_write: true,
    fn_read: true,
    ..Capabilities::NONE
};

/// USB identity of the bootloader's built-in descriptors
#[derive(Clone, Copy, Debug)]
pub struct UsbIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Major version is checked by the host tool
    pub device_version: u16,
    pub vendor_name: &'static str,
    pub product_name: &'static str,
    pub max_power_ma: u8,
    pub self_powered: bool,
    pub interface_class: u8,
    pub intr_poll_interval_ms: u8,
    pub ep3_number: u8,
}

pub const USB_IDENTITY: UsbIdentity = UsbIdentity {
    vendor_id: 0x16c0,
    product_id: 0x05dc,
    device_version: 0x0200,
    vendor_name: "vusb-meiosis",
    product_name: "vme",
    max_power_ma: 100,
    self_powered: false,
    interface_class: 0xff,
    intr_poll_interval_ms: 10,
    ep3_number: 3,
};

const fn bit(word: u16, n: u32) -> bool {
    word & (1 << n) != 0
}

const fn parse_u32(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}
