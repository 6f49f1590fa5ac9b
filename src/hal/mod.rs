//! Hardware access
//!
//! Each module defines the trait the rest of the crate is written against and,
//! on AVR targets only, its implementation over the ATtiny85 registers.

pub mod delay;
pub mod eeprom;
pub mod flash;
pub mod osccal;
pub mod reset;
pub mod sram;
pub mod usb;
pub mod watchdog;

pub use eeprom::Eeprom;
pub use flash::FlashDevice;
pub use osccal::Oscillator;
pub use reset::PreservedRegister;
pub use usb::{UsbCallbacks, UsbDriver};
