//! Data EEPROM

pub trait Eeprom {
    type Error;

    fn read(&self, addr: u16) -> u8;

    /// Start writing `value`; `WouldBlock` while a previous write is busy
    fn write(&mut self, addr: u16, value: u8) -> nb::Result<(), Self::Error>;
}

#[cfg(target_arch = "avr")]
pub use self::avr::Eep;

#[cfg(target_arch = "avr")]
mod avr {
    use super::Eeprom;
    use avr_device::attiny85::EEPROM;
    use core::convert::Infallible;

    const EERE: u8 = 1 << 0;
    const EEPE: u8 = 1 << 1;
    const EEMPE: u8 = 1 << 2;

    pub struct Eep {
        _private: (),
    }

    impl Eep {
        pub fn new() -> Self {
            Self { _private: () }
        }

        fn busy() -> bool {
            unsafe { (*EEPROM::ptr()).eecr.read().bits() & EEPE != 0 }
        }
    }

    impl Default for Eep {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Eeprom for Eep {
        type Error = Infallible;

        fn read(&self, addr: u16) -> u8 {
            while Self::busy() {}
            unsafe {
                let p = EEPROM::ptr();
                (*p).eear.write(|w| w.bits(addr));
                (*p).eecr.write(|w| w.bits(EERE));
                (*p).eedr.read().bits()
            }
        }

        fn write(&mut self, addr: u16, value: u8) -> nb::Result<(), Infallible> {
            if Self::busy() {
                return Err(nb::Error::WouldBlock);
            }
            avr_device::interrupt::free(|_| unsafe {
                let p = EEPROM::ptr();
                (*p).eear.write(|w| w.bits(addr));
                (*p).eedr.write(|w| w.bits(value));
                // Timed sequence: EEPE within four cycles of EEMPE
                (*p).eecr.write(|w| w.bits(EEMPE));
                (*p).eecr.write(|w| w.bits(EEMPE | EEPE));
            });
            Ok(())
        }
    }
}
