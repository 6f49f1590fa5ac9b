//! Internal RC oscillator trim

pub trait Oscillator {
    fn trim(&self) -> u8;
    fn set_trim(&mut self, value: u8);
}

#[cfg(target_arch = "avr")]
pub use self::avr::Osccal;

#[cfg(target_arch = "avr")]
mod avr {
    use super::Oscillator;
    use avr_device::attiny85::CPU;

    pub struct Osccal {
        _private: (),
    }

    impl Osccal {
        pub fn new() -> Self {
            Self { _private: () }
        }
    }

    impl Default for Osccal {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Oscillator for Osccal {
        fn trim(&self) -> u8 {
            unsafe { (*CPU::ptr()).osccal.read().bits() }
        }

        fn set_trim(&mut self, value: u8) {
            unsafe { (*CPU::ptr()).osccal.write(|w| w.bits(value)) }
        }
    }
}
