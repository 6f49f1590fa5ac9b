//! Watchdog timer
//!
//! The bootloader only ever feeds it; the reflash and calibration programs
//! feed it before each flash operation so a timeout can never land in the
//! middle of a page.

#[cfg(target_arch = "avr")]
pub use self::avr::Watchdog;

#[cfg(target_arch = "avr")]
mod avr {
    use avr_device::attiny85::WDT;

    const WDCE: u8 = 1 << 4;
    const WDE: u8 = 1 << 3;

    pub struct Watchdog {
        _private: (),
    }

    impl Watchdog {
        #[inline]
        pub fn new() -> Self {
            Self { _private: () }
        }

        /// Stop the timer. MCUSR.WDRF must already be clear or WDE stays set.
        #[inline]
        pub fn disable(&mut self) {
            avr_device::interrupt::free(|_| unsafe {
                let p = WDT::ptr();
                // Timed sequence: clear within four cycles of WDCE
                (*p).wdtcr.write(|w| w.bits(WDCE | WDE));
                (*p).wdtcr.write(|w| w.bits(0x00));
            });
        }
    }

    impl Default for Watchdog {
        fn default() -> Self {
            Self::new()
        }
    }

    impl embedded_hal::watchdog::Watchdog for Watchdog {
        #[inline]
        fn feed(&mut self) {
            avr_device::asm::wdr();
        }
    }
}
