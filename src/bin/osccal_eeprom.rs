//! Calibrate the RC oscillator and keep the result in EEPROM
//!
//! The bootloader loads it on every entry. Halts when done.

#![cfg_attr(target_arch = "avr", no_std, no_main)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

#[cfg(not(target_arch = "avr"))]
fn main() {}

#[cfg(target_arch = "avr")]
mod firmware {
    use panic_halt as _;

    use meiosis::calibration::persist::{store_and_halt, EepromStore};
    use meiosis::calibration::{Calibrator, UsbFrameMeter};
    use meiosis::config;
    use meiosis::hal::delay::CycleDelay;
    use meiosis::hal::eeprom::Eep;
    use meiosis::hal::osccal::Osccal;

    meiosis::startup!("", osccal_main);

    #[no_mangle]
    extern "C" fn osccal_main(_mcusr: u8) -> ! {
        let mut calibrator =
            Calibrator::new(Osccal::new(), UsbFrameMeter::new(), CycleDelay::new(), config::TRIM_LAYOUT);
        let value = calibrator.run();

        let mut store = EepromStore::new(Eep::new(), config::EEPROM_OSCCAL);
        store_and_halt(&mut store, value, || loop {})
    }
}
