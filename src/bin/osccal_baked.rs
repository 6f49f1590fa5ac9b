//! Calibrate the RC oscillator and bake the result into the bootloader
//!
//! Flashed as the application. Page 0 is scratch space while the bootloader
//! is rewritten, so the program proper starts in page 1.

#![cfg_attr(target_arch = "avr", no_std, no_main)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

#[cfg(not(target_arch = "avr"))]
fn main() {}

#[cfg(target_arch = "avr")]
mod firmware {
    use panic_halt as _;

    use meiosis::calibration::persist::{store_and_halt, BakedStore};
    use meiosis::calibration::{Calibrator, UsbFrameMeter};
    use meiosis::config;
    use meiosis::hal::delay::CycleDelay;
    use meiosis::hal::flash::Spm;
    use meiosis::hal::osccal::Osccal;
    use meiosis::hal::reset::jump;
    use meiosis::hal::watchdog::Watchdog;

    meiosis::startup!("rjmp __init\n.balign 64, 0xff", osccal_main);

    extern "C" {
        static __data_load_end: u8;
    }

    #[no_mangle]
    extern "C" fn osccal_main(_mcusr: u8) -> ! {
        let mut calibrator =
            Calibrator::new(Osccal::new(), UsbFrameMeter::new(), CycleDelay::new(), config::TRIM_LAYOUT);
        let value = calibrator.run();

        let program_end = unsafe { core::ptr::addr_of!(__data_load_end) as u16 };
        let flash = unsafe { Spm::steal() };
        let mut store = BakedStore::new(flash, Watchdog::new(), program_end, config::OSCCAL_IO_ADDR);

        // Reset vector now leads to the bootloader, which loads the value itself
        store_and_halt(&mut store, value, || unsafe { jump(0, 0) })
    }
}
