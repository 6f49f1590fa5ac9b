//! Move a calibration kept in EEPROM into the bootloader
//!
//! Same layout as `osccal-baked`, without measuring anything. With no value
//! in EEPROM the factory trim is baked.

#![cfg_attr(target_arch = "avr", no_std, no_main)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

#[cfg(not(target_arch = "avr"))]
fn main() {}

#[cfg(target_arch = "avr")]
mod firmware {
    use panic_halt as _;

    use meiosis::calibration::persist::{restore_from_eeprom, store_and_halt, BakedStore};
    use meiosis::config;
    use meiosis::hal::eeprom::Eep;
    use meiosis::hal::flash::Spm;
    use meiosis::hal::osccal::Osccal;
    use meiosis::hal::reset::jump;
    use meiosis::hal::watchdog::Watchdog;
    use meiosis::hal::Oscillator;

    meiosis::startup!("rjmp __init\n.balign 64, 0xff", migrate_main);

    extern "C" {
        static __data_load_end: u8;
    }

    #[no_mangle]
    extern "C" fn migrate_main(_mcusr: u8) -> ! {
        let mut osc = Osccal::new();
        restore_from_eeprom(&Eep::new(), config::EEPROM_OSCCAL, &mut osc);
        let value = osc.trim();

        let program_end = unsafe { core::ptr::addr_of!(__data_load_end) as u16 };
        let flash = unsafe { Spm::steal() };
        let mut store = BakedStore::new(flash, Watchdog::new(), program_end, config::OSCCAL_IO_ADDR);
        store_and_halt(&mut store, value, || unsafe { jump(0, 0) })
    }
}
