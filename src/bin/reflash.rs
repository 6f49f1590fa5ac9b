//! Install a new bootloader over the running one
//!
//! The new image is appended at build time from `MEIOSIS_IMAGE`. Page 1 is
//! left as scratch space and the installer starts at page 2.

#![cfg_attr(target_arch = "avr", no_std, no_main)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

#[cfg(not(target_arch = "avr"))]
fn main() {}

#[cfg(target_arch = "avr")]
mod firmware {
    use panic_halt as _;

    use meiosis::hal::flash::Spm;
    use meiosis::hal::reset::jump;
    use meiosis::hal::usb::VUsb;
    use meiosis::hal::watchdog::Watchdog;
    use meiosis::reflash::Installer;

    meiosis::startup!("rjmp __init\n.zero 126", reflash_main);

    const IMAGE_LEN: usize = include_bytes!(env!("MEIOSIS_IMAGE_PATH")).len();

    #[used]
    #[link_section = ".progmem.data"]
    static IMAGE: [u8; IMAGE_LEN] = *include_bytes!(env!("MEIOSIS_IMAGE_PATH"));

    #[no_mangle]
    extern "C" fn reflash_main(_mcusr: u8) -> ! {
        // Off the bus until the new bootloader enumerates
        VUsb::new().disconnect();

        let start = IMAGE.as_ptr() as u16;
        let flash = unsafe { Spm::steal() };
        let mut installer = Installer::new(flash, Watchdog::new(), start, start + IMAGE_LEN as u16);
        match installer.run() {
            Ok(_) => unsafe { jump(0, 0) },
            // Refused before touching flash; nothing sensible left to run
            Err(_) => loop {},
        }
    }
}
