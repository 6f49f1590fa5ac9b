//! The bootloader image
//!
//! Sits at the top of flash with its configuration trailer in the last six
//! bytes. Every reset enters here; unless the reset cause asks for the
//! bootloader it jumps straight on to the application. The application
//! reuses the USB driver through `__boot_usbInit` and `__boot_usbPoll`.

#![cfg_attr(target_arch = "avr", no_std, no_main)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

#[cfg(not(target_arch = "avr"))]
fn main() {}

#[cfg(target_arch = "avr")]
mod firmware {
    use panic_halt as _;

    use meiosis::bootloader::command::CommandProcessor;
    use meiosis::bootloader::config_block::{self, ConfigBlock};
    use meiosis::bootloader::descriptor::{self, Table, UserPointer};
    use meiosis::bootloader::dispatch::{Dispatch, Silent, Tables};
    use meiosis::bootloader::{decide, BootController, Mode, ModeFlag, ResetCause};
    use meiosis::config::{self, CAPABILITIES, USB_IDENTITY};
    use meiosis::hal::eeprom::Eep;
    use meiosis::hal::flash::{ProgMem, Spm};
    use meiosis::hal::osccal::Osccal;
    use meiosis::hal::reset::{jump, restart, Gpior2};
    use meiosis::hal::sram;
    use meiosis::hal::usb::{UserCallbacks, UsbDriver, VUsb};
    use meiosis::hal::watchdog::Watchdog;

    // Word 1 becomes `OUT OSCCAL, r16` behind a baked `LDI r16, value`
    meiosis::startup!("rjmp __init\nout 0x31, r16", meiosis_main);

    #[used]
    #[link_section = ".trailer"]
    static TRAILER: [u8; config_block::LEN as usize] = ConfigBlock::current().to_bytes();

    const BUILTIN_LEN: usize = descriptor::builtin_len(&USB_IDENTITY, &CAPABILITIES);

    #[used]
    #[link_section = ".progmem.data"]
    static BUILTIN: [u8; BUILTIN_LEN] = descriptor::builtin(&USB_IDENTITY, &CAPABILITIES);

    fn tables(progmem: &ProgMem) -> Tables<'_> {
        Tables {
            user: Some(UserPointer::new(progmem, config::USER_DESCRIPTOR_PTR)),
            // Flash address of a progmem static
            builtin: Table::builtin(progmem, BUILTIN.as_ptr() as u16),
        }
    }

    #[no_mangle]
    extern "C" fn meiosis_main(mcusr: u8) -> ! {
        // Sole owners of GPIOR2 and the SPM unit
        let (mode, flash) = unsafe { (ModeFlag::new(Gpior2::steal()), Spm::steal()) };
        let mut controller = BootController::new(
            VUsb::new(),
            Watchdog::new(),
            mode,
            CommandProcessor::new(flash, Eep::new()).with_data_space(sram::read),
            Osccal::new(),
            CAPABILITIES,
        );

        let progmem = ProgMem;
        let cause = ResetCause::from_mcusr(mcusr);
        let served = decide(cause) == Mode::Bootloader;
        let cause = match controller.run(cause, &mut Silent, tables(&progmem)) {
            Ok(cause) => cause,
            Err(never) => match never {},
        };
        if served {
            // The application gets a fresh .bss; the next pass sees the
            // exit cause and comes back through here
            unsafe { restart(cause.to_mcusr()) }
        }
        // A watchdog reset leaves the timer running; the application starts clean
        let (_, mut watchdog, ..) = controller.release();
        watchdog.disable();
        unsafe { jump(config::USER_TRAMPOLINE, cause.to_mcusr()) }
    }

    /// `usbInit` for the application, which shares this driver
    #[export_name = "__boot_usbInit"]
    extern "C" fn boot_usb_init() {
        VUsb::new().init();
    }

    /// `usbPoll` for the application. The mode flag is clear, so every
    /// callback goes to the application as its capability word allows.
    #[export_name = "__boot_usbPoll"]
    extern "C" fn boot_usb_poll() {
        let mode = unsafe { ModeFlag::new(Gpior2::steal()) };
        let progmem = ProgMem;
        let (mut bootloader, mut user) = (Silent, UserCallbacks);
        let mut dispatch = Dispatch::new(&mode, CAPABILITIES, &mut bootloader, &mut user, tables(&progmem));
        VUsb::new().poll(&mut dispatch);
    }
}
