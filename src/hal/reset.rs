//! Reset bookkeeping and jumps between the images sharing the flash

/// A general purpose I/O register. Its contents survive a reset and the
/// runtime's clearing of `.bss`.
pub trait PreservedRegister {
    fn read(&self) -> u8;
    fn write(&mut self, value: u8);

    fn set_bits(&mut self, mask: u8) {
        let value = self.read();
        self.write(value | mask);
    }

    fn clear_bits(&mut self, mask: u8) {
        let value = self.read();
        self.write(value & !mask);
    }
}

#[cfg(target_arch = "avr")]
pub use self::avr::{jump, restart, Gpior2};

#[cfg(target_arch = "avr")]
mod avr {
    use super::PreservedRegister;
    use core::arch::asm;

    /// GPIOR2 in I/O space
    const GPIOR2: u8 = 0x13;

    pub struct Gpior2 {
        _private: (),
    }

    impl Gpior2 {
        /// # Safety
        ///
        /// GPIOR2 belongs to the bootloader and the USB driver; only one
        /// handle may exist.
        pub unsafe fn steal() -> Self {
            Self { _private: () }
        }
    }

    impl PreservedRegister for Gpior2 {
        fn read(&self) -> u8 {
            let value: u8;
            unsafe { asm!("in {v}, {io}", v = out(reg) value, io = const GPIOR2) };
            value
        }

        fn write(&mut self, value: u8) {
            unsafe { asm!("out {io}, {v}", v = in(reg) value, io = const GPIOR2) };
        }
    }

    /// Continue at the byte address `target` with `r24` loaded, the way a
    /// C `main(uint8_t)` expects its argument.
    ///
    /// # Safety
    ///
    /// `target` must hold code that does not return here.
    pub unsafe fn jump(target: u16, r24: u8) -> ! {
        asm!(
            "ijmp",
            in("Z") target >> 1,
            in("r24") r24,
            options(noreturn),
        )
    }

    /// Go through the runtime init again, `.data` and `.bss` included, and
    /// re-enter the program with `r24` standing in for MCUSR.
    ///
    /// # Safety
    ///
    /// Only for programs built with [`startup!`](crate::startup); nothing on
    /// the stack or in RAM survives.
    pub unsafe fn restart(r24: u8) -> ! {
        asm!("rjmp __reinit", in("r24") r24, options(noreturn))
    }
}
