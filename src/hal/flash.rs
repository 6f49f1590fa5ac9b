//! Self-programming flash primitive
//!
//! Pages are erased to 0xff and programmed from a one-page buffer that is
//! filled a word at a time. Programming can only clear bits, so a page is
//! erased before it is written.

use embedded_hal::watchdog::Watchdog;

use crate::isa::ERASED;

pub trait FlashDevice {
    /// `Infallible` on silicon; simulated parts use it to cut power
    type Error;

    const PAGE_SIZE: u16;
    const FLASH_SIZE: u32;

    fn read_byte(&self, addr: u16) -> u8;

    fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }

    /// Store a word into the page buffer at the offset `addr` has in its page
    fn fill_word(&mut self, addr: u16, word: u16) -> Result<(), Self::Error>;

    fn erase_page(&mut self, addr: u16) -> Result<(), Self::Error>;

    /// Program the page containing `addr` from the page buffer, which is
    /// blank again afterwards.
    fn write_page(&mut self, addr: u16) -> Result<(), Self::Error>;

    /// Fuse and lock bytes: 0 low fuse, 1 lock, 2 extended fuse, 3 high fuse
    fn read_fuse(&self, index: u16) -> u8;

    /// Signature row: bytes 0, 2 and 4 are the device signature
    fn read_signature(&self, index: u16) -> u8;

    fn page_of(addr: u16) -> u16 {
        addr & !(Self::PAGE_SIZE - 1)
    }

    /// First byte past the end of flash, wrapped to 16 bits on 64 KiB parts
    fn top() -> u16 {
        Self::FLASH_SIZE as u16
    }
}

/// Erase the page at `addr` and program it with `word(flash, offset)` for
/// every word offset in the page.
///
/// The watchdog is fed before the erase and before the write so a timeout
/// never lands between the two. Erased words are left out of the buffer.
pub fn rewrite_page<F, W, S>(flash: &mut F, watchdog: &mut W, addr: u16, mut word: S) -> Result<(), F::Error>
where
    F: FlashDevice,
    W: Watchdog,
    S: FnMut(&F, u16) -> u16,
{
    let page = F::page_of(addr);
    watchdog.feed();
    flash.erase_page(page)?;

    let mut offset = 0;
    while offset < F::PAGE_SIZE {
        let value = word(flash, offset);
        if value != ERASED {
            flash.fill_word(page + offset, value)?;
        }
        offset += 2;
    }

    watchdog.feed();
    flash.write_page(page)
}

/// Erase one page with the watchdog fed first
pub fn erase_page<F: FlashDevice, W: Watchdog>(flash: &mut F, watchdog: &mut W, addr: u16) -> Result<(), F::Error> {
    watchdog.feed();
    flash.erase_page(F::page_of(addr))
}

#[cfg(target_arch = "avr")]
pub use self::avr::{ProgMem, Spm};

#[cfg(target_arch = "avr")]
mod avr {
    use super::FlashDevice;
    use crate::config;
    use core::arch::asm;
    use core::convert::Infallible;

    const SPMEN: u8 = 0x01;
    const PGERS: u8 = 0x02;
    const PGWRT: u8 = 0x04;
    const RFLB: u8 = 0x08;
    const CTPB: u8 = 0x10;
    const RSIG: u8 = 0x20;

    /// SPMCSR in I/O space
    const SPMCSR: u8 = 0x37;

    fn lpm_byte(addr: u16) -> u8 {
        let value: u8;
        unsafe {
            asm!("lpm {value}, Z", value = out(reg) value, in("Z") addr);
        }
        value
    }

    /// Read-only view of program memory, for tables kept in flash
    #[derive(Clone, Copy, Default)]
    pub struct ProgMem;

    impl ProgMem {
        pub fn read_byte(&self, addr: u16) -> u8 {
            lpm_byte(addr)
        }
    }

    /// The SPM unit of the running part
    pub struct Spm {
        _private: (),
    }

    impl Spm {
        /// # Safety
        ///
        /// Only one handle may exist, and the caller must not erase the page
        /// it is executing from.
        pub unsafe fn steal() -> Self {
            Self { _private: () }
        }

        #[inline(always)]
        fn spm(command: u8, addr: u16, data: u16) {
            // The CPU halts during erase and write on parts without RWW
            unsafe {
                asm!(
                    "movw r0, {data}",
                    "out {spmcsr}, {command}",
                    "spm",
                    "clr r1",
                    data = in(reg_pair) data,
                    command = in(reg) command,
                    spmcsr = const SPMCSR,
                    in("Z") addr,
                );
            }
        }

        #[inline(always)]
        fn lpm(command: u8, addr: u16) -> u8 {
            let value: u8;
            unsafe {
                asm!(
                    "out {spmcsr}, {command}",
                    "lpm {value}, Z",
                    command = in(reg) command,
                    spmcsr = const SPMCSR,
                    value = out(reg) value,
                    in("Z") addr,
                );
            }
            value
        }
    }

    impl FlashDevice for Spm {
        type Error = Infallible;

        const PAGE_SIZE: u16 = config::PAGE_SIZE;
        const FLASH_SIZE: u32 = config::FLASH_SIZE;

        fn read_byte(&self, addr: u16) -> u8 {
            lpm_byte(addr)
        }

        fn fill_word(&mut self, addr: u16, word: u16) -> Result<(), Infallible> {
            Self::spm(SPMEN, addr, word);
            Ok(())
        }

        fn erase_page(&mut self, addr: u16) -> Result<(), Infallible> {
            Self::spm(PGERS | SPMEN, addr, 0);
            Ok(())
        }

        fn write_page(&mut self, addr: u16) -> Result<(), Infallible> {
            Self::spm(PGWRT | SPMEN, addr, 0);
            // Leave a clean buffer for the next page
            Self::spm(CTPB | SPMEN, addr, 0);
            Ok(())
        }

        fn read_fuse(&self, index: u16) -> u8 {
            Self::lpm(RFLB | SPMEN, index)
        }

        fn read_signature(&self, index: u16) -> u8 {
            Self::lpm(RSIG | SPMEN, index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimFlash, SimWatchdog};

    #[test]
    fn rewrite_replaces_the_whole_page() {
        let mut flash = SimFlash::<1024, 64>::new();
        let mut watchdog = SimWatchdog::default();
        flash.load(0x40, &[0x00; 64]);

        rewrite_page(&mut flash, &mut watchdog, 0x46, |_, offset| if offset < 4 { 0x1234 } else { ERASED })
            .unwrap();

        assert_eq!(flash.read_word(0x40), 0x1234);
        assert_eq!(flash.read_word(0x42), 0x1234);
        assert!(flash.bytes()[0x44..0x80].iter().all(|&b| b == 0xff));
        assert_eq!(watchdog.feeds, 2);
        assert_eq!(flash.mutations, 2);
    }

    #[test]
    fn source_words_can_come_from_flash() {
        let mut flash = SimFlash::<1024, 64>::new();
        let mut watchdog = SimWatchdog::default();
        flash.load_words(0x100, &[0xaaaa, 0xbbbb]);

        rewrite_page(&mut flash, &mut watchdog, 0, |f, offset| f.read_word(0x100 + offset)).unwrap();
        assert_eq!(&flash.bytes()[..4], &[0xaa, 0xaa, 0xbb, 0xbb]);
        assert_eq!(SimFlash::<1024, 64>::page_of(0x7f), 0x40);
    }
}
