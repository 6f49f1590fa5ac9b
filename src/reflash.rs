//! Replacing the bootloader in the field
//!
//! The installer is flashed like any application, with a new bootloader
//! image appended. It runs in three phases and each one recomputes what it
//! needs from flash, so after a power loss at any point the next reset lands
//! back in the installer or in an intact bootloader that starts it again.
//!
//! ```text
//! page 0   reset vector; erased while the installer owns the part
//! page 1   scratch: rjmp installer, calibration words, old page count
//! page 2   installer entry
//! ```

use embedded_hal::watchdog::Watchdog;

use crate::bootloader::config_block::pages_before;
use crate::hal::flash::{erase_page, rewrite_page};
use crate::hal::FlashDevice;
use crate::isa::{self, ERASED};
use crate::trace;

/// Byte offsets within the scratch page
const CALIBRATION: u16 = 2;
const OLD_PAGES: u16 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallError<E> {
    Flash(E),
    /// The appended image has no pages, would overlap the installer, or is
    /// not as long as its trailer says
    ImageDoesNotFit,
}

pub struct Installer<F, W> {
    flash: F,
    watchdog: W,
    image_start: u16,
    image_end: u16,
}

impl<F, W> Installer<F, W>
where
    F: FlashDevice,
    W: Watchdog,
{
    /// `image_start..image_end` holds the new bootloader, trailer included
    pub fn new(flash: F, watchdog: W, image_start: u16, image_end: u16) -> Self {
        Self { flash, watchdog, image_start, image_end }
    }

    pub fn release(self) -> (F, W) {
        (self.flash, self.watchdog)
    }

    pub fn scratch() -> u16 {
        F::PAGE_SIZE
    }

    pub fn entry() -> u16 {
        2 * F::PAGE_SIZE
    }

    fn start_for(pages: u8) -> u16 {
        (F::FLASH_SIZE - pages as u32 * F::PAGE_SIZE as u32) as u16
    }

    /// Where the new bootloader goes, checked before anything is erased
    pub fn target(&self) -> Result<u16, InstallError<F::Error>> {
        let pages = pages_before(&self.flash, self.image_end) as u32;
        let bytes = pages * F::PAGE_SIZE as u32;
        // The page below the bootloader stays free for the application slots
        if pages == 0 || bytes + (F::PAGE_SIZE as u32) > F::FLASH_SIZE {
            return Err(InstallError::ImageDoesNotFit);
        }
        // The trailer has to end up in the last bytes of flash
        if self.image_end.wrapping_sub(self.image_start) as u32 != bytes {
            return Err(InstallError::ImageDoesNotFit);
        }
        let start = F::FLASH_SIZE - bytes;
        if start - (F::PAGE_SIZE as u32) < self.image_end as u32 {
            return Err(InstallError::ImageDoesNotFit);
        }
        Ok(start as u16)
    }

    /// Reset still jumps into the old bootloader
    pub fn needs_preserve(&self) -> bool {
        isa::is_rjmp(self.flash.read_word(0))
    }

    /// Save what outlives the old bootloader into scratch, then erase page 0
    /// so reset slides into scratch and on to the installer.
    pub fn preserve(&mut self) -> Result<(), F::Error> {
        let pages = pages_before(&self.flash, F::top());
        let old_start = Self::start_for(pages);
        let scratch = Self::scratch();
        let entry = isa::rjmp(scratch, Self::entry());
        trace!("reflash: old bootloader at {}", crate::logger::Hex(old_start));

        rewrite_page(&mut self.flash, &mut self.watchdog, scratch, |flash, at| match at {
            0 => entry,
            CALIBRATION => flash.read_word(old_start),
            4 => flash.read_word(old_start + 2),
            OLD_PAGES => pages as u16,
            _ => ERASED,
        })?;
        erase_page(&mut self.flash, &mut self.watchdog, 0)
    }

    /// Program the new bootloader below the top of flash. Its first two
    /// words are the saved calibration load, the rest comes from the image.
    pub fn install(&mut self, start: u16) -> Result<(), F::Error> {
        let scratch = Self::scratch();
        let (image, image_len) = (self.image_start, (self.image_end - self.image_start) as u32);
        let mut page = start as u32;
        while page < F::FLASH_SIZE {
            let offset = (page - start as u32) as u16;
            rewrite_page(&mut self.flash, &mut self.watchdog, page as u16, |flash, at| {
                let at = offset + at;
                if at < 4 {
                    flash.read_word(scratch + CALIBRATION + at)
                } else if (at as u32) < image_len {
                    flash.read_word(image + at)
                } else {
                    ERASED
                }
            })?;
            page += F::PAGE_SIZE as u32;
        }
        Ok(())
    }

    /// Clear every jump that could lead back into the installer and point
    /// reset at the new bootloader.
    pub fn finish(&mut self, start: u16) -> Result<(), F::Error> {
        let page = F::PAGE_SIZE;
        let below = start - page;
        erase_page(&mut self.flash, &mut self.watchdog, below)?;

        let old_pages = self.flash.read_byte(Self::scratch() + OLD_PAGES);
        let old_below = Self::start_for(old_pages).wrapping_sub(page);
        if old_below < below {
            erase_page(&mut self.flash, &mut self.watchdog, old_below)?;
        }

        let reset = isa::rjmp(0, start);
        rewrite_page(&mut self.flash, &mut self.watchdog, 0, |_, at| if at == 0 { reset } else { ERASED })
    }

    /// All phases from whatever state flash is in; returns the new
    /// bootloader's start.
    pub fn run(&mut self) -> Result<u16, InstallError<F::Error>> {
        let start = self.target()?;
        if self.needs_preserve() {
            self.preserve().map_err(InstallError::Flash)?;
        }
        trace!("reflash: new bootloader at {}", crate::logger::Hex(start));
        self.install(start).map_err(InstallError::Flash)?;
        self.finish(start).map_err(InstallError::Flash)?;
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{boot, PowerLoss, SimFlash, SimWatchdog};

    type Flash = SimFlash<8192, 64>;

    const PAGE: u16 = 64;
    const TOP: u16 = 8192;
    const IMAGE_START: u16 = 0x0200;
    const CALIBRATION_LOAD: [u16; 2] = isa::osccal_restore(0x77, 0x31);

    /// Bootloader body words, distinct per image and position
    fn body(tag: u16, len: u16) -> Vec<u8> {
        (0..len / 2).flat_map(|i| (tag | (i & 0x0fff)).to_le_bytes()).collect()
    }

    fn with_trailer(mut image: Vec<u8>, pages: u8) -> Vec<u8> {
        let len = image.len();
        image[len - 4] = pages;
        image
    }

    /// Part running an old bootloader of `old_pages` pages with the
    /// installer flashed as the application, carrying a new image of
    /// `new_pages` pages.
    fn part(old_pages: u8, new_pages: u8) -> (Flash, u16) {
        let mut flash = Flash::new();
        let old_start = TOP - old_pages as u16 * PAGE;

        let mut old = with_trailer(body(0x1000, old_pages as u16 * PAGE), old_pages);
        old[..4].copy_from_slice(&[
            CALIBRATION_LOAD[0] as u8,
            (CALIBRATION_LOAD[0] >> 8) as u8,
            CALIBRATION_LOAD[1] as u8,
            (CALIBRATION_LOAD[1] >> 8) as u8,
        ]);
        flash.load(old_start, &old);
        flash.load_words(old_start - 4, &[isa::rjmp(old_start - 4, 2 * PAGE)]);

        flash.load_words(0, &[isa::rjmp(0, old_start)]);
        flash.load(PAGE, &[0; 64]);
        flash.load(2 * PAGE, &body(0x2000, IMAGE_START - 2 * PAGE));

        let mut new = with_trailer(body(0x3000, new_pages as u16 * PAGE), new_pages);
        new[..4].copy_from_slice(&[0x01, 0xc0, 0x01, 0xbf]);
        flash.load(IMAGE_START, &new);
        (flash, IMAGE_START + new.len() as u16)
    }

    fn installer(flash: Flash, image_end: u16) -> Installer<Flash, SimWatchdog> {
        Installer::new(flash, SimWatchdog::default(), IMAGE_START, image_end)
    }

    #[test]
    fn smaller_bootloader_replaces_the_old_one() {
        let (flash, end) = part(32, 24);
        let mut inst = installer(flash, end);
        assert_eq!(inst.run(), Ok(0x1a00));
        let (flash, watchdog) = inst.release();

        assert_eq!(flash.read_word(0x1a00), CALIBRATION_LOAD[0]);
        assert_eq!(flash.read_word(0x1a02), CALIBRATION_LOAD[1]);
        assert_eq!(flash.read_word(0x1a04), 0x3002);
        assert_eq!(flash.read_byte(TOP - 4), 24);
        assert_eq!(boot(&flash), 0x1a00);

        // Application slots of both bootloaders are gone
        let blank = |page: u16| flash.bytes()[page as usize..(page + PAGE) as usize].iter().all(|&b| b == 0xff);
        assert!(blank(0x1a00 - PAGE));
        assert!(blank(0x1800 - PAGE));

        assert_eq!(flash.mutations, 3 + 2 * 24 + 4);
        assert_eq!(watchdog.feeds, flash.mutations);
    }

    #[test]
    fn larger_bootloader_keeps_the_calibration() {
        let (flash, end) = part(24, 32);
        let mut inst = installer(flash, end);
        assert_eq!(inst.run(), Ok(0x1800));
        let (flash, _) = inst.release();

        assert_eq!(flash.read_word(0x1800), CALIBRATION_LOAD[0]);
        assert_eq!(flash.read_word(0x1a00), 0x3100);
        assert_eq!(flash.read_byte(TOP - 4), 32);
        assert_eq!(boot(&flash), 0x1800);
        // The old slots were inside the new bootloader; no extra erase
        assert_eq!(flash.mutations, 3 + 2 * 32 + 3);
    }

    #[test]
    fn image_that_does_not_fit_is_refused() {
        // 127 pages would reach down over the installer, 0 pages is no image
        for pages in [127, 0] {
            let (mut flash, end) = part(32, 24);
            flash.load(end - 4, &[pages]);
            let mut inst = installer(flash, end);
            assert_eq!(inst.target(), Err(InstallError::ImageDoesNotFit));
            assert_eq!(inst.run(), Err(InstallError::ImageDoesNotFit));
            assert_eq!(inst.release().0.mutations, 0);
        }
    }

    #[test]
    fn image_length_must_match_its_trailer() {
        for len in [23 * PAGE, 24 * PAGE + PAGE] {
            let (mut flash, _) = part(32, 24);
            flash.load(IMAGE_START, &with_trailer(body(0x3000, len), 24));
            let mut inst = installer(flash, IMAGE_START + len);
            assert_eq!(inst.run(), Err(InstallError::ImageDoesNotFit), "length {}", len);
            assert_eq!(inst.release().0.mutations, 0);
        }
    }

    #[test]
    fn power_loss_at_every_step_resumes() {
        let (flash, end) = part(32, 24);
        let old_bootloader = flash.bytes()[0x1800..].to_vec();
        let expected = {
            let mut inst = installer(flash, end);
            inst.run().unwrap();
            inst.release().0
        };

        for cut in 0..expected.mutations {
            let (mut flash, _) = part(32, 24);
            flash.cut_after(cut);
            let mut inst = installer(flash, end);
            assert_eq!(inst.run(), Err(InstallError::Flash(PowerLoss)), "cut {}", cut);

            let (mut flash, _) = inst.release();
            flash.power_cycle();
            match boot(&flash) {
                // Straight back into the installer through scratch
                landing if landing == Installer::<Flash, SimWatchdog>::entry() => {}
                // Old bootloader untouched; its application slot starts the installer
                0x1800 => assert_eq!(&flash.bytes()[0x1800..], &old_bootloader[..], "cut {}", cut),
                landing => panic!("cut {} boots into {:#x}", cut, landing),
            }

            let mut inst = installer(flash, end);
            assert_eq!(inst.run(), Ok(0x1a00), "cut {}", cut);
            assert!(inst.release().0.bytes() == expected.bytes(), "cut {}", cut);
        }
    }
}
