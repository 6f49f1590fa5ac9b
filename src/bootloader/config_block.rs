//! Geometry and feature trailer in the last six bytes of flash
//!
//! ```text
//! top-6  geometry word (LE): bits 2:0 log2(page/16), bit 3 four-page erase,
//!        bits 15:4 bootloader start / 16
//! top-4  bootloader page count
//! top-3  USB interrupt vector number
//! top-2  capability word (LE)
//! ```

use crate::config::{self, Capabilities};
use crate::hal::FlashDevice;

pub const LEN: u16 = 6;

/// Offset of the page count from the end of an image
pub const PAGES_OFFSET: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigBlock {
    pub page_size: u16,
    pub four_page_erase: bool,
    pub bootloader_start: u16,
    pub bootloader_pages: u8,
    pub usb_intr_vector: u8,
    pub capabilities: Capabilities,
}

impl ConfigBlock {
    /// The block this build writes into its trailer
    pub const fn current() -> Self {
        Self {
            page_size: config::PAGE_SIZE,
            four_page_erase: config::FOUR_PAGE_ERASE,
            bootloader_start: config::BOOTLOADER_START,
            bootloader_pages: config::BOOTLOADER_PAGES,
            usb_intr_vector: config::USB_INTR_VECTOR,
            capabilities: config::CAPABILITIES,
        }
    }

    pub const fn geometry(&self) -> u16 {
        let mut shift = 0;
        while (16u16 << shift) < self.page_size {
            shift += 1;
        }
        shift | (self.four_page_erase as u16) << 3 | (self.bootloader_start & 0xfff0)
    }

    pub const fn to_bytes(&self) -> [u8; LEN as usize] {
        let geometry = self.geometry().to_le_bytes();
        let caps = self.capabilities.word().to_le_bytes();
        [geometry[0], geometry[1], self.bootloader_pages, self.usb_intr_vector, caps[0], caps[1]]
    }

    pub fn from_bytes(bytes: [u8; LEN as usize]) -> Self {
        let geometry = u16::from_le_bytes([bytes[0], bytes[1]]);
        Self {
            page_size: 16 << (geometry & 0x7),
            four_page_erase: geometry & 0x8 != 0,
            bootloader_start: geometry & 0xfff0,
            bootloader_pages: bytes[2],
            usb_intr_vector: bytes[3],
            capabilities: Capabilities::from_word(u16::from_le_bytes([bytes[4], bytes[5]])),
        }
    }

    /// Read the trailer that ends at `end` (the top of flash for the
    /// running bootloader, the end of the image for one being installed)
    pub fn read<F: FlashDevice>(flash: &F, end: u16) -> Self {
        let mut bytes = [0u8; LEN as usize];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = flash.read_byte(end.wrapping_sub(LEN) + i as u16);
        }
        Self::from_bytes(bytes)
    }

    /// Six byte reply to the host's configuration read: geometry word,
    /// capability word, then signature bytes 2 and 1.
    pub fn reply(&self, signature: [u8; 2]) -> [u8; 6] {
        let geometry = self.geometry().to_le_bytes();
        let caps = self.capabilities.word().to_le_bytes();
        [geometry[0], geometry[1], caps[0], caps[1], signature[1], signature[0]]
    }
}

/// Page count from the trailer ending at `end`
pub fn pages_before<F: FlashDevice>(flash: &F, end: u16) -> u8 {
    flash.read_byte(end.wrapping_sub(PAGES_OFFSET))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimFlash;

    #[test]
    fn trailer_bytes() {
        let block = ConfigBlock {
            page_size: 64,
            four_page_erase: false,
            bootloader_start: 0x1800,
            bootloader_pages: 32,
            usb_intr_vector: 1,
            capabilities: Capabilities::from_word(0x0680),
        };
        assert_eq!(block.geometry(), 0x1802);
        assert_eq!(block.to_bytes(), [0x02, 0x18, 32, 1, 0x80, 0x06]);
        assert_eq!(ConfigBlock::from_bytes(block.to_bytes()), block);
        assert_eq!(block.reply([0x93, 0x0b]), [0x02, 0x18, 0x80, 0x06, 0x0b, 0x93]);
    }

    #[test]
    fn four_page_erase_flag() {
        let block = ConfigBlock {
            page_size: 16,
            four_page_erase: true,
            bootloader_start: 0x3a00,
            ..ConfigBlock::current()
        };
        assert_eq!(block.geometry(), 0x3a08);
    }

    #[test]
    fn read_from_top_of_flash() {
        let mut flash = SimFlash::<8192, 64>::new();
        let block = ConfigBlock::current();
        flash.load(8192 - 6, &block.to_bytes());
        assert_eq!(ConfigBlock::read(&flash, 8192), block);
        assert_eq!(pages_before(&flash, 8192), config::BOOTLOADER_PAGES);
    }
}
