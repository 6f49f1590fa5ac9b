//! The handful of AVR instructions the bootloader chain writes into flash
//!
//! Flash addresses are byte addresses; instruction words are little endian.

/// Value of an erased flash word
pub const ERASED: u16 = 0xffff;

const RJMP: u16 = 0xc000;
const RJMP_MASK: u16 = 0xf000;
const LDI: u16 = 0xe000;
const LDI_MASK: u16 = 0xf000;
const OUT: u16 = 0xb800;

/// `RJMP` placed at `from` that lands on `to`.
///
/// The 12-bit offset wraps around the 8 KiB address space, which is how
/// parts up to 8 KiB reach every address from page 0.
pub const fn rjmp(from: u16, to: u16) -> u16 {
    let words = to.wrapping_sub(from).wrapping_sub(2) / 2;
    RJMP | (words & 0x0fff)
}

pub const fn is_rjmp(opcode: u16) -> bool {
    opcode & RJMP_MASK == RJMP
}

/// Destination of an `RJMP` located at `at` on a part with `flash_size` bytes
pub fn rjmp_target(at: u16, opcode: u16, flash_size: u32) -> Option<u16> {
    if !is_rjmp(opcode) {
        return None;
    }
    // Sign extend the 12-bit word offset
    let words = (((opcode & 0x0fff) << 4) as i16) >> 4;
    let target = at as i32 + 2 * (words as i32 + 1);
    Some(target.rem_euclid(flash_size as i32) as u16)
}

/// `LDI r<reg>, value`; `reg` must be one of r16..r31
pub const fn ldi(reg: u8, value: u8) -> u16 {
    let value = value as u16;
    LDI | ((value & 0xf0) << 4) | (((reg - 16) as u16 & 0x0f) << 4) | (value & 0x0f)
}

/// Immediate of an `LDI`, if `opcode` is one
pub const fn ldi_value(opcode: u16) -> Option<u8> {
    if opcode & LDI_MASK != LDI {
        return None;
    }
    Some((((opcode >> 4) & 0xf0) | (opcode & 0x0f)) as u8)
}

/// `OUT <io>, r<reg>`
pub const fn out(io: u8, reg: u8) -> u16 {
    let io = io as u16;
    OUT | ((reg as u16 & 0x1f) << 4) | (io & 0x0f) | ((io & 0x30) << 5)
}

/// The instruction pair that loads the oscillator calibration at reset
pub const fn osccal_restore(value: u8, osccal_io: u8) -> [u16; 2] {
    [ldi(16, value), out(osccal_io, 16)]
}
