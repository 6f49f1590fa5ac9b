//! Data space: registers, I/O and SRAM share one address range

/// Byte at `addr` in data space. Reading some I/O registers clears flags.
#[cfg(target_arch = "avr")]
pub fn read(addr: u16) -> u8 {
    unsafe { core::ptr::read_volatile(addr as usize as *const u8) }
}
