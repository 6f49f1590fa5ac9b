//! Busy-wait delays calibrated from the configured CPU clock

pub use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::config::CPU_FREQ_HZ;

/// Cycles spent in one iteration of the spin loop
pub(crate) const LOOP_CYCLES: u32 = 4;

const LOOPS_PER_US: u32 = {
    let loops = CPU_FREQ_HZ / 1_000_000 / LOOP_CYCLES;
    if loops == 0 {
        1
    } else {
        loops
    }
};

/// Burn `loops` iterations of the calibrated spin loop
#[inline(always)]
pub(crate) fn spin(loops: u32) {
    for _ in 0..loops {
        #[cfg(target_arch = "avr")]
        avr_device::asm::nop();
        #[cfg(not(target_arch = "avr"))]
        core::hint::spin_loop();
    }
}

pub struct CycleDelay {
    _private: (),
}

impl CycleDelay {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for CycleDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayUs<u8> for CycleDelay {
    fn delay_us(&mut self, us: u8) {
        spin(us as u32 * LOOPS_PER_US);
    }
}

impl DelayMs<u8> for CycleDelay {
    fn delay_ms(&mut self, ms: u8) {
        for _ in 0..ms {
            spin(1000 * LOOPS_PER_US);
        }
    }
}
