//! RC oscillator calibration against USB frame timing
//!
//! A low-speed host sends a keep-alive every millisecond, which is the only
//! accurate clock available. The trim is found by binary search and then
//! refined over its neighbors (Atmel AVR054 §4.1).

pub mod persist;

use embedded_hal::blocking::delay::DelayUs;

use crate::config;
use crate::hal::Oscillator;
use crate::trace;

/// Lower-range setting that runs at the same speed as [`RANGE2_SWITCH`]
const RANGE1_SWITCH: u8 = 96;
const RANGE2_SWITCH: u8 = 128;

/// How the OSCCAL register maps onto frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimLayout {
    /// One monotonic range over 0x00..=0xff
    Full,
    /// Only 0x00..=0x7f is usable
    Low,
    /// Two overlapping monotonic ranges, 0x00..=0x7f and 0x80..=0xff
    DualRange,
}

/// Signed deviation of the oscillator from the frame period.
///
/// Zero means within tolerance; positive means the oscillator runs slow and
/// the trim must go up.
pub trait FrameMeter {
    fn measure(&mut self) -> i16;
}

pub struct Calibrator<O, M, D> {
    osc: O,
    meter: M,
    delay: D,
    layout: TrimLayout,
}

impl<O, M, D> Calibrator<O, M, D>
where
    O: Oscillator,
    M: FrameMeter,
    D: DelayUs<u8>,
{
    pub fn new(osc: O, meter: M, delay: D, layout: TrimLayout) -> Self {
        Self { osc, meter, delay, layout }
    }

    /// Tune the oscillator and return the trim it was left at.
    ///
    /// Never fails: when no setting is exact the closest one found wins.
    pub fn run(&mut self) -> u8 {
        match self.layout {
            TrimLayout::Full => {
                self.calibrate_range(0x00, 0xff);
            }
            TrimLayout::Low => {
                self.calibrate_range(0x00, 0x7f);
            }
            TrimLayout::DualRange => {
                let low = self.calibrate_range(0x00, 0x7f);
                let low_trim = self.osc.trim();
                let high = self.calibrate_range(0x80, 0xff);
                trace!("osccal low {} high {}", low, high);
                if low < high {
                    self.adjust(low_trim);
                }
            }
        }
        self.osc.trim()
    }

    pub fn release(self) -> (O, M, D) {
        (self.osc, self.meter, self.delay)
    }

    /// Search `min..=max`, leave the best trim applied and return its
    /// absolute deviation.
    fn calibrate_range(&mut self, min: u8, max: u8) -> u16 {
        let mut step = ((max as u16 - min as u16 + 1) / 2) as u8;
        let mut trim = min + step;

        loop {
            self.adjust(trim);
            let delta = self.meter.measure();
            if delta == 0 {
                return 0;
            }
            step /= 2;
            if step == 0 {
                break;
            }
            if delta > 0 {
                trim += step;
            } else {
                trim -= step;
            }
        }

        // Two either side, clipped to the range
        let lo = if trim > min + 2 { trim - 2 } else { min };
        let hi = if trim < max - 2 { trim + 2 } else { max };

        let mut best = trim;
        let mut best_deviation = u16::MAX;
        for candidate in lo..=hi {
            self.adjust(candidate);
            let delta = self.meter.measure();
            if delta == 0 {
                return 0;
            }
            let deviation = delta.unsigned_abs();
            if deviation <= best_deviation {
                best_deviation = deviation;
                best = candidate;
            }
        }

        self.adjust(best);
        best_deviation
    }

    /// Move OSCCAL to `wanted` without jumping the frequency by more than
    /// the maximum step. On dual range parts a change of range goes through
    /// the switch points, which run at the same speed.
    fn adjust(&mut self, wanted: u8) {
        let mut curr = self.osc.trim();
        let mut target = wanted;

        if self.layout == TrimLayout::DualRange {
            if curr < 0x80 && wanted >= 0x80 {
                target = RANGE1_SWITCH;
            } else if curr >= 0x80 && wanted < 0x80 {
                target = RANGE2_SWITCH;
            }
        }

        while curr != wanted {
            curr = if curr == target {
                target = wanted;
                RANGE1_SWITCH + RANGE2_SWITCH - curr
            } else if curr < target {
                curr + (target - curr).min(config::OSCCAL_MAX_STEP)
            } else {
                curr - (curr - target).min(config::OSCCAL_MAX_STEP)
            };
            self.osc.set_trim(curr);
            self.delay.delay_us(config::OSCCAL_SETTLE_US);
        }
    }
}

#[cfg(target_arch = "avr")]
pub use self::avr::UsbFrameMeter;

#[cfg(target_arch = "avr")]
mod avr {
    use super::FrameMeter;
    use crate::config::CPU_FREQ_HZ;

    extern "C" {
        /// Counts 7-cycle loops between two keep-alive pulses
        fn usbMeasureFrameLength() -> u16;
    }

    const EXPECTED: i16 = (CPU_FREQ_HZ / 1000 / 7) as i16;

    /// Loop counts this close to the ideal are as good as it gets
    const TOLERANCE: i16 = 1;

    pub struct UsbFrameMeter {
        _private: (),
    }

    impl UsbFrameMeter {
        pub fn new() -> Self {
            Self { _private: () }
        }
    }

    impl Default for UsbFrameMeter {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FrameMeter for UsbFrameMeter {
        fn measure(&mut self) -> i16 {
            let measured = avr_device::interrupt::free(|_| unsafe { usbMeasureFrameLength() });
            let delta = EXPECTED.saturating_sub(measured.min(i16::MAX as u16) as i16);
            if delta.abs() <= TOLERANCE {
                0
            } else {
                delta
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dual_range_frequency, rc_oscillator};
    use embedded_hal_mock::delay::MockNoop;

    fn linear(trim: u8) -> i16 {
        trim as i16
    }

    fn doubled(trim: u8) -> i16 {
        2 * trim as i16
    }

    #[test]
    fn finds_exact_setting_in_full_range() {
        for target in [0i16, 1, 77, 128, 200, 255] {
            let (osc, meter) = rc_oscillator(0x40, target, linear);
            let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::Full);
            assert_eq!(cal.run() as i16, target);
        }
    }

    #[test]
    fn measurement_count_is_bounded() {
        // log2(256) binary steps plus five neighbors
        for target in 0..=510i16 {
            let (osc, meter) = rc_oscillator(0x80, target, doubled);
            let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::Full);
            cal.run();
            let (_, meter, _) = cal.release();
            assert!(meter.calls <= 13, "target {} took {} measurements", target, meter.calls);
        }
    }

    #[test]
    fn neighbor_search_keeps_the_closest_and_latest() {
        // Odd target between two even frequencies: 50 and 51 are both one off
        let (osc, meter) = rc_oscillator(0x80, 101, doubled);
        let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::Full);
        assert_eq!(cal.run(), 51);

        for target in 0..=510i16 {
            let (osc, meter) = rc_oscillator(0x80, target, doubled);
            let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::Full);
            let trim = cal.run();
            let achieved = (target - doubled(trim)).abs();
            let optimum = (0..=255u8).map(|t| (target - doubled(t)).abs()).min().unwrap();
            assert_eq!(achieved, optimum, "target {}", target);
        }
    }

    #[test]
    fn low_layout_stays_in_the_low_range() {
        let (osc, meter) = rc_oscillator(0x00, 300, linear);
        let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::Low);
        assert_eq!(cal.run(), 0x7f);
        let (osc, _, _) = cal.release();
        assert!(osc.writes.iter().all(|&w| w <= 0x7f));
    }

    #[test]
    fn dual_range_picks_the_better_half() {
        // Only reachable in the upper range
        let (osc, meter) = rc_oscillator(0x20, 140, dual_range_frequency);
        let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::DualRange);
        assert_eq!(dual_range_frequency(cal.run()), 140);

        // Reachable in both; the lower range result is exact so the upper
        // one cannot beat it
        let (osc, meter) = rc_oscillator(0x20, 40, dual_range_frequency);
        let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::DualRange);
        assert_eq!(cal.run(), 40);
    }

    #[test]
    fn frequency_never_jumps_more_than_max_step() {
        for target in (0..=223i16).step_by(7) {
            let (osc, meter) = rc_oscillator(0x00, target, dual_range_frequency);
            let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::DualRange);
            cal.run();
            let (osc, _, _) = cal.release();
            let mut previous = dual_range_frequency(0x00);
            for &write in &osc.writes {
                let frequency = dual_range_frequency(write);
                assert!((frequency - previous).abs() <= config::OSCCAL_MAX_STEP as i16);
                previous = frequency;
            }
        }
    }

    #[test]
    fn range_change_from_a_switch_point() {
        let (osc, meter) = rc_oscillator(RANGE1_SWITCH, 0, dual_range_frequency);
        let mut cal = Calibrator::new(osc, meter, MockNoop::new(), TrimLayout::DualRange);
        cal.adjust(0xc0);
        let (osc, _, _) = cal.release();
        assert_eq!(osc.writes, [RANGE2_SWITCH, 0xa0, 0xc0]);
    }
}
