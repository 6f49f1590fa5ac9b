//! Debug console
//!
//! Only the `debug` feature pulls it in. On AVR the console bit-bangs 8N1
//! out of PB1 with interrupts off; host builds print to stdout.

use core::convert::Infallible;

use ufmt::{uDisplay, uWrite, Formatter};

/// Emit a line on the debug console when built with `debug`
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug")]
        {
            let _ = ufmt::uwriteln!(&mut $crate::logger::Console::new(), $($arg)*);
        }
    };
}

pub struct Console {
    _private: (),
}

impl Console {
    pub fn new() -> Self {
        Self { _private: () }
    }

    #[cfg(target_arch = "avr")]
    pub fn write_byte(&mut self, byte: u8) {
        self::avr::transmit(byte);
    }

    #[cfg(not(target_arch = "avr"))]
    pub fn write_byte(&mut self, byte: u8) {
        #[cfg(test)]
        std::print!("{}", byte as char);
        #[cfg(not(test))]
        let _ = byte;
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl uWrite for Console {
    type Error = Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Infallible> {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Formats a word as `0x` and four upper case hex digits
pub struct Hex(pub u16);

impl uDisplay for Hex {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        const HEX_CHARS: [u8; 16] = *b"0123456789ABCDEF";
        let mut digits = *b"0x0000";
        for (i, slot) in digits[2..].iter_mut().enumerate() {
            *slot = HEX_CHARS[(self.0 >> (12 - 4 * i) & 0xf) as usize];
        }
        // Only ASCII went in
        match core::str::from_utf8(&digits) {
            Ok(s) => f.write_str(s),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(target_arch = "avr")]
mod avr {
    use crate::config::CPU_FREQ_HZ;
    use crate::hal::delay::{spin, LOOP_CYCLES};
    use avr_device::attiny85::PORTB;

    const TX: u8 = 1 << 1;
    const BAUD: u32 = 57_600;
    const BIT_LOOPS: u32 = CPU_FREQ_HZ / BAUD / LOOP_CYCLES;

    fn line(high: bool) {
        unsafe {
            let p = PORTB::ptr();
            (*p).ddrb.modify(|r, w| w.bits(r.bits() | TX));
            if high {
                (*p).portb.modify(|r, w| w.bits(r.bits() | TX));
            } else {
                (*p).portb.modify(|r, w| w.bits(r.bits() & !TX));
            }
        }
    }

    pub(super) fn transmit(byte: u8) {
        avr_device::interrupt::free(|_| {
            line(false);
            spin(BIT_LOOPS);
            for bit in 0..8 {
                line(byte & (1 << bit) != 0);
                spin(BIT_LOOPS);
            }
            line(true);
            spin(BIT_LOOPS);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;

    struct Buf(String);

    impl uWrite for Buf {
        type Error = Infallible;

        fn write_str(&mut self, s: &str) -> Result<(), Infallible> {
            self.0.push_str(s);
            Ok(())
        }
    }

    #[test]
    fn hex_words() {
        let mut buf = Buf(String::new());
        ufmt::uwrite!(&mut buf, "{} {}", Hex(0x1e93), Hex(0x000b)).unwrap();
        assert_eq!(buf.0, "0x1E93 0x000B");
    }
}
