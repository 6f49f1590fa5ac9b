//! Reset code for the programs in this crate
//!
//! They link without the C runtime, so each one places its own reset code
//! in `.vectors` with [`startup!`](crate::startup). Interrupts stay off in
//! all of them; the only vector is reset.

/// Emit the reset vector and runtime init, then jump to `$entry`.
///
/// `$vectors` is assembled at address 0 and must fall through or jump to
/// `__init`. MCUSR is read and cleared before anything else and passed to
/// `$entry` in r24, so `$entry` is an `extern "C" fn(u8) -> !`.
///
/// `__reinit` repeats everything after the MCUSR read with whatever r24
/// holds; see [`restart`](crate::hal::reset::restart).
#[macro_export]
macro_rules! startup {
    ($vectors:literal, $entry:ident) => {
        core::arch::global_asm!(concat!(
            ".section .vectors, \"ax\", @progbits\n",
            ".global __vectors\n",
            "__vectors:\n",
            $vectors,
            "\n",
            "__init:\n",
            "in r24, 0x34\n",
            "clr r1\n",
            "out 0x34, r1\n",
            ".global __reinit\n",
            "__reinit:\n",
            "clr r1\n",
            // .data from flash
            "ldi r26, lo8(__data_start)\n",
            "ldi r27, hi8(__data_start)\n",
            "ldi r30, lo8(__data_load_start)\n",
            "ldi r31, hi8(__data_load_start)\n",
            "rjmp 2f\n",
            "1: lpm r0, Z+\n",
            "st X+, r0\n",
            "2: cpi r26, lo8(__data_end)\n",
            "ldi r18, hi8(__data_end)\n",
            "cpc r27, r18\n",
            "brne 1b\n",
            // .bss
            "ldi r26, lo8(__bss_start)\n",
            "ldi r27, hi8(__bss_start)\n",
            "rjmp 4f\n",
            "3: st X+, r1\n",
            "4: cpi r26, lo8(__bss_end)\n",
            "ldi r18, hi8(__bss_end)\n",
            "cpc r27, r18\n",
            "brne 3b\n",
            "rjmp ",
            stringify!($entry),
            "\n",
        ));
    };
}

