//! V-USB Meiosis: a self-calibrating USB bootloader for small AVR parts
//!
//! The library holds everything the bootloader and its companion programs
//! share. Hardware access lives in [`hal`]; everything above it is written
//! against traits so it runs in host tests unchanged.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

pub mod bootloader;
pub mod calibration;
pub mod config;
pub mod hal;
pub mod isa;
pub mod logger;
pub mod protocol;
pub mod reflash;
#[cfg(target_arch = "avr")]
pub mod runtime;

#[cfg(test)]
pub mod testing;
