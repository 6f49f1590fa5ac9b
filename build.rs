use std::env;
use std::fs;
use std::path::PathBuf;

/// Bootloader size in pages unless overridden with `MEIOSIS_BOOTLOADER_PAGES`.
const DEFAULT_BOOTLOADER_PAGES: u32 = 32;

/// Application callbacks the bootloader's driver calls in user mode
const USER_CALLBACKS: [&str; 8] = [
    "user_usbFunctionSetup",
    "user_usbFunctionRead",
    "user_usbFunctionWrite",
    "user_usbFunctionWriteOut",
    "user_usbRxUserHook",
    "user_usbResetHook",
    "user_usbSetAddressHook",
    "user_usbDriverDescriptor",
];

fn main() {
    println!("cargo:rerun-if-env-changed=MEIOSIS_BOOTLOADER_PAGES");
    println!("cargo:rerun-if-env-changed=MEIOSIS_F_CPU");
    println!("cargo:rerun-if-env-changed=MEIOSIS_IMAGE");
    println!("cargo:rerun-if-env-changed=MEIOSIS_USBDRV_DIR");

    let pages = env::var("MEIOSIS_BOOTLOADER_PAGES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(DEFAULT_BOOTLOADER_PAGES);
    let f_cpu = env::var("MEIOSIS_F_CPU")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(16_500_000);

    // Pass CPU frequency and bootloader size for config.rs
    println!("cargo:rustc-env=MCU_FREQ_HZ={}", f_cpu);
    println!("cargo:rustc-env=MEIOSIS_BOOTLOADER_PAGES={}", pages);

    // Bootloader image carried by `reflash`: a raw binary of the top of
    // flash, trailer included. Without one the installer gets an empty
    // trailer and refuses to run.
    let image = match env::var("MEIOSIS_IMAGE") {
        Ok(path) => {
            println!("cargo:rerun-if-changed={}", path);
            PathBuf::from(path)
        }
        Err(_) => {
            let out = PathBuf::from(env::var("OUT_DIR").unwrap());
            let placeholder = out.join("no-image.bin");
            fs::write(&placeholder, [0u8; 6]).unwrap();
            placeholder
        }
    };
    println!("cargo:rustc-env=MEIOSIS_IMAGE_PATH={}", image.display());

    // Host builds (unit tests) stop here
    let target = env::var("TARGET").unwrap();
    if !target.contains("avr") {
        return;
    }

    // ATtiny85: 8 KiB flash, 64 byte pages
    let flash_size: u32 = 8192;
    let page_size: u32 = 64;
    let bootloader_start = flash_size - pages * page_size;

    println!("cargo:rustc-link-arg=-mmcu=attiny85");
    println!("cargo:rustc-link-arg=-nostartfiles");

    // The USB driver is prebuilt from its C and assembly sources
    if let Ok(dir) = env::var("MEIOSIS_USBDRV_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
        println!("cargo:rustc-link-lib=static=usbdrv");
    }

    // The bootloader lives at the top of flash, its trailer in the last bytes
    println!(
        "cargo:rustc-link-arg-bin=meiosis=-Wl,--section-start=.text=0x{:x}",
        bootloader_start
    );
    println!(
        "cargo:rustc-link-arg-bin=meiosis=-Wl,--section-start=.trailer=0x{:x}",
        flash_size - 6
    );

    // Slots for the application's callbacks, one jump each, counted down
    // from just below its descriptor pointer at start - 6
    for (i, symbol) in USER_CALLBACKS.iter().enumerate() {
        println!(
            "cargo:rustc-link-arg-bin=meiosis=-Wl,--defsym={}=0x{:x}",
            symbol,
            bootloader_start - 8 - 2 * i as u32
        );
    }

    // The one-shot programs run from the user area
    for bin in ["osccal-baked", "osccal-eeprom", "osccal-from-eeprom", "reflash"] {
        println!("cargo:rustc-link-arg-bin={}=-Wl,--section-start=.text=0x0", bin);
    }

    println!(
        "cargo:warning=Building for ATtiny85 at {}Hz, bootloader at 0x{:04x}",
        f_cpu, bootloader_start
    );
}
