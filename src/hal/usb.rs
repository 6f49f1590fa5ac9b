//! Boundary to the bit-banged low-speed USB driver
//!
//! The driver itself is linked in as an object; it polls the bus and calls
//! back into [`UsbCallbacks`] for everything above the packet level.

/// Returned from `setup` when the data stage goes through `read` or `write`
pub const NO_MSG: u8 = 0xff;

/// Where a descriptor table entry was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    UserTable,
    Builtin,
    UserCallback,
}

/// A descriptor in flash, sent by the driver straight from program memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub origin: Origin,
    pub addr: u16,
    pub len: u16,
}

/// Driver callbacks. Defaults answer like a driver built without them.
pub trait UsbCallbacks {
    /// SETUP stage; returns the reply length or [`NO_MSG`]
    fn setup(&mut self, request: &[u8]) -> u8;

    /// IN data stage; returns the bytes placed in `buf`
    fn read(&mut self, _buf: &mut [u8]) -> u8 {
        0
    }

    /// OUT data stage; 1 when the transfer is complete, 0 for more, 0xff to stall
    fn write(&mut self, _data: &[u8]) -> u8 {
        1
    }

    /// OUT data on an interrupt/bulk endpoint
    fn write_out(&mut self, _data: &[u8]) {}

    /// Every received DATA packet before decoding
    fn rx(&mut self, _data: &[u8]) {}

    /// Bus reset began (`true`) or ended (`false`)
    fn reset(&mut self, _active: bool) {}

    fn set_address(&mut self) {}

    /// GET_DESCRIPTOR for a descriptor the driver does not have statically
    fn descriptor(&mut self, _request: &[u8]) -> Option<Descriptor> {
        None
    }
}

pub trait UsbDriver {
    /// Start the driver; the device drops off the bus first so the host
    /// enumerates it again.
    fn init(&mut self);

    /// Mask the driver's pin-change interrupt and its configuration
    fn shutdown(&mut self);

    /// Handle whatever the bus delivered since the last call
    fn poll(&mut self, callbacks: &mut dyn UsbCallbacks);
}

#[cfg(target_arch = "avr")]
pub use self::vusb::{UserCallbacks, VUsb};

#[cfg(target_arch = "avr")]
mod vusb {
    use super::{Descriptor, Origin, UsbCallbacks, UsbDriver, NO_MSG};
    use crate::config;
    use crate::hal::delay::{CycleDelay, DelayMs};
    use avr_device::attiny85::{CPU, EXINT, PORTB};
    use core::ptr::NonNull;
    use core::slice;

    extern "C" {
        fn usbInit();
        fn usbPoll();
        static mut usbMsgPtr: u16;
    }

    // Slots the application fills with jumps to its own callbacks; the
    // linker places each symbol below the bootloader.
    extern "C" {
        fn user_usbFunctionSetup(data: *const u8) -> u8;
        fn user_usbFunctionRead(data: *mut u8, len: u8) -> u8;
        fn user_usbFunctionWrite(data: *const u8, len: u8) -> u8;
        fn user_usbFunctionWriteOut(data: *const u8, len: u8);
        fn user_usbRxUserHook(data: *const u8, len: u8);
        fn user_usbResetHook(active: u8);
        fn user_usbSetAddressHook();
        fn user_usbDriverDescriptor(request: *const u8) -> u8;
    }

    const DMINUS: u8 = 1 << config::USB_DMINUS_BIT;

    /// Callbacks for the duration of one `usbPoll`
    static mut ACTIVE: Option<NonNull<dyn UsbCallbacks>> = None;

    fn with_active<T>(idle: T, f: impl FnOnce(&mut dyn UsbCallbacks) -> T) -> T {
        // Single threaded and only set while usbPoll runs
        unsafe {
            match ACTIVE {
                Some(mut callbacks) => f(callbacks.as_mut()),
                None => idle,
            }
        }
    }

    pub struct VUsb {
        _private: (),
    }

    impl VUsb {
        pub fn new() -> Self {
            Self { _private: () }
        }

        /// Pull D- low, which the host sees as the device going away
        pub fn disconnect(&mut self) {
            unsafe {
                (*PORTB::ptr()).ddrb.modify(|r, w| w.bits(r.bits() | DMINUS));
            }
        }
    }

    impl Default for VUsb {
        fn default() -> Self {
            Self::new()
        }
    }

    impl UsbDriver for VUsb {
        fn init(&mut self) {
            // Long enough for the host to notice
            self.disconnect();
            let mut delay = CycleDelay::new();
            for _ in 0..250 {
                delay.delay_ms(1u8);
                avr_device::asm::wdr();
            }
            unsafe {
                (*PORTB::ptr()).ddrb.modify(|r, w| w.bits(r.bits() & !DMINUS));
                usbInit();
            }
        }

        fn shutdown(&mut self) {
            unsafe {
                (*EXINT::ptr()).gimsk.write(|w| w.bits(0));
                // Interrupt sense control lives in the low bits of MCUCR
                (*CPU::ptr()).mcucr.modify(|r, w| w.bits(r.bits() & !0x03));
            }
        }

        fn poll(&mut self, callbacks: &mut dyn UsbCallbacks) {
            unsafe {
                let callbacks: NonNull<dyn UsbCallbacks + '_> = NonNull::from(callbacks);
                ACTIVE = Some(core::mem::transmute(callbacks));
                usbPoll();
                ACTIVE = None;
            }
        }
    }

    /// The application linked against this driver.
    ///
    /// Only called while the mode flag is clear, and only for the callbacks
    /// its capability word declares.
    pub struct UserCallbacks;

    impl UsbCallbacks for UserCallbacks {
        fn setup(&mut self, request: &[u8]) -> u8 {
            unsafe { user_usbFunctionSetup(request.as_ptr()) }
        }

        fn read(&mut self, buf: &mut [u8]) -> u8 {
            unsafe { user_usbFunctionRead(buf.as_mut_ptr(), buf.len() as u8) }
        }

        fn write(&mut self, data: &[u8]) -> u8 {
            unsafe { user_usbFunctionWrite(data.as_ptr(), data.len() as u8) }
        }

        fn write_out(&mut self, data: &[u8]) {
            unsafe { user_usbFunctionWriteOut(data.as_ptr(), data.len() as u8) }
        }

        fn rx(&mut self, data: &[u8]) {
            unsafe { user_usbRxUserHook(data.as_ptr(), data.len() as u8) }
        }

        fn reset(&mut self, active: bool) {
            unsafe { user_usbResetHook(active as u8) }
        }

        fn set_address(&mut self) {
            unsafe { user_usbSetAddressHook() }
        }

        /// The application answers with a length and leaves the address
        /// in `usbMsgPtr`.
        fn descriptor(&mut self, request: &[u8]) -> Option<Descriptor> {
            let len = unsafe { user_usbDriverDescriptor(request.as_ptr()) };
            if len == 0 {
                return None;
            }
            Some(Descriptor { origin: Origin::UserCallback, addr: unsafe { usbMsgPtr }, len: len as u16 })
        }
    }

    /// SETUP data is followed by its CRC in the receive buffer
    #[no_mangle]
    extern "C" fn usbFunctionSetup(data: *const u8) -> u8 {
        with_active(0, |cb| cb.setup(unsafe { slice::from_raw_parts(data, 10) }))
    }

    #[no_mangle]
    extern "C" fn usbFunctionRead(data: *mut u8, len: u8) -> u8 {
        with_active(0, |cb| cb.read(unsafe { slice::from_raw_parts_mut(data, len as usize) }))
    }

    #[no_mangle]
    extern "C" fn usbFunctionWrite(data: *const u8, len: u8) -> u8 {
        with_active(NO_MSG, |cb| cb.write(unsafe { slice::from_raw_parts(data, len as usize) }))
    }

    #[no_mangle]
    extern "C" fn usbFunctionWriteOut(data: *const u8, len: u8) {
        with_active((), |cb| cb.write_out(unsafe { slice::from_raw_parts(data, len as usize) }))
    }

    #[no_mangle]
    extern "C" fn usbFunctionDescriptor(request: *const u8) -> u8 {
        with_active(0, |cb| match cb.descriptor(unsafe { slice::from_raw_parts(request, 8) }) {
            Some(descriptor) => {
                unsafe { usbMsgPtr = descriptor.addr };
                descriptor.len.min(0xff) as u8
            }
            None => 0,
        })
    }

    #[no_mangle]
    extern "C" fn usbResetHook(active: u8) {
        with_active((), |cb| cb.reset(active != 0))
    }

    #[no_mangle]
    extern "C" fn usbSetAddressHook() {
        with_active((), |cb| cb.set_address())
    }

    #[no_mangle]
    extern "C" fn usbRxUserHook(data: *const u8, len: u8) {
        with_active((), |cb| cb.rx(unsafe { slice::from_raw_parts(data, len as usize) }))
    }
}
