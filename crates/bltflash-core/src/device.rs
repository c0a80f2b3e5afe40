//! Device driver adapter and watchdog traits
//!
//! The engine never touches flash registers itself. Everything it needs from
//! the hardware goes through [`FlashDriver`], implemented once per silicon
//! family, and through [`Watchdog`], which keeps the device from resetting
//! while long loops run.
//!
//! All driver calls are synchronous: a program or erase call returns only
//! once the hardware has finished (or failed). Whether the adapter polls a
//! busy flag, waits on an interrupt or applies a timeout is its own business.

use core::fmt::Debug;

/// Raw flash access for one hardware family
///
/// Addresses are absolute (as seen by the CPU), not offsets into flash.
///
/// # Example
///
/// ```ignore
/// use bltflash_core::device::FlashDriver;
///
/// struct Msc;
///
/// impl FlashDriver for Msc {
///     type Error = MscStatus;
///
///     fn erase_unit(&mut self, addr: u32) -> Result<(), MscStatus> {
///         msc_erase_page(addr)
///     }
///
///     fn program_word(&mut self, addr: u32, word: u32) -> Result<(), MscStatus> {
///         msc_write_word(addr, word)
///     }
///
///     fn read(&self, addr: u32, buf: &mut [u8]) {
///         let src = unsafe { core::slice::from_raw_parts(addr as *const u8, buf.len()) };
///         buf.copy_from_slice(src);
///     }
/// }
/// ```
pub trait FlashDriver {
    /// Driver-specific failure reported by erase/program operations
    type Error: Debug;

    /// Enable the flash controller for writing
    fn init(&mut self) {}

    /// Disable the flash controller for writing
    fn deinit(&mut self) {}

    /// Erase one physical erase unit starting at `addr`
    fn erase_unit(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// Program one 32-bit word at a word-aligned `addr`
    fn program_word(&mut self, addr: u32, word: u32) -> Result<(), Self::Error>;

    /// Copy flash contents starting at `addr` into `buf`
    ///
    /// Flash is memory mapped on the targets this engine runs on, so reads
    /// cannot fail.
    fn read(&self, addr: u32, buf: &mut [u8]);

    /// Read a little-endian 32-bit word at `addr`
    fn read_word(&self, addr: u32) -> u32 {
        let mut word = [0u8; 4];
        self.read(addr, &mut word);
        u32::from_le_bytes(word)
    }

    /// Read a byte at `addr`
    fn read_byte(&self, addr: u32) -> u8 {
        let mut byte = [0u8; 1];
        self.read(addr, &mut byte);
        byte[0]
    }
}

/// Liveness hook called at bounded intervals inside long loops
///
/// The engine calls [`Watchdog::service`] once per byte copied into a write
/// block, once per word programmed, once per erase unit and once per sector
/// visited during a layout lookup.
pub trait Watchdog {
    /// Service (kick) the watchdog
    fn service(&mut self);
}

/// Watchdog that does nothing, for targets without one and host tooling
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn service(&mut self) {}
}

impl<W: Watchdog + ?Sized> Watchdog for &mut W {
    fn service(&mut self) {
        (**self).service()
    }
}
