//! Watchdog that counts how often it is serviced

use bltflash_core::device::Watchdog;

/// Counts [`Watchdog::service`] calls
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingWatchdog {
    services: u64,
}

impl CountingWatchdog {
    /// Create a watchdog with a zero count
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the watchdog was serviced
    pub fn count(&self) -> u64 {
        self.services
    }
}

impl Watchdog for CountingWatchdog {
    fn service(&mut self) {
        self.services += 1;
    }
}
