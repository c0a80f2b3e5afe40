//! Programming session state machine

use crate::config::TargetConfig;
use crate::device::{FlashDriver, Watchdog};
use crate::error::{Error, Result};
use crate::granularity::GranularityResolver;
use crate::layout::FlashLayout;

use super::block::{BlockRole, WriteBlock};
use super::checksum::{self, VectorTable};

/// Write block size used unless a target picks its own
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Where a programming session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing buffered
    Idle,
    /// At least one write block holds data that is not in flash yet
    Accumulating,
    /// `finalize()` has run; call `init()` to start over
    Finalized,
}

/// Flash programming engine
///
/// Owns the device driver, the watchdog and two write blocks: a general
/// one that follows the incoming data, and one for the boot block (the
/// block holding the vector table and checksum) which is only programmed
/// by [`finalize`](Self::finalize). An interrupted update therefore never
/// leaves a valid checksum on a half-written application.
///
/// A session looks like:
///
/// 1. [`init`](Self::init)
/// 2. any number of [`erase`](Self::erase) and [`write`](Self::write) calls
/// 3. [`write_checksum`](Self::write_checksum)
/// 4. [`finalize`](Self::finalize)
pub struct FlashEngine<D, W, const BLOCK_SIZE: usize = DEFAULT_BLOCK_SIZE> {
    target: TargetConfig,
    granularity: GranularityResolver,
    driver: D,
    watchdog: W,
    general: WriteBlock<BLOCK_SIZE>,
    boot: WriteBlock<BLOCK_SIZE>,
    finalized: bool,
}

impl<D: FlashDriver, W: Watchdog, const BLOCK_SIZE: usize> FlashEngine<D, W, BLOCK_SIZE> {
    /// Create an engine for `target`
    ///
    /// # Errors
    /// * `InvalidConfig` - If the target cannot be driven with this block size
    pub fn new(target: TargetConfig, driver: D, watchdog: W) -> Result<Self> {
        target.validate(BLOCK_SIZE)?;

        Ok(Self {
            granularity: GranularityResolver::new(target.granularity),
            target,
            driver,
            watchdog,
            general: WriteBlock::new(BlockRole::General),
            boot: WriteBlock::new(BlockRole::Boot),
            finalized: false,
        })
    }

    /// Start a programming session
    ///
    /// Enables the flash controller and forgets anything buffered by an
    /// earlier session that was never finalized.
    pub fn init(&mut self) {
        if self.general.is_active() || self.boot.is_active() {
            log::warn!("Discarding data buffered by an unfinished session");
        }

        self.driver.init();
        self.general.clear();
        self.boot.clear();
        self.finalized = false;
        log::debug!("Programming session started");
    }

    /// Current session state
    pub fn state(&self) -> EngineState {
        if self.finalized {
            EngineState::Finalized
        } else if self.general.is_active() || self.boot.is_active() {
            EngineState::Accumulating
        } else {
            EngineState::Idle
        }
    }

    /// Target this engine was created for
    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Writable flash layout
    pub fn layout(&self) -> &FlashLayout {
        &self.target.layout
    }

    /// Start address of the boot block
    pub fn boot_base(&self) -> u32 {
        self.target.layout.start()
    }

    /// Base address of the block `role` is buffering, if any
    pub fn pending_block(&self, role: BlockRole) -> Option<u32> {
        match role {
            BlockRole::General => self.general.base(),
            BlockRole::Boot => self.boot.base(),
        }
    }

    /// Size of one erase unit in bytes
    ///
    /// Probes the hardware the first time it is needed.
    pub fn erase_unit_size(&self) -> u32 {
        self.granularity.resolve(&self.driver)
    }

    /// Get a reference to the device driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Get a mutable reference to the device driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Get a reference to the watchdog
    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    /// Take the engine apart
    ///
    /// Buffered data that was not finalized is lost.
    pub fn into_parts(self) -> (D, W) {
        (self.driver, self.watchdog)
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    /// Buffer `data` for programming at `addr`
    ///
    /// Data may arrive in any chunk size and at any alignment. Completed
    /// blocks are programmed as soon as the data moves on; the boot block is
    /// kept until [`finalize`](Self::finalize). An empty `data` does nothing.
    ///
    /// # Errors
    /// * `AddressOutOfRange` - If any byte falls outside the layout
    /// * `SessionFinalized` - If the session was already finalized
    /// * Any error from programming a block that had to be flushed
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let Some(last_offset) = data.len().checked_sub(1) else {
            return Ok(());
        };
        let last = u32::try_from(last_offset)
            .ok()
            .and_then(|n| addr.checked_add(n))
            .ok_or(Error::AddressOutOfRange { addr })?;
        self.check_range(addr, last)?;

        let base = WriteBlock::<BLOCK_SIZE>::align(addr);
        let role = if base == self.boot_base() {
            BlockRole::Boot
        } else {
            BlockRole::General
        };
        self.add_to_block(role, base, (addr - base) as usize, data)
    }

    /// Erase every sector touched by `addr..addr + len`
    ///
    /// Whole sectors are erased, in erase units of the size reported by the
    /// hardware. A zero `len` does nothing.
    ///
    /// # Errors
    /// * `AddressOutOfRange` - If either end of the range is outside the
    ///   layout, the range spans a gap, or the last erase unit would reach
    ///   past the layout
    /// * `InvalidConfig` - If the first sector does not start on an erase
    ///   unit boundary
    /// * `EraseFailure` - If the driver rejects an erase
    /// * `SessionFinalized` - If the session was already finalized
    pub fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        self.ensure_open()?;

        let Some(last_offset) = len.checked_sub(1) else {
            return Ok(());
        };
        let last = addr
            .checked_add(last_offset)
            .ok_or(Error::AddressOutOfRange { addr })?;

        let layout = &self.target.layout;
        let first_sector = layout
            .locate(addr, &mut self.watchdog)
            .ok_or(Error::AddressOutOfRange { addr })?;
        let last_sector = layout
            .locate(last, &mut self.watchdog)
            .ok_or(Error::AddressOutOfRange { addr: last })?;
        if first_sector.start > last_sector.start {
            return Err(Error::AddressOutOfRange { addr });
        }

        let start = first_sector.start;
        let end = last_sector.last();
        if !layout.covers(start, end, &mut self.watchdog) {
            return Err(Error::AddressOutOfRange { addr: start });
        }

        let unit = self.granularity.resolve(&self.driver);
        if unit == 0 || start % unit != 0 {
            log::error!(
                "Sector {} at 0x{:08X} is not aligned to the {} byte erase unit",
                first_sector.number,
                start,
                unit
            );
            return Err(Error::InvalidConfig);
        }

        let units = (u64::from(end - start) + 1).div_ceil(u64::from(unit));
        let erase_last = u64::from(start) + units * u64::from(unit) - 1;
        if erase_last != u64::from(end) {
            // The last unit reaches into whatever follows the range
            let fits = u32::try_from(erase_last)
                .is_ok_and(|l| layout.covers(start, l, &mut self.watchdog));
            if !fits {
                return Err(Error::AddressOutOfRange {
                    addr: end.wrapping_add(1),
                });
            }
        }

        log::debug!(
            "Erasing sectors {}..={} (0x{:08X}..=0x{:08X}), {} units of {} bytes",
            first_sector.number,
            last_sector.number,
            start,
            end,
            units,
            unit
        );

        for i in 0..units {
            self.watchdog.service();

            let unit_addr = start + (i as u32) * unit;
            if let Err(e) = self.driver.erase_unit(unit_addr) {
                log::error!("Erase failed at 0x{:08X}: {:?}", unit_addr, e);
                return Err(Error::EraseFailure { addr: unit_addr });
            }
        }
        Ok(())
    }

    /// Deposit the application checksum into the buffered boot block
    ///
    /// Computed from the vector table as it sits in the boot block buffer.
    /// If nothing was written to the boot block this session, there is
    /// nothing to sign and the call does nothing.
    ///
    /// # Errors
    /// * `SessionFinalized` - If the session was already finalized
    /// * Any error from flushing the general block, which is programmed
    ///   before the boot block is touched
    pub fn write_checksum(&mut self) -> Result<()> {
        self.ensure_open()?;

        if !self.boot.is_active() {
            log::debug!("Boot block untouched, no checksum to write");
            return Ok(());
        }

        let signature = VectorTable::parse(self.boot.data())
            .ok_or(Error::InvalidConfig)?
            .signature();
        log::debug!("Application checksum 0x{:08X}", signature);

        let addr = self.boot_base() + self.target.checksum_offset;
        self.write(addr, &signature.to_le_bytes())
    }

    /// Check whether flash holds an application with a valid checksum
    ///
    /// Only reads flash, so it can be called at any point, including
    /// outside a session.
    pub fn verify_checksum(&self) -> bool {
        checksum::verify(
            &self.driver,
            self.boot_base(),
            self.target.checksum_offset,
        )
    }

    /// Like [`verify_checksum`](Self::verify_checksum), as a `Result`
    ///
    /// # Errors
    /// * `ChecksumInvalid` - If the stored checksum does not add up
    pub fn check_application(&self) -> Result<()> {
        verify_application(&self.target, &self.driver)
    }

    /// Program everything still buffered and end the session
    ///
    /// The general block is programmed first and the boot block last. If
    /// the general block fails, the boot block is left unprogrammed so no
    /// valid checksum lands on a broken image. The flash controller is
    /// disabled whatever the outcome, and the first error is returned.
    ///
    /// # Errors
    /// * `SessionFinalized` - If the session was already finalized
    /// * Any error from programming the buffered blocks
    pub fn finalize(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finalized = true;

        let result = self
            .flush_block(BlockRole::General)
            .and_then(|()| self.flush_block(BlockRole::Boot));

        self.driver.deinit();

        match result {
            Ok(()) => log::debug!("Programming session complete"),
            Err(e) => log::error!("Programming session failed: {}", e),
        }
        result
    }

    // =========================================================================
    // Block management
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            return Err(Error::SessionFinalized);
        }
        Ok(())
    }

    /// Check that `first..=last` is entirely writable
    fn check_range(&mut self, first: u32, last: u32) -> Result<()> {
        let layout = &self.target.layout;
        if layout.locate(first, &mut self.watchdog).is_none() {
            return Err(Error::AddressOutOfRange { addr: first });
        }
        if layout.locate(last, &mut self.watchdog).is_none() {
            return Err(Error::AddressOutOfRange { addr: last });
        }
        if !layout.covers(first, last, &mut self.watchdog) {
            return Err(Error::AddressOutOfRange { addr: first });
        }
        Ok(())
    }

    fn block_mut(&mut self, role: BlockRole) -> &mut WriteBlock<BLOCK_SIZE> {
        match role {
            BlockRole::General => &mut self.general,
            BlockRole::Boot => &mut self.boot,
        }
    }

    /// Copy `data` into the block at `base`, starting `offset` bytes in
    ///
    /// Moves on to the following blocks as each one fills up.
    fn add_to_block(
        &mut self,
        mut role: BlockRole,
        mut base: u32,
        mut offset: usize,
        data: &[u8],
    ) -> Result<()> {
        self.enter_block(role, base)?;

        for &byte in data {
            self.watchdog.service();

            if offset == BLOCK_SIZE {
                base += BLOCK_SIZE as u32;
                role = self.switch_block(role, base)?;
                offset = 0;
            }

            self.block_mut(role).store(offset, byte)?;
            offset += 1;
        }
        Ok(())
    }

    /// Move from a full `from` block on to the block at `next_base`
    fn switch_block(&mut self, from: BlockRole, next_base: u32) -> Result<BlockRole> {
        let to = if from == BlockRole::General && next_base == self.boot_base() {
            BlockRole::Boot
        } else {
            BlockRole::General
        };

        if from == BlockRole::Boot {
            log::trace!("Boot block held back until finalize");
        }

        self.enter_block(to, next_base)?;
        Ok(to)
    }

    /// Make `role` hold the block at `base`
    ///
    /// The general block is flushed first if it holds some other block, and
    /// always when moving into the boot block.
    fn enter_block(&mut self, role: BlockRole, base: u32) -> Result<()> {
        match role {
            BlockRole::Boot => {
                if self.general.is_active() {
                    self.flush_block(BlockRole::General)?;
                }
                self.boot.init(&self.driver, base)
            }
            BlockRole::General => {
                if self.general.base().is_some_and(|b| b != base) {
                    self.flush_block(BlockRole::General)?;
                }
                self.general.init(&self.driver, base)
            }
        }
    }

    fn flush_block(&mut self, role: BlockRole) -> Result<()> {
        let block = match role {
            BlockRole::General => &mut self.general,
            BlockRole::Boot => &mut self.boot,
        };
        let Some(base) = block.base() else {
            return Ok(());
        };

        let last = base + (BLOCK_SIZE as u32 - 1);
        if !self.target.layout.covers(base, last, &mut self.watchdog) {
            return Err(Error::AddressOutOfRange { addr: base });
        }

        block.flush(&mut self.driver, &mut self.watchdog)
    }
}

/// Check the application checksum of `target` without a session
///
/// # Errors
/// * `ChecksumInvalid` - If the stored checksum does not add up
pub fn verify_application<D: FlashDriver + ?Sized>(
    target: &TargetConfig,
    driver: &D,
) -> Result<()> {
    if checksum::verify(driver, target.layout.start(), target.checksum_offset) {
        Ok(())
    } else {
        log::warn!(
            "No valid application at 0x{:08X}",
            target.layout.start()
        );
        Err(Error::ChecksumInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::granularity::{EraseGranularity, EFM32_PAGE_SIZES};
    use crate::layout::SectorDescriptor;
    use core::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use std::vec;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Init,
        Deinit,
        Erase(u32),
        Program(u32, u32),
        Service,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    /// Sparse flash that records every operation
    struct MockDriver {
        log: Log,
        memory: BTreeMap<u32, u8>,
        fail_program_at: Option<u32>,
        fail_erase_at: Option<u32>,
        corrupt_at: Option<u32>,
    }

    impl FlashDriver for MockDriver {
        type Error = &'static str;

        fn init(&mut self) {
            self.log.borrow_mut().push(Event::Init);
        }

        fn deinit(&mut self) {
            self.log.borrow_mut().push(Event::Deinit);
        }

        fn erase_unit(&mut self, addr: u32) -> core::result::Result<(), Self::Error> {
            if self.fail_erase_at == Some(addr) {
                return Err("erase timeout");
            }
            self.log.borrow_mut().push(Event::Erase(addr));
            Ok(())
        }

        fn program_word(&mut self, addr: u32, word: u32) -> core::result::Result<(), Self::Error> {
            if self.fail_program_at == Some(addr) {
                return Err("program timeout");
            }
            self.log.borrow_mut().push(Event::Program(addr, word));
            for (i, b) in word.to_le_bytes().iter().enumerate() {
                let cell = self.memory.entry(addr + i as u32).or_insert(0xFF);
                *cell &= b;
            }
            if self.corrupt_at == Some(addr) {
                if let Some(cell) = self.memory.get_mut(&addr) {
                    *cell ^= 0x01;
                }
            }
            Ok(())
        }

        fn read(&self, addr: u32, buf: &mut [u8]) {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = self
                    .memory
                    .get(&(addr + i as u32))
                    .copied()
                    .unwrap_or(0xFF);
            }
        }
    }

    struct MockWatchdog(Log);

    impl Watchdog for MockWatchdog {
        fn service(&mut self) {
            self.0.borrow_mut().push(Event::Service);
        }
    }

    type TestEngine = FlashEngine<MockDriver, MockWatchdog>;

    fn target(sectors: &[SectorDescriptor], unit: u32) -> TargetConfig {
        TargetConfig::new(
            FlashLayout::new(sectors).unwrap(),
            EraseGranularity::Fixed(unit),
        )
    }

    /// Sector 1 at 0x2000 and sector 2 at 0x4000, 8 KiB each
    fn two_sectors() -> TargetConfig {
        target(
            &[
                SectorDescriptor::new(0x2000, 0x2000, 1),
                SectorDescriptor::new(0x4000, 0x2000, 2),
            ],
            0x800,
        )
    }

    fn engine_for(target: TargetConfig) -> (TestEngine, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let driver = MockDriver {
            log: log.clone(),
            memory: BTreeMap::new(),
            fail_program_at: None,
            fail_erase_at: None,
            corrupt_at: None,
        };
        let mut engine: TestEngine =
            FlashEngine::new(target, driver, MockWatchdog(log.clone())).unwrap();
        engine.init();
        (engine, log)
    }

    fn programs(log: &Log) -> Vec<(u32, u32)> {
        log.borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Program(addr, word) => Some((*addr, *word)),
                _ => None,
            })
            .collect()
    }

    fn erases(log: &Log) -> Vec<u32> {
        log.borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Erase(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_new_rejects_invalid_target() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let driver = MockDriver {
            log: log.clone(),
            memory: BTreeMap::new(),
            fail_program_at: None,
            fail_erase_at: None,
            corrupt_at: None,
        };
        let result: Result<TestEngine> = FlashEngine::new(
            two_sectors().with_checksum_offset(0x08),
            driver,
            MockWatchdog(log),
        );
        assert_eq!(result.err(), Some(Error::InvalidConfig));
    }

    #[test]
    fn test_single_block_scenario() {
        let (mut engine, log) = engine_for(target(
            &[SectorDescriptor::new(0x2000, 0x2000, 1)],
            0x800,
        ));

        engine.write(0x2000, &[0xAA; 512]).unwrap();
        // Boot block is held back
        assert!(programs(&log).is_empty());
        assert_eq!(engine.state(), EngineState::Accumulating);

        engine.finalize().unwrap();

        let expected: Vec<_> = (0..128).map(|i| (0x2000 + i * 4, 0xAAAA_AAAA)).collect();
        assert_eq!(programs(&log), expected);
        assert_eq!(log.borrow().first(), Some(&Event::Init));
        assert_eq!(log.borrow().last(), Some(&Event::Deinit));
        assert_eq!(engine.state(), EngineState::Finalized);
    }

    #[test]
    fn test_write_outside_layout() {
        let (mut engine, log) = engine_for(two_sectors());

        // Bootloader sector
        assert_eq!(
            engine.write(0x1FFF, &[0]),
            Err(Error::AddressOutOfRange { addr: 0x1FFF })
        );
        // Starts inside, runs past the end
        assert_eq!(
            engine.write(0x5FFE, &[1, 2, 3]),
            Err(Error::AddressOutOfRange { addr: 0x6000 })
        );
        // Wraps around the address space
        assert_eq!(
            engine.write(0xFFFF_FFFF, &[1, 2]),
            Err(Error::AddressOutOfRange { addr: 0xFFFF_FFFF })
        );

        engine.finalize().unwrap();
        assert!(programs(&log).is_empty());
    }

    #[test]
    fn test_write_across_gap_rejected() {
        let (mut engine, _log) = engine_for(target(
            &[
                SectorDescriptor::new(0x2000, 0x2000, 1),
                SectorDescriptor::new(0x6000, 0x2000, 3),
            ],
            0x800,
        ));

        let data = pattern(0x2100);
        assert_eq!(
            engine.write(0x3F80, &data),
            Err(Error::AddressOutOfRange { addr: 0x3F80 })
        );
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_erase_across_gap_rejected() {
        let (mut engine, log) = engine_for(target(
            &[
                SectorDescriptor::new(0x2000, 0x2000, 1),
                SectorDescriptor::new(0x6000, 0x2000, 3),
            ],
            0x800,
        ));

        assert_eq!(
            engine.erase(0x3F00, 0x2200),
            Err(Error::AddressOutOfRange { addr: 0x2000 })
        );
        assert!(erases(&log).is_empty());
    }

    #[test]
    fn test_erase_with_sector_numbers_out_of_address_order() {
        let (mut engine, log) = engine_for(target(
            &[
                SectorDescriptor::new(0x2000, 0x2000, 5),
                SectorDescriptor::new(0x4000, 0x2000, 2),
            ],
            0x1000,
        ));

        engine.erase(0x3000, 0x2000).unwrap();
        assert_eq!(erases(&log), vec![0x2000, 0x3000, 0x4000, 0x5000]);
    }

    #[test]
    fn test_zero_length_operations() {
        let (mut engine, log) = engine_for(two_sectors());

        assert_eq!(engine.write(0x0, &[]), Ok(()));
        assert_eq!(engine.erase(0x0, 0), Ok(()));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(erases(&log).is_empty());
    }

    #[test]
    fn test_chunking_does_not_matter() {
        let data = pattern(300);

        let (mut whole, _) = engine_for(two_sectors());
        whole.write(0x2180, &data).unwrap();
        whole.write_checksum().unwrap();
        whole.finalize().unwrap();

        let (mut chunked, _) = engine_for(two_sectors());
        for (i, chunk) in data.chunks(100).enumerate() {
            chunked.write(0x2180 + (i * 100) as u32, chunk).unwrap();
        }
        chunked.write_checksum().unwrap();
        chunked.finalize().unwrap();

        assert_eq!(whole.driver().memory, chunked.driver().memory);
    }

    #[test]
    fn test_boot_block_programmed_last_and_once() {
        let (mut engine, log) = engine_for(two_sectors());

        engine.write(0x2000, &pattern(1024)).unwrap();
        engine.write(0x4000, &pattern(64)).unwrap();
        engine.write_checksum().unwrap();
        engine.finalize().unwrap();

        let programs = programs(&log);
        let is_boot = |addr: u32| (0x2000..0x2200).contains(&addr);
        let first_boot = programs.iter().position(|(a, _)| is_boot(*a)).unwrap();

        assert_eq!(programs.iter().filter(|(a, _)| is_boot(*a)).count(), 128);
        assert!(programs[first_boot..].iter().all(|(a, _)| is_boot(*a)));
        assert!(engine.verify_checksum());
        assert_eq!(engine.check_application(), Ok(()));
    }

    #[test]
    fn test_general_block_flushed_when_data_moves_on() {
        let (mut engine, log) = engine_for(two_sectors());

        engine.write(0x2200, &[1, 2, 3, 4]).unwrap();
        assert!(programs(&log).is_empty());
        assert_eq!(engine.pending_block(BlockRole::General), Some(0x2200));

        engine.write(0x2600, &[5, 6, 7, 8]).unwrap();
        let programs = programs(&log);
        assert_eq!(programs.len(), 128);
        assert_eq!(programs[0], (0x2200, 0x0403_0201));
        assert_eq!(engine.pending_block(BlockRole::General), Some(0x2600));
    }

    #[test]
    fn test_partial_block_keeps_existing_contents() {
        let (mut engine, _log) = engine_for(two_sectors());
        engine.driver_mut().memory.insert(0x2210, 0x5A);

        engine.write(0x2200, &[0x11]).unwrap();
        engine.finalize().unwrap();

        let memory = &engine.driver().memory;
        assert_eq!(memory.get(&0x2200), Some(&0x11));
        assert_eq!(memory.get(&0x2201), Some(&0xFF));
        assert_eq!(memory.get(&0x2210), Some(&0x5A));
    }

    #[test]
    fn test_checksum_without_boot_block_is_noop() {
        let (mut engine, log) = engine_for(two_sectors());

        engine.write(0x2400, &pattern(16)).unwrap();
        engine.write_checksum().unwrap();
        engine.finalize().unwrap();

        assert!(programs(&log).iter().all(|(a, _)| *a >= 0x2200));
        assert!(!engine.verify_checksum());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let (mut engine, _log) = engine_for(two_sectors());
        engine.write(0x2000, &pattern(512)).unwrap();
        engine.write_checksum().unwrap();
        engine.finalize().unwrap();
        assert!(engine.verify_checksum());

        if let Some(byte) = engine.driver_mut().memory.get_mut(&0x2004) {
            *byte ^= 0x80;
        }
        assert!(!engine.verify_checksum());
        assert_eq!(engine.check_application(), Err(Error::ChecksumInvalid));
    }

    #[test]
    fn test_checksum_offset_is_configurable() {
        let (mut engine, _log) = engine_for(two_sectors().with_checksum_offset(0x1C));
        engine.write(0x2000, &pattern(64)).unwrap();
        engine.write_checksum().unwrap();
        engine.finalize().unwrap();

        let mut image = [0u8; 64];
        engine.driver().read(0x2000, &mut image);
        assert!(checksum::is_valid(&image, 0x1C));
        assert!(!checksum::is_valid(&image, 0xB8));
    }

    #[test]
    fn test_erase_whole_sectors() {
        let (mut engine, log) = engine_for(two_sectors());

        engine.erase(0x2100, 0x10).unwrap();
        assert_eq!(erases(&log), vec![0x2000, 0x2800, 0x3000, 0x3800]);

        log.borrow_mut().clear();
        engine.erase(0x3FFF, 2).unwrap();
        assert_eq!(erases(&log).len(), 8);
    }

    #[test]
    fn test_erase_rounds_up_to_whole_units() {
        let (mut engine, log) = engine_for(target(
            &[
                SectorDescriptor::new(0x2000, 0x1000, 1),
                SectorDescriptor::new(0x3000, 0x1000, 2),
                SectorDescriptor::new(0x4000, 0x1000, 3),
                SectorDescriptor::new(0x5000, 0x1000, 4),
            ],
            0x2000,
        ));

        engine.erase(0x2000, 0x1000).unwrap();
        assert_eq!(erases(&log), vec![0x2000]);

        log.borrow_mut().clear();
        engine.erase(0x2000, 0x3000).unwrap();
        assert_eq!(erases(&log), vec![0x2000, 0x4000]);
    }

    #[test]
    fn test_erase_unit_must_stay_inside_layout() {
        let (mut engine, log) = engine_for(target(
            &[SectorDescriptor::new(0x4000, 0x1000, 1)],
            0x2000,
        ));

        assert_eq!(
            engine.erase(0x4000, 0x1000),
            Err(Error::AddressOutOfRange { addr: 0x5000 })
        );
        assert!(erases(&log).is_empty());
    }

    #[test]
    fn test_erase_outside_layout() {
        let (mut engine, log) = engine_for(two_sectors());

        assert_eq!(
            engine.erase(0x1000, 0x100),
            Err(Error::AddressOutOfRange { addr: 0x1000 })
        );
        assert_eq!(
            engine.erase(0x5F00, 0x200),
            Err(Error::AddressOutOfRange { addr: 0x60FF })
        );
        assert!(erases(&log).is_empty());
    }

    #[test]
    fn test_erase_uses_probed_granularity() {
        let target = TargetConfig::new(
            FlashLayout::new(&[SectorDescriptor::new(0x2000, 0x2000, 1)]).unwrap(),
            EraseGranularity::Probed(EFM32_PAGE_SIZES),
        );
        let (mut engine, log) = engine_for(target);
        // Giant Gecko
        engine
            .driver_mut()
            .memory
            .insert(EFM32_PAGE_SIZES.id_address, 72);

        engine.erase(0x2000, 0x2000).unwrap();
        assert_eq!(erases(&log), vec![0x2000, 0x3000]);
        assert_eq!(engine.erase_unit_size(), 4096);
    }

    #[test]
    fn test_watchdog_serviced_before_each_device_op() {
        let (mut engine, log) = engine_for(two_sectors());

        engine.erase(0x2000, 0x4000).unwrap();
        engine.write(0x2000, &pattern(1500)).unwrap();
        engine.write_checksum().unwrap();
        engine.finalize().unwrap();

        let events = log.borrow();
        for (i, event) in events.iter().enumerate() {
            if matches!(event, Event::Erase(_) | Event::Program(..)) {
                assert_eq!(events[i - 1], Event::Service, "unserviced op {:?}", event);
            }
        }
    }

    #[test]
    fn test_program_failure_keeps_boot_block_back() {
        let (mut engine, log) = engine_for(two_sectors());
        engine.driver_mut().fail_program_at = Some(0x2208);

        engine.write(0x2000, &pattern(1024)).unwrap();
        engine.write_checksum().unwrap_err();
        assert_eq!(
            engine.finalize(),
            Err(Error::DeviceWriteFailure { addr: 0x2208 })
        );

        assert!(programs(&log).iter().all(|(a, _)| *a >= 0x2200));
        assert_eq!(log.borrow().last(), Some(&Event::Deinit));
    }

    #[test]
    fn test_finalize_reports_program_failure() {
        let (mut engine, log) = engine_for(two_sectors());
        engine.driver_mut().fail_program_at = Some(0x2404);

        engine.write(0x2400, &pattern(8)).unwrap();
        assert_eq!(
            engine.finalize(),
            Err(Error::DeviceWriteFailure { addr: 0x2404 })
        );
        assert_eq!(log.borrow().last(), Some(&Event::Deinit));
    }

    #[test]
    fn test_verify_mismatch() {
        let (mut engine, _log) = engine_for(two_sectors());
        engine.driver_mut().corrupt_at = Some(0x4004);

        engine.write(0x4000, &[0u8; 8]).unwrap();
        assert_eq!(
            engine.finalize(),
            Err(Error::VerifyMismatch {
                addr: 0x4004,
                expected: 0,
                found: 1,
            })
        );
    }

    #[test]
    fn test_erase_failure() {
        let (mut engine, log) = engine_for(two_sectors());
        engine.driver_mut().fail_erase_at = Some(0x2800);

        assert_eq!(
            engine.erase(0x2000, 0x2000),
            Err(Error::EraseFailure { addr: 0x2800 })
        );
        assert_eq!(erases(&log), vec![0x2000]);
    }

    #[test]
    fn test_finalized_session_rejects_operations() {
        let (mut engine, _log) = engine_for(two_sectors());
        engine.finalize().unwrap();

        assert_eq!(engine.write(0x2000, &[0]), Err(Error::SessionFinalized));
        assert_eq!(engine.erase(0x2000, 1), Err(Error::SessionFinalized));
        assert_eq!(engine.write_checksum(), Err(Error::SessionFinalized));
        assert_eq!(engine.finalize(), Err(Error::SessionFinalized));

        // Reading flash is still fine
        assert!(!engine.verify_checksum());

        engine.init();
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.write(0x2000, &[0]), Ok(()));
    }

    #[test]
    fn test_init_discards_unfinished_session() {
        let (mut engine, log) = engine_for(two_sectors());
        engine.write(0x2000, &pattern(600)).unwrap();
        assert_eq!(engine.state(), EngineState::Accumulating);

        engine.init();
        assert_eq!(engine.state(), EngineState::Idle);
        engine.finalize().unwrap();
        assert!(programs(&log).is_empty());
    }
}
