//! Simulated flash device and tick counter for running the suite on the host.
//!
//! The simulated flash behaves like NOR flash: erasing sets every byte of a sector to `0xFF`,
//! programming can only clear bits. Known driver bugs can be injected with [`Faults`].

use core::cell::Cell;

use crate::{
    hal::FlashHal,
    ticker::{CycleDelay, Ticker, TickerInfo},
    INVALID_SIZE,
};

/// Value of an erased byte
pub const ERASED: u8 = 0xFF;

/// `count` consecutive sectors of `sector_size` bytes
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub count: u32,
    pub sector_size: u32,
}

impl Region {
    pub const fn new(count: u32, sector_size: u32) -> Self {
        Self { count, sector_size }
    }

    pub const fn size(&self) -> u32 {
        self.count * self.sector_size
    }
}

/// Driver bugs the simulator can reproduce
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Faults {
    /// `init` fails
    pub fail_init: bool,
    /// `free` fails and leaves the device open
    pub fail_free: bool,
    /// Only the first erase does anything, later ones report success and keep the old data
    pub stale_erase: bool,
    /// Addresses after the end of the device report the size of the last sector
    pub leak_unmapped: bool,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// The regions do not add up to the size of the backing memory
    InvalidLayout,
    /// Injected initialization failure
    InitFailed,
    /// Injected release failure
    FreeFailed,
    /// The device is not initialized
    Closed,
    /// Access outside of the device
    OutOfBounds,
    /// Access not aligned to a sector or a page
    NotAligned,
}

/// A flash device backed by a memory slice, laid out as a list of [`Region`]s
pub struct SimFlash<'a> {
    memory: &'a mut [u8],
    layout: &'a [Region],
    start: u32,
    page_size: u32,
    faults: Faults,
    clock_effect: Option<(&'a SimClock, u32)>,
    open: bool,
    inits: u32,
    frees: u32,
    erases: u32,
}

impl<'a> SimFlash<'a> {
    /// Create a device mapped at `start`. The memory is left untouched, fill it with
    /// [`ERASED`] to start from a blank device.
    pub fn new(
        memory: &'a mut [u8],
        layout: &'a [Region],
        start: u32,
        page_size: u32,
    ) -> Result<Self, SimError> {
        let size = layout
            .iter()
            .try_fold(0u32, |size, region| {
                region
                    .count
                    .checked_mul(region.sector_size)
                    .and_then(|region_size| size.checked_add(region_size))
            })
            .ok_or(SimError::InvalidLayout)?;
        if size as usize != memory.len() || size == 0 {
            return Err(SimError::InvalidLayout);
        }
        Ok(Self {
            memory,
            layout,
            start,
            page_size,
            faults: Faults::default(),
            clock_effect: None,
            open: false,
            inits: 0,
            frees: 0,
            erases: 0,
        })
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Every erase reconfigures `clock` to run `cycles_per_tick` CPU cycles per tick,
    /// like a flash controller touching wait states behind the application's back
    pub fn with_clock_side_effect(mut self, clock: &'a SimClock, cycles_per_tick: u32) -> Self {
        self.clock_effect = Some((clock, cycles_per_tick));
        self
    }

    pub fn memory(&self) -> &[u8] {
        self.memory
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn init_count(&self) -> u32 {
        self.inits
    }

    pub fn free_count(&self) -> u32 {
        self.frees
    }

    pub fn erase_count(&self) -> u32 {
        self.erases
    }

    fn end(&self) -> u64 {
        self.start as u64 + self.memory.len() as u64
    }

    /// `(start, size)` of the sector holding `address`
    fn locate(&self, address: u32) -> Option<(u32, u32)> {
        if (address as u64) < self.start as u64 || address as u64 >= self.end() {
            return None;
        }
        let mut base = self.start;
        for region in self.layout {
            let region_end = base as u64 + region.size() as u64;
            if (address as u64) < region_end {
                let index = (address - base) / region.sector_size;
                return Some((base + index * region.sector_size, region.sector_size));
            }
            base = region_end as u32;
        }
        None
    }

    /// Offset of `[address, address + length)` in the backing memory
    fn range(&self, address: u32, length: usize) -> Result<core::ops::Range<usize>, SimError> {
        if !self.open {
            return Err(SimError::Closed);
        }
        let offset = address
            .checked_sub(self.start)
            .ok_or(SimError::OutOfBounds)? as usize;
        let end = offset.checked_add(length).ok_or(SimError::OutOfBounds)?;
        if end > self.memory.len() {
            return Err(SimError::OutOfBounds);
        }
        Ok(offset..end)
    }
}

impl FlashHal for SimFlash<'_> {
    type Error = SimError;

    fn init(&mut self) -> Result<(), Self::Error> {
        if self.faults.fail_init {
            return Err(SimError::InitFailed);
        }
        self.inits += 1;
        self.open = true;
        Ok(())
    }

    fn free(&mut self) -> Result<(), Self::Error> {
        if !self.open {
            return Err(SimError::Closed);
        }
        if self.faults.fail_free {
            return Err(SimError::FreeFailed);
        }
        self.frees += 1;
        self.open = false;
        Ok(())
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn start_address(&self) -> u32 {
        self.start
    }

    fn size(&self) -> u32 {
        self.memory.len() as u32
    }

    fn sector_size(&self, address: u32) -> u32 {
        match self.locate(address) {
            Some((_, size)) => size,
            None if self.faults.leak_unmapped && address as u64 >= self.end() => self
                .layout
                .last()
                .map_or(INVALID_SIZE, |region| region.sector_size),
            None => INVALID_SIZE,
        }
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
        let (start, size) = self.locate(address).ok_or(SimError::OutOfBounds)?;
        if start != address {
            return Err(SimError::NotAligned);
        }
        let range = self.range(address, size as usize)?;

        self.erases += 1;
        if let Some((clock, cycles_per_tick)) = self.clock_effect {
            clock.set_cycles_per_tick(cycles_per_tick);
        }
        if self.faults.stale_erase && self.erases > 1 {
            return Ok(());
        }
        self.memory[range].fill(ERASED);
        Ok(())
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(address, data.len())?;
        let page_size = self.page_size as usize;
        if page_size == 0 || range.start % page_size != 0 || data.len() % page_size != 0 {
            return Err(SimError::NotAligned);
        }
        for (cell, byte) in self.memory[range].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(())
    }

    fn read(&mut self, address: u32, buff: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(address, buff.len())?;
        buff.copy_from_slice(&self.memory[range]);
        Ok(())
    }
}

/// Shared time base of [`SimTicker`] and [`SimDelay`]
#[derive(Debug)]
pub struct SimClock {
    ticks: Cell<u32>,
    cycles_per_tick: Cell<u32>,
}

impl SimClock {
    pub const fn new(cycles_per_tick: u32) -> Self {
        Self {
            ticks: Cell::new(0),
            cycles_per_tick: Cell::new(cycles_per_tick),
        }
    }

    pub fn now(&self) -> u32 {
        self.ticks.get()
    }

    pub fn set(&self, ticks: u32) {
        self.ticks.set(ticks);
    }

    pub fn advance(&self, ticks: u32) {
        self.ticks.set(self.ticks.get().wrapping_add(ticks));
    }

    pub fn cycles_per_tick(&self) -> u32 {
        self.cycles_per_tick.get()
    }

    /// Simulate a change of CPU clock or cache configuration
    pub fn set_cycles_per_tick(&self, cycles_per_tick: u32) {
        self.cycles_per_tick.set(cycles_per_tick);
    }
}

/// A counter of `info.bits` bits over a [`SimClock`]. Each read takes `read_cost` ticks.
#[derive(Debug, Clone, Copy)]
pub struct SimTicker<'a> {
    clock: &'a SimClock,
    info: TickerInfo,
    read_cost: u32,
}

impl<'a> SimTicker<'a> {
    pub fn new(clock: &'a SimClock, info: TickerInfo) -> Self {
        Self {
            clock,
            info,
            read_cost: 1,
        }
    }

    pub fn with_read_cost(mut self, read_cost: u32) -> Self {
        self.read_cost = read_cost;
        self
    }
}

impl Ticker for SimTicker<'_> {
    fn read(&mut self) -> u32 {
        let ticks = self.clock.now() & self.info.max_count();
        self.clock.advance(self.read_cost);
        ticks
    }

    fn info(&self) -> TickerInfo {
        self.info
    }
}

/// A delay loop advancing a [`SimClock`] by `count / cycles_per_tick` ticks
#[derive(Debug, Clone, Copy)]
pub struct SimDelay<'a> {
    clock: &'a SimClock,
}

impl<'a> SimDelay<'a> {
    pub fn new(clock: &'a SimClock) -> Self {
        Self { clock }
    }
}

impl CycleDelay for SimDelay<'_> {
    fn delay_cycles(&mut self, count: u32) {
        let ticks = count.checked_div(self.clock.cycles_per_tick()).unwrap_or(0);
        self.clock.advance(ticks);
    }
}
