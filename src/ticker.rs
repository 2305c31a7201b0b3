//! Hardware tick counter and CPU delay loop used for the timing measurement

/// Static description of a tick counter
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerInfo {
    /// Counting frequency in Hz
    pub frequency: u32,
    /// Width of the counter, between 1 and 32
    pub bits: u8,
}

impl TickerInfo {
    /// Largest value of the counter before it wraps
    pub const fn max_count(&self) -> u32 {
        match self.bits {
            0 => 0,
            bits if bits >= 32 => u32::MAX,
            bits => (1 << bits) - 1,
        }
    }

    /// Converts a tick count to microseconds, zero if the frequency is unknown.
    /// Saturates at `u32::MAX`.
    pub fn ticks_to_us(&self, ticks: u32) -> u32 {
        (ticks as u64 * 1_000_000)
            .checked_div(self.frequency as u64)
            .map_or(0, |us| u32::try_from(us).unwrap_or(u32::MAX))
    }
}

/// A free running counter. The counter is not expected to handle its own wrap.
pub trait Ticker {
    fn read(&mut self) -> u32;

    fn info(&self) -> TickerInfo;
}

/// A fixed amount of CPU work
pub trait CycleDelay {
    fn delay_cycles(&mut self, count: u32);
}

/// Portable busy loop
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinDelay;

impl CycleDelay for SpinDelay {
    fn delay_cycles(&mut self, count: u32) {
        let mut remaining = core::hint::black_box(count);
        while remaining > 0 {
            remaining = core::hint::black_box(remaining - 1);
        }
    }
}

/// Cycle accurate delay of the Cortex-M core
#[cfg(feature = "cortex-m")]
#[derive(Debug, Clone, Copy, Default)]
pub struct AsmDelay;

#[cfg(feature = "cortex-m")]
impl CycleDelay for AsmDelay {
    fn delay_cycles(&mut self, count: u32) {
        cortex_m::asm::delay(count)
    }
}

/// Wait for the counter to wrap if fewer than `window` ticks are left before it does.
///
/// A measurement started afterwards sees at most one wrap.
pub fn overflow_protect<T: Ticker + ?Sized>(ticker: &mut T, window: u32) {
    let now = ticker.read();
    let max_count = ticker.info().max_count();

    if max_count.saturating_sub(now) > window {
        return;
    }

    #[cfg(feature = "defmt")]
    defmt::debug!("Ticker at {=u32:#x}, waiting for the wrap", now);
    while ticker.read() >= now {
        core::hint::spin_loop();
    }
}

/// Time `cycles` iterations of the delay loop, in microseconds
pub fn time_cpu_cycles<T, D>(ticker: &mut T, delay: &mut D, cycles: u32) -> u32
where
    T: Ticker + ?Sized,
    D: CycleDelay + ?Sized,
{
    let info = ticker.info();
    let (start, end) = critical_section::with(|_| {
        let start = ticker.read();
        delay.delay_cycles(cycles);
        let end = ticker.read();
        (start, end)
    });

    info.ticks_to_us(end.wrapping_sub(start) & info.max_count())
}
