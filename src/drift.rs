//! Detects a change of CPU clock or cache configuration across the test run.
//!
//! The same delay loop is timed before and after the driver is exercised. A flash controller
//! touching wait states or cache registers as a side effect shows up as a different duration.

use crate::{
    error::Error,
    ticker::{overflow_protect, time_cpu_cycles, CycleDelay, Ticker},
    DRIFT_DIVISOR, OVERFLOW_WINDOW, TEST_CYCLES,
};

/// Parameters of the timing measurement
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Iterations of the delay loop
    pub cycles: u32,
    /// The allowed drift is `baseline / drift_divisor`
    pub drift_divisor: u32,
    /// See [`overflow_protect`]
    pub overflow_window: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cycles: TEST_CYCLES,
            drift_divisor: DRIFT_DIVISOR,
            overflow_window: OVERFLOW_WINDOW,
        }
    }
}

/// Outcome of a drift check
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drift {
    pub baseline_us: u32,
    pub measured_us: u32,
    pub allowed_us: u32,
}

impl Drift {
    pub fn new(baseline_us: u32, measured_us: u32, drift_divisor: u32) -> Self {
        Self {
            baseline_us,
            measured_us,
            allowed_us: baseline_us.checked_div(drift_divisor).unwrap_or(0),
        }
    }

    pub fn deviation_us(&self) -> u32 {
        self.measured_us.abs_diff(self.baseline_us)
    }

    pub fn is_within(&self) -> bool {
        self.deviation_us() <= self.allowed_us
    }
}

/// Times the delay loop and keeps the first measurement as the reference
pub struct DriftMonitor<T, D> {
    ticker: T,
    delay: D,
    config: TimingConfig,
    baseline: Option<u32>,
}

impl<T: Ticker, D: CycleDelay> DriftMonitor<T, D> {
    pub fn new(ticker: T, delay: D, config: TimingConfig) -> Self {
        Self {
            ticker,
            delay,
            config,
            baseline: None,
        }
    }

    /// Time the delay loop once, in microseconds
    pub fn measure(&mut self) -> u32 {
        overflow_protect(&mut self.ticker, self.config.overflow_window);
        time_cpu_cycles(&mut self.ticker, &mut self.delay, self.config.cycles)
    }

    /// Measure and keep the result as the reference, replacing any previous one
    pub fn capture_baseline(&mut self) -> u32 {
        let baseline = self.measure();
        #[cfg(feature = "defmt")]
        defmt::info!("Timing baseline {=u32} us", baseline);
        self.baseline = Some(baseline);
        baseline
    }

    pub fn baseline(&self) -> Option<u32> {
        self.baseline
    }

    /// Measure again and compare with the baseline
    pub fn check<E>(&mut self) -> Result<Drift, Error<E>> {
        let baseline = self.baseline.ok_or(Error::NoBaseline)?;
        let drift = Drift::new(baseline, self.measure(), self.config.drift_divisor);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "Timing {=u32} us, baseline {=u32} us, allowed {=u32} us",
            drift.measured_us,
            drift.baseline_us,
            drift.allowed_us
        );
        if !drift.is_within() {
            return Err(Error::Drift(drift));
        }
        Ok(drift)
    }

    pub fn into_parts(self) -> (T, D) {
        (self.ticker, self.delay)
    }
}
