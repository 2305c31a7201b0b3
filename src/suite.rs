//! The conformance cases and their runner

use core::fmt::Debug;

use crate::{
    drift::{DriftMonitor, TimingConfig},
    error::{Error, GeometryViolation, Operation},
    geometry::{self, Geometry, Sector},
    hal::{FlashHal, FlashHandle},
    image::ImageBounds,
    ticker::{CycleDelay, Ticker},
    FIRST_PATTERN, SECOND_PATTERN,
};

/// Page buffer capacity used when none is specified
pub const DEFAULT_MAX_PAGE: usize = 4096;

/// Result of a single case
pub type Verdict<E> = Result<Outcome, Error<E>>;

/// The cases, in run order
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Init,
    MappingAlignment,
    EraseSector,
    ProgramPage,
    ClockAndCache,
}

impl Case {
    pub const COUNT: usize = 5;

    pub const ALL: [Case; Case::COUNT] = [
        Case::Init,
        Case::MappingAlignment,
        Case::EraseSector,
        Case::ProgramPage,
        Case::ClockAndCache,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Case::Init => "Flash - init",
            Case::MappingAlignment => "Flash - mapping alignment",
            Case::EraseSector => "Flash - erase sector",
            Case::ProgramPage => "Flash - program page",
            Case::ClockAndCache => "Flash - clock and cache test",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Why a case did not run
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The target region starts inside the running image
    OverlapsImage { region: u32, image_end: u32 },
}

/// A case that did not fail
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Skipped(SkipReason),
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Passed,
    Skipped,
    Failed,
}

impl<E> From<&Verdict<E>> for Status {
    fn from(verdict: &Verdict<E>) -> Self {
        match verdict {
            Ok(Outcome::Passed) => Status::Passed,
            Ok(Outcome::Skipped(_)) => Status::Skipped,
            Err(_) => Status::Failed,
        }
    }
}

/// Aggregated result of a run
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    statuses: [Option<Status>; Case::COUNT],
}

impl Report {
    pub fn record<E>(&mut self, case: Case, verdict: &Verdict<E>) {
        let status = Status::from(verdict);
        match status {
            Status::Passed => self.passed += 1,
            Status::Skipped => self.skipped += 1,
            Status::Failed => self.failed += 1,
        }
        self.statuses[case.index()] = Some(status);
    }

    /// Status of `case`, `None` if it did not run
    pub fn status(&self, case: Case) -> Option<Status> {
        self.statuses[case.index()]
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Hooks of the execution environment around a run.
///
/// Locking down RAM execution and ROM writes for the duration of the run belongs in
/// [`Harness::setup`] and [`Harness::teardown`].
pub trait Harness {
    fn setup(&mut self, _cases: usize) {}

    fn case_started(&mut self, _case: Case) {}

    fn case_finished<E: Debug>(&mut self, _case: Case, _verdict: &Verdict<E>) {}

    fn teardown(&mut self, _report: &Report) {}
}

impl Harness for () {}

/// Tunables of the suite
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteConfig {
    pub timing: TimingConfig,
    /// Fill byte of the first program cycle
    pub first_pattern: u8,
    /// Fill byte of the second program cycle, must differ from the first
    pub second_pattern: u8,
    /// Regions starting below the end of the image are never erased
    pub image: ImageBounds,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            first_pattern: FIRST_PATTERN,
            second_pattern: SECOND_PATTERN,
            image: ImageBounds::none(),
        }
    }
}

/// Runs the conformance cases against a flash driver.
///
/// `MAX_PAGE` bounds the page size of the device, two buffers of that size are placed on the
/// stack by [`Case::ProgramPage`].
pub struct Suite<F, T, D, const MAX_PAGE: usize = DEFAULT_MAX_PAGE> {
    flash: F,
    drift: DriftMonitor<T, D>,
    config: SuiteConfig,
}

impl<F, T, D> Suite<F, T, D>
where
    F: FlashHal,
    T: Ticker,
    D: CycleDelay,
{
    /// Create a suite with the default configuration
    pub fn new(flash: F, ticker: T, delay: D) -> Self {
        Self::with_config(flash, ticker, delay, SuiteConfig::default())
    }

    pub fn with_config(flash: F, ticker: T, delay: D, config: SuiteConfig) -> Self {
        Self {
            flash,
            drift: DriftMonitor::new(ticker, delay, config.timing),
            config,
        }
    }
}

impl<F, T, D, const MAX_PAGE: usize> Suite<F, T, D, MAX_PAGE>
where
    F: FlashHal,
    T: Ticker,
    D: CycleDelay,
{
    /// Change the page buffer capacity
    pub fn with_page_buffer<const N: usize>(self) -> Suite<F, T, D, N> {
        Suite {
            flash: self.flash,
            drift: self.drift,
            config: self.config,
        }
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn drift(&self) -> &DriftMonitor<T, D> {
        &self.drift
    }

    pub fn into_parts(self) -> (F, T, D) {
        let (ticker, delay) = self.drift.into_parts();
        (self.flash, ticker, delay)
    }

    /// Run every case in order. A failing case does not stop the run.
    pub fn run<H: Harness>(&mut self, harness: &mut H) -> Report {
        let mut report = Report::default();
        harness.setup(Case::COUNT);

        for case in Case::ALL {
            harness.case_started(case);
            let verdict = self.run_case(case);

            #[cfg(feature = "defmt")]
            match &verdict {
                Ok(Outcome::Passed) => defmt::info!("{=str}: passed", case.name()),
                Ok(Outcome::Skipped(reason)) => {
                    defmt::warn!("{=str}: skipped, {:?}", case.name(), reason)
                }
                Err(e) => defmt::error!(
                    "{=str}: failed, {:?}",
                    case.name(),
                    defmt::Debug2Format(e)
                ),
            }

            report.record(case, &verdict);
            harness.case_finished(case, &verdict);
        }

        #[cfg(feature = "defmt")]
        defmt::info!(
            "{=usize} passed, {=usize} failed, {=usize} skipped",
            report.passed,
            report.failed,
            report.skipped
        );
        harness.teardown(&report);
        report
    }

    pub fn run_case(&mut self, case: Case) -> Verdict<F::Error> {
        match case {
            Case::Init => self.init(),
            Case::MappingAlignment => self.mapping_alignment(),
            Case::EraseSector => self.erase_sector(),
            Case::ProgramPage => self.program_page(),
            Case::ClockAndCache => self.clock_and_cache(),
        }
    }

    /// Capture the timing baseline, then open and free the device
    pub fn init(&mut self) -> Verdict<F::Error> {
        self.drift.capture_baseline();

        let handle = FlashHandle::open(&mut self.flash).map_err(Error::flash(Operation::Init))?;
        handle.release().map_err(Error::flash(Operation::Free))?;
        Ok(Outcome::Passed)
    }

    /// Check every sector of the device and the unmapped addresses around it
    pub fn mapping_alignment(&mut self) -> Verdict<F::Error> {
        let handle = FlashHandle::open(&mut self.flash).map_err(Error::flash(Operation::Init))?;
        geometry::check_layout(&*handle)?;
        handle.release().map_err(Error::flash(Operation::Free))?;
        Ok(Outcome::Passed)
    }

    /// Erase the last sector of the device
    pub fn erase_sector(&mut self) -> Verdict<F::Error> {
        let image = self.config.image;
        let mut handle =
            FlashHandle::open(&mut self.flash).map_err(Error::flash(Operation::Init))?;

        let sector = Sector::last(&*handle)?;
        if !sector.is_aligned() {
            return Err(Error::Geometry(GeometryViolation::Misaligned {
                address: sector.start,
                sector_size: sector.size,
            }));
        }

        #[cfg(feature = "defmt")]
        defmt::info!(
            "ROM ends at {=u32:#x}, test starts at {=u32:#x}",
            image.end(),
            sector.start
        );
        if let Some(reason) = overlap(image, sector.start) {
            handle.release().map_err(Error::flash(Operation::Free))?;
            return Ok(Outcome::Skipped(reason));
        }

        handle
            .erase_sector(sector.start)
            .map_err(Error::flash(Operation::EraseSector))?;
        handle.release().map_err(Error::flash(Operation::Free))?;
        Ok(Outcome::Passed)
    }

    /// Program the page before the last one twice, erasing in between
    pub fn program_page(&mut self) -> Verdict<F::Error> {
        let image = self.config.image;
        let patterns = [self.config.first_pattern, self.config.second_pattern];
        let mut handle =
            FlashHandle::open(&mut self.flash).map_err(Error::flash(Operation::Init))?;

        let geometry = Geometry::query(&*handle);
        let page_size = geometry.page_size;
        if page_size == 0 {
            return Err(Error::Geometry(GeometryViolation::ZeroPageSize));
        }
        if page_size as usize > MAX_PAGE {
            return Err(Error::BufferTooSmall {
                page_size,
                capacity: MAX_PAGE,
            });
        }

        // The last page is left alone
        let too_small = GeometryViolation::TooSmall {
            size: geometry.size,
            required: page_size.saturating_mul(2),
        };
        let address = geometry
            .last_address()?
            .checked_sub(page_size.checked_mul(2).ok_or(too_small)? - 1)
            .filter(|address| *address >= geometry.start)
            .ok_or(too_small)?;

        // Sector size might not be the same as the page size
        let sector = Sector::containing(&*handle, address)?;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "ROM ends at {=u32:#x}, test starts at {=u32:#x}",
            image.end(),
            sector.start
        );
        if let Some(reason) = overlap(image, sector.start) {
            handle.release().map_err(Error::flash(Operation::Free))?;
            return Ok(Outcome::Skipped(reason));
        }

        let mut expected = [0u8; MAX_PAGE];
        let mut actual = [0u8; MAX_PAGE];
        let page = page_size as usize;
        for pattern in patterns {
            let sector = Sector::containing(&*handle, address)?;
            let expected = &mut expected[..page];
            expected.fill(pattern);
            round_trip(&mut *handle, sector, address, expected, &mut actual[..page])?;
        }

        handle.release().map_err(Error::flash(Operation::Free))?;
        Ok(Outcome::Passed)
    }

    /// Time the delay loop again and compare with the baseline captured by [`Suite::init`]
    pub fn clock_and_cache(&mut self) -> Verdict<F::Error> {
        self.drift.check::<F::Error>()?;
        Ok(Outcome::Passed)
    }
}

fn overlap(image: ImageBounds, region: u32) -> Option<SkipReason> {
    if !image.overlaps(region) {
        return None;
    }
    #[cfg(feature = "defmt")]
    defmt::warn!("Test skipped. Test region overlaps code.");
    Some(SkipReason::OverlapsImage {
        region,
        image_end: image.end(),
    })
}

/// Erase `sector`, program `expected` at `address` and read it back
fn round_trip<F: FlashHal + ?Sized>(
    flash: &mut F,
    sector: Sector,
    address: u32,
    expected: &[u8],
    actual: &mut [u8],
) -> Result<(), Error<F::Error>> {
    flash
        .erase_sector(sector.start)
        .map_err(Error::flash(Operation::EraseSector))?;
    flash
        .program_page(address, expected)
        .map_err(Error::flash(Operation::ProgramPage))?;
    flash
        .read(address, actual)
        .map_err(Error::flash(Operation::Read))?;

    match expected.iter().zip(actual.iter()).position(|(e, a)| e != a) {
        Some(i) => Err(Error::Mismatch {
            address: address + i as u32,
            expected: expected[i],
            actual: actual[i],
        }),
        None => Ok(()),
    }
}
