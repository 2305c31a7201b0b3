use flash_conformance::{
    error::{Error, GeometryViolation, Operation},
    image::ImageBounds,
    sim::{Faults, Region, SimClock, SimDelay, SimError, SimFlash, SimTicker, ERASED},
    suite::{Case, Harness, Outcome, SkipReason, Status, Suite, SuiteConfig, Verdict},
    ticker::TickerInfo,
    FIRST_PATTERN, SECOND_PATTERN,
};

const START: u32 = 0x0800_0000;
const PAGE: u32 = 0x100;
const CYCLES_PER_TICK: u32 = 64;

static UNIFORM: [Region; 1] = [Region::new(16, 0x1000)];

/// 4 x 16kB, 1 x 64kB, 1 x 128kB, like the first bank of an STM32F4
static MIXED: [Region; 3] = [
    Region::new(4, 0x4000),
    Region::new(1, 0x1_0000),
    Region::new(1, 0x2_0000),
];

fn memory(layout: &[Region], fill: u8) -> Vec<u8> {
    let size: u32 = layout.iter().map(Region::size).sum();
    vec![fill; size as usize]
}

fn us_ticker(clock: &SimClock) -> SimTicker<'_> {
    SimTicker::new(
        clock,
        TickerInfo {
            frequency: 1_000_000,
            bits: 32,
        },
    )
}

fn suite<'a>(
    flash: SimFlash<'a>,
    clock: &'a SimClock,
    config: SuiteConfig,
) -> Suite<SimFlash<'a>, SimTicker<'a>, SimDelay<'a>> {
    Suite::with_config(flash, us_ticker(clock), SimDelay::new(clock), config)
}

#[test]
fn uniform_device_passes() {
    let mut mem = memory(&UNIFORM, 0x00);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE).unwrap();
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    let report = suite.run(&mut ());
    assert!(report.is_success());
    assert_eq!(report.passed, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 0);
    for case in Case::ALL {
        assert_eq!(report.status(case), Some(Status::Passed), "{}", case.name());
    }

    let flash = suite.flash();
    assert!(!flash.is_open());
    assert_eq!(flash.init_count(), 4);
    assert_eq!(flash.free_count(), 4);
    assert_eq!(flash.erase_count(), 3);
}

#[test]
fn mixed_sector_device_passes() {
    let mut mem = memory(&MIXED, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &MIXED, START, PAGE).unwrap();
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    let report = suite.run(&mut ());
    assert_eq!(report.passed, 5);
}

#[test]
fn last_sector_holds_second_pattern() {
    let mut mem = memory(&UNIFORM, 0x00);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE).unwrap();
    let mut suite = suite(flash, &clock, SuiteConfig::default());
    assert!(suite.run(&mut ()).is_success());

    let (flash, _, _) = suite.into_parts();
    let memory = flash.memory();
    let size = memory.len();
    let page = PAGE as usize;
    let last_sector = &memory[size - 0x1000..];
    let target = &memory[size - 2 * page..size - page];
    let last_page = &memory[size - page..];

    assert!(last_sector[..0x1000 - 2 * page].iter().all(|&b| b == ERASED));
    assert!(target.iter().all(|&b| b == SECOND_PATTERN));
    assert!(last_page.iter().all(|&b| b == ERASED));
    // The rest of the device was never touched
    assert!(memory[..size - 0x1000].iter().all(|&b| b == 0x00));
}

#[test]
fn erase_that_only_works_once_is_caught() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE)
        .unwrap()
        .with_faults(Faults {
            stale_erase: true,
            ..Faults::default()
        });
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    let report = suite.run(&mut ());
    assert_eq!(report.failed, 1);
    assert_eq!(report.status(Case::ProgramPage), Some(Status::Failed));

    let verdict = suite.run_case(Case::ProgramPage);
    let address = START + 16 * 0x1000 - 2 * PAGE;
    assert_eq!(
        verdict,
        Err(Error::Mismatch {
            address,
            expected: FIRST_PATTERN,
            actual: FIRST_PATTERN & SECOND_PATTERN,
        })
    );
    // The handle is released even though the case failed
    assert!(!suite.flash().is_open());
}

#[test]
fn second_cycle_catches_stale_erase() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE)
        .unwrap()
        .with_faults(Faults {
            stale_erase: true,
            ..Faults::default()
        });
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    // Without the erase case, the first erase of the round trip is the only working one
    assert_eq!(suite.init(), Ok(Outcome::Passed));
    assert_eq!(
        suite.program_page(),
        Err(Error::Mismatch {
            address: START + 16 * 0x1000 - 2 * PAGE,
            expected: SECOND_PATTERN,
            actual: FIRST_PATTERN & SECOND_PATTERN,
        })
    );
}

#[test]
fn failed_init_fails_every_flash_case() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE)
        .unwrap()
        .with_faults(Faults {
            fail_init: true,
            ..Faults::default()
        });
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    let report = suite.run(&mut ());
    assert_eq!(report.failed, 4);
    assert_eq!(report.passed, 1);
    assert_eq!(report.status(Case::ClockAndCache), Some(Status::Passed));
    assert_eq!(
        suite.run_case(Case::EraseSector),
        Err(Error::Flash(Operation::Init, SimError::InitFailed))
    );
    assert_eq!(suite.flash().free_count(), 0);
}

#[test]
fn failed_free_is_reported() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE)
        .unwrap()
        .with_faults(Faults {
            fail_free: true,
            ..Faults::default()
        });
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    assert_eq!(
        suite.run_case(Case::Init),
        Err(Error::Flash(Operation::Free, SimError::FreeFailed))
    );

    let report = suite.run(&mut ());
    assert_eq!(report.failed, 4);
    assert_eq!(report.status(Case::ClockAndCache), Some(Status::Passed));
    assert_eq!(suite.flash().free_count(), 0);
}

#[test]
fn misaligned_last_sector_is_not_erased() {
    // The last sector starts at 0x1000, which is not a multiple of its size
    static LAYOUT: [Region; 2] = [Region::new(1, 0x1000), Region::new(1, 0x3000)];
    let mut mem = memory(&LAYOUT, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &LAYOUT, 0, PAGE).unwrap();
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    assert_eq!(
        suite.erase_sector(),
        Err(Error::Geometry(GeometryViolation::Misaligned {
            address: 0x1000,
            sector_size: 0x3000,
        }))
    );

    let flash = suite.flash();
    assert_eq!(flash.erase_count(), 0);
    assert!(!flash.is_open());
}

#[test]
fn regions_inside_the_image_are_skipped() {
    let mut mem = memory(&UNIFORM, 0x5A);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE).unwrap();
    let image_end = START + 16 * 0x1000;
    let config = SuiteConfig {
        image: ImageBounds::new(image_end),
        ..SuiteConfig::default()
    };
    let mut suite = suite(flash, &clock, config);

    let report = suite.run(&mut ());
    assert!(report.is_success());
    assert_eq!(report.passed, 3);
    assert_eq!(report.skipped, 2);
    assert_eq!(
        suite.run_case(Case::EraseSector),
        Ok(Outcome::Skipped(SkipReason::OverlapsImage {
            region: START + 15 * 0x1000,
            image_end,
        }))
    );

    let flash = suite.flash();
    assert_eq!(flash.erase_count(), 0);
    assert!(!flash.is_open());
    assert_eq!(flash.init_count(), flash.free_count());
    assert!(flash.memory().iter().all(|&b| b == 0x5A));
}

#[test]
fn image_ending_before_the_last_sector_is_not_skipped() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE).unwrap();
    let config = SuiteConfig {
        image: ImageBounds::new(START + 15 * 0x1000),
        ..SuiteConfig::default()
    };
    let mut suite = suite(flash, &clock, config);

    assert_eq!(suite.erase_sector(), Ok(Outcome::Passed));
    assert_eq!(suite.program_page(), Ok(Outcome::Passed));
}

#[test]
fn clock_change_during_erase_is_caught() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE)
        .unwrap()
        .with_clock_side_effect(&clock, CYCLES_PER_TICK - 4);
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    let report = suite.run(&mut ());
    assert_eq!(report.failed, 1);
    assert_eq!(report.status(Case::ClockAndCache), Some(Status::Failed));

    match suite.run_case(Case::ClockAndCache) {
        Err(Error::Drift(drift)) => {
            assert!(drift.measured_us > drift.baseline_us);
            assert!(drift.deviation_us() > drift.allowed_us);
        }
        other => panic!("unexpected verdict {other:?}"),
    }
}

#[test]
fn drift_check_needs_a_baseline() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE).unwrap();
    let mut suite = suite(flash, &clock, SuiteConfig::default());

    assert_eq!(suite.clock_and_cache(), Err(Error::NoBaseline));
    assert_eq!(suite.drift().baseline(), None);
}

#[test]
fn page_larger_than_the_buffer_fails() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE).unwrap();
    let mut suite = suite(flash, &clock, SuiteConfig::default()).with_page_buffer::<128>();

    assert_eq!(
        suite.program_page(),
        Err(Error::BufferTooSmall {
            page_size: PAGE,
            capacity: 128,
        })
    );
    assert!(!suite.flash().is_open());
}

#[test]
fn custom_patterns_are_programmed() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE).unwrap();
    let config = SuiteConfig {
        first_pattern: 0x00,
        second_pattern: 0x55,
        ..SuiteConfig::default()
    };
    let mut suite = suite(flash, &clock, config);

    assert_eq!(suite.program_page(), Ok(Outcome::Passed));
    let memory = suite.flash().memory();
    let size = memory.len();
    assert!(memory[size - 2 * PAGE as usize..size - PAGE as usize]
        .iter()
        .all(|&b| b == 0x55));
}

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

impl Harness for Recorder {
    fn setup(&mut self, cases: usize) {
        self.events.push(format!("setup {cases}"));
    }

    fn case_started(&mut self, case: Case) {
        self.events.push(format!("start {}", case.name()));
    }

    fn case_finished<E: core::fmt::Debug>(&mut self, case: Case, verdict: &Verdict<E>) {
        let status = match verdict {
            Ok(Outcome::Passed) => "passed",
            Ok(Outcome::Skipped(_)) => "skipped",
            Err(_) => "failed",
        };
        self.events.push(format!("{status} {}", case.name()));
    }

    fn teardown(&mut self, report: &flash_conformance::Report) {
        self.events.push(format!(
            "teardown {}/{}/{}",
            report.passed, report.failed, report.skipped
        ));
    }
}

#[test]
fn harness_sees_every_case_in_order() {
    let mut mem = memory(&UNIFORM, ERASED);
    let clock = SimClock::new(CYCLES_PER_TICK);
    let flash = SimFlash::new(&mut mem, &UNIFORM, START, PAGE)
        .unwrap()
        .with_faults(Faults {
            stale_erase: true,
            ..Faults::default()
        });
    let mut suite = suite(flash, &clock, SuiteConfig::default());
    let mut recorder = Recorder::default();

    suite.run(&mut recorder);
    assert_eq!(
        recorder.events,
        [
            "setup 5",
            "start Flash - init",
            "passed Flash - init",
            "start Flash - mapping alignment",
            "passed Flash - mapping alignment",
            "start Flash - erase sector",
            "passed Flash - erase sector",
            "start Flash - program page",
            "failed Flash - program page",
            "start Flash - clock and cache test",
            "passed Flash - clock and cache test",
            "teardown 4/1/0",
        ]
    );
}
