#![no_std]
//! A platform agnostic conformance suite for microcontroller flash drivers.
//!
//! The suite talks to the driver under test through the [`FlashHal`] capability set and
//! checks, in order:
//! * that the device can be initialized and freed,
//! * that the sector map is consistent (sizes, alignment, unmapped addresses),
//! * that the last sector can be erased,
//! * that a page survives two erase/program/read cycles with different patterns,
//! * that exercising the driver did not change the CPU clock or cache configuration.
//!
//! Any [embedded-storage](https://github.com/rust-embedded-community/embedded-storage) flash can
//! be checked through [`blocking::NorFlashHal`], async ones through
//! [`asynchronous::BlockingNorFlash`]. With the `sim` feature, the `sim` module provides host
//! doubles of a flash device and a tick counter.

pub mod asynchronous;
pub mod blocking;
pub mod drift;
pub mod error;
pub mod geometry;
pub mod hal;
pub mod image;
pub mod pwm;
#[cfg(feature = "sim")]
pub mod sim;
pub mod suite;
pub mod ticker;

pub use crate::error::{DriverError, Error, GeometryViolation, Operation};
pub use crate::hal::{FlashHal, FlashHandle, INVALID_SIZE};
pub use crate::suite::{Case, Harness, Outcome, Report, SkipReason, Suite, SuiteConfig};

/// Number of delay loop iterations used for the timing measurement
pub const TEST_CYCLES: u32 = 10_000_000;

/// The allowed drift is `baseline / DRIFT_DIVISOR`, that is 0.5%
pub const DRIFT_DIVISOR: u32 = 1_000_000 / 5_000;

/// Minimum number of ticks left before a counter wrap to start a measurement
pub const OVERFLOW_WINDOW: u32 = 35_000;

/// First pattern programmed by the round-trip check
pub const FIRST_PATTERN: u8 = 0xCE;

/// Second pattern programmed by the round-trip check
pub const SECOND_PATTERN: u8 = 0xAC;

/// Round `address` down to a multiple of `size`. `size` does not need to be a power of two.
pub const fn align_down(address: u32, size: u32) -> u32 {
    if size == 0 {
        return address;
    }
    address - address % size
}

/// Translate an absolute access of `length` bytes into an offset from `start`
pub(crate) fn check_access<E>(
    start: u32,
    capacity: usize,
    address: u32,
    length: usize,
) -> Result<u32, DriverError<E>> {
    let capacity = capacity as u32;
    let length = length as u32;
    let offset = address.checked_sub(start).ok_or(DriverError::OutOfBounds)?;
    if length > capacity || offset > capacity - length {
        return Err(DriverError::OutOfBounds);
    }
    Ok(offset)
}

/// Same as [`check_access`] but the access must also be aligned to `granule`
pub(crate) fn check_aligned<E>(
    start: u32,
    capacity: usize,
    address: u32,
    length: usize,
    granule: u32,
) -> Result<u32, DriverError<E>> {
    let offset = check_access(start, capacity, address, length)?;
    if granule == 0 || offset % granule != 0 || length as u32 % granule != 0 {
        return Err(DriverError::NotAligned);
    }
    Ok(offset)
}
