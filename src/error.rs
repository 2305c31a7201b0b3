use crate::drift::Drift;

/// The driver call that reported a failure
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Free,
    EraseSector,
    ProgramPage,
    Read,
}

/// A broken invariant of the sector map
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryViolation {
    /// The device reports a page size of zero
    ZeroPageSize,

    /// The device reports a total size of zero, or its range does not fit in 32 bits
    EmptyDevice { start: u32, size: u32 },

    /// The device is too small for the check, `required` bytes are needed
    TooSmall { size: u32, required: u32 },

    /// A mapped address reports the invalid size sentinel
    Unmapped { address: u32 },

    /// A sector reports a size of zero
    ZeroSectorSize { address: u32 },

    /// A sector is not a whole number of pages
    NotPageMultiple { address: u32, sector_size: u32, page_size: u32 },

    /// A sector does not start on a multiple of its own size
    Misaligned { address: u32, sector_size: u32 },

    /// Two addresses of the same sector report different sizes
    InconsistentSize { address: u32, sector_size: u32, reported: u32 },

    /// An address outside of the device reports a real size
    MappedOutside { address: u32, reported: u32 },
}

/// All possible failures of a conformance case
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<FlashError> {
    /// The driver returned a non zero status
    Flash(Operation, FlashError),

    /// Read back data differs from what was programmed
    Mismatch { address: u32, expected: u8, actual: u8 },

    /// The sector map is inconsistent
    Geometry(GeometryViolation),

    /// The timing measurement left the allowed band
    Drift(Drift),

    /// The drift was checked before a baseline was captured
    NoBaseline,

    /// The page does not fit in the suite's buffers
    BufferTooSmall { page_size: u32, capacity: usize },
}

impl<E> Error<E> {
    /// Builds the mapping used with `map_err` for a failed driver call
    pub fn flash(operation: Operation) -> impl FnOnce(E) -> Self {
        move |e| Error::Flash(operation, e)
    }
}

impl<E> From<GeometryViolation> for Error<E> {
    fn from(violation: GeometryViolation) -> Self {
        Error::Geometry(violation)
    }
}

/// Errors emitted by the `embedded-storage` adapters
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError<StorageError> {
    /// Internal storage error
    Storage(StorageError),

    /// Invalid value passed
    Value,

    /// Address out of bound
    OutOfBounds,

    /// Address not aligned
    NotAligned,

    /// The device was used or freed without being initialized
    Closed,
}

mod es {
    use super::*;
    use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

    impl<E> From<NorFlashErrorKind> for DriverError<E> {
        fn from(e: NorFlashErrorKind) -> Self {
            match e {
                NorFlashErrorKind::NotAligned => DriverError::NotAligned,
                NorFlashErrorKind::OutOfBounds => DriverError::OutOfBounds,
                _ => DriverError::Value,
            }
        }
    }

    impl<StorageError> NorFlashError for DriverError<StorageError>
    where
        StorageError: NorFlashError,
    {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                DriverError::Storage(e) => e.kind(),
                DriverError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
                DriverError::NotAligned => NorFlashErrorKind::NotAligned,
                DriverError::Value | DriverError::Closed => NorFlashErrorKind::Other,
            }
        }
    }
}
