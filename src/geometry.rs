//! Sector map of a flash device and its conformance check

use crate::{align_down, error::GeometryViolation, hal::FlashHal, INVALID_SIZE};

/// Static description of a device, queried once from the driver
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub start: u32,
    pub size: u32,
    pub page_size: u32,
}

impl Geometry {
    pub fn query<F: FlashHal + ?Sized>(flash: &F) -> Self {
        Self {
            start: flash.start_address(),
            size: flash.size(),
            page_size: flash.page_size(),
        }
    }

    /// Last mapped address, fails on an empty device or one that does not fit in 32 bits
    pub fn last_address(&self) -> Result<u32, GeometryViolation> {
        let empty = GeometryViolation::EmptyDevice {
            start: self.start,
            size: self.size,
        };
        if self.size == 0 {
            return Err(empty);
        }
        self.start.checked_add(self.size - 1).ok_or(empty)
    }

    pub fn contains(&self, address: u32) -> bool {
        match self.last_address() {
            Ok(last) => address >= self.start && address <= last,
            Err(_) => false,
        }
    }
}

/// An erasable unit of the device
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    pub start: u32,
    pub size: u32,
}

impl Sector {
    /// The sector holding `address`, aligned down to the size the driver reports for it
    pub fn containing<F: FlashHal + ?Sized>(
        flash: &F,
        address: u32,
    ) -> Result<Self, GeometryViolation> {
        let size = flash.sector_size(address);
        match size {
            INVALID_SIZE => Err(GeometryViolation::Unmapped { address }),
            0 => Err(GeometryViolation::ZeroSectorSize { address }),
            size => Ok(Self {
                start: align_down(address, size),
                size,
            }),
        }
    }

    /// The sector holding the last mapped address.
    ///
    /// The start is derived from the size reported for the last address, it is not aligned
    /// down: a device whose last sector is misaligned yields a misaligned sector.
    pub fn last<F: FlashHal + ?Sized>(flash: &F) -> Result<Self, GeometryViolation> {
        let last = Geometry::query(flash).last_address()?;
        let size = Self::containing(flash, last)?.size;
        let start = last
            .checked_sub(size - 1)
            .ok_or(GeometryViolation::Misaligned {
                address: last,
                sector_size: size,
            })?;
        Ok(Self { start, size })
    }

    /// Last address of the sector
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.size - 1)
    }

    pub fn is_aligned(&self) -> bool {
        self.size != 0 && self.start % self.size == 0
    }
}

/// Walk the whole device and verify every sector.
///
/// The sector size is queried again at each step, devices may mix sector sizes.
pub fn check_layout<F: FlashHal + ?Sized>(flash: &F) -> Result<(), GeometryViolation> {
    let geometry = Geometry::query(flash);
    if geometry.page_size == 0 {
        return Err(GeometryViolation::ZeroPageSize);
    }
    let last = geometry.last_address()?;

    let mut address = geometry.start;
    loop {
        let sector_size = check_sector(flash, address, geometry.page_size)?;
        #[cfg(feature = "defmt")]
        defmt::trace!("Sector {=u32:#x}, size {=u32:#x}", address, sector_size);

        // Sector sizes are checked to be non zero above, the walk always advances
        match address.checked_add(sector_size) {
            Some(next) if next <= last => address = next,
            _ => break,
        }
    }

    check_unmapped(flash, &geometry, last)
}

fn check_sector<F: FlashHal + ?Sized>(
    flash: &F,
    address: u32,
    page_size: u32,
) -> Result<u32, GeometryViolation> {
    let sector_size = flash.sector_size(address);
    if sector_size == INVALID_SIZE {
        return Err(GeometryViolation::Unmapped { address });
    }
    if sector_size == 0 {
        return Err(GeometryViolation::ZeroSectorSize { address });
    }
    if sector_size % page_size != 0 {
        return Err(GeometryViolation::NotPageMultiple {
            address,
            sector_size,
            page_size,
        });
    }
    if address % sector_size != 0 {
        return Err(GeometryViolation::Misaligned {
            address,
            sector_size,
        });
    }

    let sector = Sector {
        start: address,
        size: sector_size,
    };
    for probe in [sector.start.saturating_add((sector_size - 1) / 2), sector.end()] {
        let reported = flash.sector_size(probe);
        if reported != sector_size {
            return Err(GeometryViolation::InconsistentSize {
                address: probe,
                sector_size,
                reported,
            });
        }
    }
    Ok(sector_size)
}

fn check_unmapped<F: FlashHal + ?Sized>(
    flash: &F,
    geometry: &Geometry,
    last: u32,
) -> Result<(), GeometryViolation> {
    // The probes wrap around the address space, a device at 0 is probed at `u32::MAX`
    let outside = [geometry.start.wrapping_sub(1), last.wrapping_add(1)];
    for address in outside {
        if geometry.contains(address) {
            continue;
        }
        let reported = flash.sector_size(address);
        if reported != INVALID_SIZE {
            return Err(GeometryViolation::MappedOutside { address, reported });
        }
    }
    Ok(())
}
