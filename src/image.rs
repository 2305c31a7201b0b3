//! Bounds of the running program, erasing or programming below them would destroy it

/// End of the flash region occupied by the running image (code plus `.data` initializers)
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageBounds {
    end: u32,
}

impl ImageBounds {
    /// Image ending right before `end`
    pub const fn new(end: u32) -> Self {
        Self { end }
    }

    /// No image in the device under test, e.g. an external flash or a host simulation
    pub const fn none() -> Self {
        Self { end: 0 }
    }

    /// Reads the bounds from the symbols of the `cortex-m-rt` linker script.
    ///
    /// The `.data` initializers are stored right after the code at `__sidata`, the image
    /// ends after them.
    #[cfg(feature = "link-symbols")]
    pub fn from_linker() -> Self {
        extern "C" {
            static __sidata: u32;
            static __sdata: u32;
            static __edata: u32;
        }

        // SAFETY: only the addresses of the linker symbols are taken, they are never read
        let (load, start, end) = unsafe {
            (
                core::ptr::addr_of!(__sidata) as u32,
                core::ptr::addr_of!(__sdata) as u32,
                core::ptr::addr_of!(__edata) as u32,
            )
        };
        Self::new(load.wrapping_add(end.wrapping_sub(start)))
    }

    pub const fn end(&self) -> u32 {
        self.end
    }

    /// A region starting at `region_start` overlaps the image
    pub const fn overlaps(&self, region_start: u32) -> bool {
        region_start < self.end
    }
}
