//! The flash capability set consumed by the suite

use core::fmt::Debug;
use core::ops::{Deref, DerefMut};

/// Sector size reported for an address outside of the device
pub const INVALID_SIZE: u32 = u32::MAX;

/// A flash device as seen by the conformance suite.
///
/// Addresses are absolute, the device is mapped on `[start_address, start_address + size)`.
/// A failed call is the equivalent of a non zero status code.
pub trait FlashHal {
    type Error: Debug;

    /// Initialize the device, must be called before any erase, program or read
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Release the device
    fn free(&mut self) -> Result<(), Self::Error>;

    /// Smallest programmable unit, in bytes
    fn page_size(&self) -> u32;

    /// First mapped address
    fn start_address(&self) -> u32;

    /// Total mapped size, in bytes
    fn size(&self) -> u32;

    /// Size of the sector containing `address`, or [`INVALID_SIZE`] if it is not mapped
    fn sector_size(&self, address: u32) -> u32;

    /// Erase the sector starting at `address`
    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error>;

    /// Program whole pages starting at a page aligned `address`
    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Read `buff.len()` bytes from `address`
    fn read(&mut self, address: u32, buff: &mut [u8]) -> Result<(), Self::Error>;
}

impl<F: FlashHal + ?Sized> FlashHal for &mut F {
    type Error = F::Error;

    fn init(&mut self) -> Result<(), Self::Error> {
        (**self).init()
    }

    fn free(&mut self) -> Result<(), Self::Error> {
        (**self).free()
    }

    fn page_size(&self) -> u32 {
        (**self).page_size()
    }

    fn start_address(&self) -> u32 {
        (**self).start_address()
    }

    fn size(&self) -> u32 {
        (**self).size()
    }

    fn sector_size(&self, address: u32) -> u32 {
        (**self).sector_size(address)
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
        (**self).erase_sector(address)
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        (**self).program_page(address, data)
    }

    fn read(&mut self, address: u32, buff: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(address, buff)
    }
}

/// An initialized flash device.
///
/// Use [`FlashHandle::release`] to free the device and observe the status. A handle dropped
/// without being released, for instance on an early return, frees the device and discards the status.
pub struct FlashHandle<'a, F: FlashHal> {
    flash: &'a mut F,
    released: bool,
}

impl<'a, F: FlashHal> FlashHandle<'a, F> {
    /// Initialize the device
    pub fn open(flash: &'a mut F) -> Result<Self, F::Error> {
        flash.init()?;
        Ok(Self {
            flash,
            released: false,
        })
    }

    /// Free the device
    pub fn release(mut self) -> Result<(), F::Error> {
        self.released = true;
        self.flash.free()
    }
}

impl<F: FlashHal> Deref for FlashHandle<'_, F> {
    type Target = F;

    fn deref(&self) -> &F {
        self.flash
    }
}

impl<F: FlashHal> DerefMut for FlashHandle<'_, F> {
    fn deref_mut(&mut self) -> &mut F {
        self.flash
    }
}

impl<F: FlashHal> Drop for FlashHandle<'_, F> {
    fn drop(&mut self) {
        if !self.released {
            let _res = self.flash.free();
            #[cfg(feature = "defmt")]
            if _res.is_err() {
                defmt::warn!("Flash free failed while dropping the handle");
            }
        }
    }
}
