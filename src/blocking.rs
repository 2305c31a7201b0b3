use crate::{check_access, check_aligned, error::DriverError, hal::FlashHal, INVALID_SIZE};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

/// Exposes an `embedded-storage` [`NorFlash`] mapped at `start` as a [`FlashHal`].
///
/// Every sector is `ERASE_SIZE` bytes. The page size defaults to `WRITE_SIZE` and can be
/// raised with [`NorFlashHal::with_page_size`].
pub struct NorFlashHal<F> {
    flash: F,
    start: u32,
    page_size: u32,
    open: bool,
}

impl<F, E> NorFlashHal<F>
where
    F: NorFlash<Error = E>,
{
    /// Create a new instance
    pub fn new(flash: F, start: u32) -> Self {
        Self {
            flash,
            start,
            page_size: F::WRITE_SIZE as u32,
            open: false,
        }
    }

    /// Program in units of `page_size` bytes, which must be a multiple of `WRITE_SIZE` and divide `ERASE_SIZE`
    pub fn with_page_size(mut self, page_size: u32) -> Result<Self, DriverError<E>> {
        let write_size = F::WRITE_SIZE as u32;
        let erase_size = F::ERASE_SIZE as u32;
        if page_size == 0 || page_size % write_size != 0 || erase_size % page_size != 0 {
            return Err(DriverError::Value);
        }
        self.page_size = page_size;
        Ok(self)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn ensure_open(&self) -> Result<(), DriverError<E>> {
        if !self.open {
            return Err(DriverError::Closed);
        }
        Ok(())
    }
}

impl<F, E> FlashHal for NorFlashHal<F>
where
    F: NorFlash<Error = E>,
    E: core::fmt::Debug,
{
    type Error = DriverError<E>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.open = true;
        Ok(())
    }

    fn free(&mut self) -> Result<(), Self::Error> {
        self.ensure_open()?;
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
        ReadNorFlash::capacity(&self.flash) as u32
    }

    fn sector_size(&self, address: u32) -> u32 {
        match check_access::<E>(self.start, ReadNorFlash::capacity(&self.flash), address, 1) {
            Ok(_) => F::ERASE_SIZE as u32,
            Err(_) => INVALID_SIZE,
        }
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), Self::Error> {
        self.ensure_open()?;
        let erase_size = F::ERASE_SIZE as u32;
        let from = check_aligned(
            self.start,
            ReadNorFlash::capacity(&self.flash),
            address,
            F::ERASE_SIZE,
            erase_size,
        )?;
        #[cfg(feature = "defmt")]
        defmt::debug!("Erase sector {=u32:#x}", address);
        NorFlash::erase(&mut self.flash, from, from + erase_size).map_err(DriverError::Storage)
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.ensure_open()?;
        let offset = check_aligned(
            self.start,
            ReadNorFlash::capacity(&self.flash),
            address,
            data.len(),
            self.page_size,
        )?;
        #[cfg(feature = "defmt")]
        defmt::debug!("Program {=usize} bytes at {=u32:#x}", data.len(), address);
        NorFlash::write(&mut self.flash, offset, data).map_err(DriverError::Storage)
    }

    fn read(&mut self, address: u32, buff: &mut [u8]) -> Result<(), Self::Error> {
        self.ensure_open()?;
        let offset = check_access(
            self.start,
            ReadNorFlash::capacity(&self.flash),
            address,
            buff.len(),
        )?;
        ReadNorFlash::read(&mut self.flash, offset, buff).map_err(DriverError::Storage)
    }
}
