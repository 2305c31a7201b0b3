//! Support for flash drivers only exposing the `embedded-storage-async` traits.
//!
//! The suite is a blocking, run to completion program. [`BlockingNorFlash`] drives each async
//! operation to completion with [`embassy_futures::block_on`], which makes it usable with
//! [`NorFlashHal`](crate::blocking::NorFlashHal):
//!
//! ```ignore
//! let flash = NorFlashHal::new(BlockingNorFlash::new(async_flash), 0);
//! ```

use embassy_futures::block_on;
use embedded_storage::nor_flash::{self as blocking, ErrorType};
use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};

/// Type alias for an async flash checked through the blocking adapter
pub type AsyncNorFlashHal<F> = crate::blocking::NorFlashHal<BlockingNorFlash<F>>;

/// Blocking view of an async NOR flash
pub struct BlockingNorFlash<F> {
    flash: F,
}

impl<F> BlockingNorFlash<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn inner(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F: ErrorType> ErrorType for BlockingNorFlash<F> {
    type Error = F::Error;
}

impl<F: ReadNorFlash> blocking::ReadNorFlash for BlockingNorFlash<F> {
    const READ_SIZE: usize = F::READ_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        block_on(self.flash.read(offset, bytes))
    }

    fn capacity(&self) -> usize {
        self.flash.capacity()
    }
}

impl<F: NorFlash> blocking::NorFlash for BlockingNorFlash<F> {
    const WRITE_SIZE: usize = F::WRITE_SIZE;
    const ERASE_SIZE: usize = F::ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        #[cfg(feature = "defmt")]
        defmt::trace!("Blocking on erase {=u32:#x}..{=u32:#x}", from, to);
        block_on(self.flash.erase(from, to))
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        block_on(self.flash.write(offset, bytes))
    }
}
