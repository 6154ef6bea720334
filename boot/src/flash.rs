//! Flash programming and verification.
//!
//! The engine owns the flash controller and the layout of the application
//! region.  Every wait on the controller is bounded; running out of budget is
//! reported as [`FlashError::WriteTimeout`] rather than hanging.
//!
//! The last four bytes of the flash bank hold the firmware trailer, written by
//! the host as part of the image:
//!
//! ```text
//! +------------------+------------------+  <- end of bank
//! | length      u16  | crc         u16  |
//! +------------------+------------------+
//!  length_address     crc_address
//! ```
//!
//! Read as one little-endian word at `crc_address`, the length is the high
//! half and the CRC the low half.

use storage::FlashController;

use crate::bsp::{AppVectors, BspKind};
use crate::config::{MemoryMap, BUSY_WAIT_TICKS, MAX_WRITE_SIZE};
use crate::crc::crc16;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Bad write size, a destination outside the application region, or a
    /// trailer declaring more bytes than the region holds.
    AddressError,
    WriteTimeout,
    WriteError,
    /// Flash content does not match what was written, or the firmware CRC
    /// does not match the trailer.
    ReadError,
    EraseError,
}

/// Range errors from the argument checks all mean the same thing here.
impl From<storage::Error> for FlashError {
    fn from(_: storage::Error) -> Self {
        FlashError::AddressError
    }
}

pub type Result<T> = core::result::Result<T, FlashError>;

/// Outcome of a successful write.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Written {
    /// More of the image is expected.
    More,
    /// The write filled the bank up to and including the trailer, so the
    /// image is complete.
    LastAddress,
}

/// Where things are in the application region of one part.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FlashLayout {
    pub app_start: u32,
    /// Start of the trailer, the last word of the bank.
    pub crc_address: u32,
    /// The length half-word of the trailer, the last half-word of the bank.
    pub length_address: u32,
    /// Pages from `app_start` to the end of the bank.
    pub total_pages: u32,
}

impl FlashLayout {
    pub fn new(map: &MemoryMap, flash_size: u32) -> Result<FlashLayout> {
        let app_start = map.app_start();
        let end = map.flash_start.checked_add(flash_size).ok_or(FlashError::AddressError)?;
        storage::check_erase(app_start, end, map.page_size, app_start, end)?;

        let crc_address = end - 4;
        if crc_address <= app_start {
            return Err(FlashError::AddressError);
        }

        Ok(FlashLayout {
            app_start,
            crc_address,
            length_address: end - 2,
            total_pages: (end - app_start) / map.page_size,
        })
    }

    /// First address past the bank.
    pub fn end(&self) -> u32 {
        self.length_address + 2
    }

    /// Bytes from the application start up to the trailer.  No valid image
    /// can declare more than this.
    pub fn app_span(&self) -> u32 {
        self.crc_address - self.app_start
    }
}

pub struct FlashEngine<F> {
    controller: F,
    map: MemoryMap,
    layout: FlashLayout,
    busy_budget: u32,
}

impl<F: FlashController> FlashEngine<F> {
    /// Set up the layout for the flash fitted to the given board.  No
    /// hardware is touched.
    ///
    /// The controller's page size must agree with the memory map.
    pub fn init(controller: F, map: &MemoryMap, kind: BspKind) -> Result<FlashEngine<F>> {
        if controller.page_size() != map.page_size {
            warn!("controller page 0x{:x}, map page 0x{:x}", controller.page_size(), map.page_size);
            return Err(FlashError::AddressError);
        }
        let layout = FlashLayout::new(map, map.flash_size(kind))?;
        debug!(
            "flash layout: app 0x{:x}, trailer 0x{:x}, {} pages",
            layout.app_start,
            layout.crc_address,
            layout.total_pages
        );
        Ok(FlashEngine {
            controller,
            map: *map,
            layout,
            busy_budget: BUSY_WAIT_TICKS,
        })
    }

    /// Replace the number of polls allowed for each controller wait.
    pub fn with_busy_budget(mut self, busy_budget: u32) -> Self {
        self.busy_budget = busy_budget;
        self
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn controller(&self) -> &F {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut F {
        &mut self.controller
    }

    /// Erase the whole application region, trailer included.  Stops at the
    /// first failing page; the region must then be treated as garbage.  The
    /// controller is left unlocked either way.
    pub fn erase(&mut self) -> Result<()> {
        self.controller.unlock();
        let mut budget = self.busy_budget;
        while self.controller.is_locked() {
            if budget == 0 {
                warn!("flash did not unlock");
                return Err(FlashError::WriteTimeout);
            }
            budget -= 1;
        }

        let mut address = self.layout.app_start;
        for _ in 0..self.layout.total_pages {
            self.controller.clear_status();
            self.controller.start_page_erase(address);
            self.wait_idle()?;
            self.controller.finish_page_erase();

            if !self.controller.status().is_ok() {
                self.controller.clear_status();
                warn!("erase failed at 0x{:x}", address);
                return Err(FlashError::EraseError);
            }
            address += self.map.page_size;
        }

        info!("erased {} pages", self.layout.total_pages);
        Ok(())
    }

    /// Program `data` as packet `packet_index` of the image, that is at
    /// `app_start + packet_index * data.len()`, and read it back.
    ///
    /// The size must be even, non-zero and at most [`MAX_WRITE_SIZE`].
    pub fn write(&mut self, data: &[u8], packet_index: u16) -> Result<Written> {
        let size = data.len();
        if size == 0 || size > MAX_WRITE_SIZE || size % 2 != 0 {
            return Err(FlashError::AddressError);
        }
        let address = (packet_index as u32)
            .checked_mul(size as u32)
            .and_then(|offset| offset.checked_add(self.layout.app_start))
            .ok_or(FlashError::AddressError)?;
        storage::check_program(self.layout.app_start, self.layout.end(), address, size)?;

        self.controller.clear_status();
        let mut target = address;
        for half in data.chunks_exact(2) {
            self.controller.start_program(target, u16::from_le_bytes([half[0], half[1]]));
            self.wait_idle()?;
            self.controller.finish_program();

            if !self.controller.status().is_ok() {
                self.controller.clear_status();
                warn!("program failed at 0x{:x}", target);
                return Err(FlashError::WriteError);
            }
            target += 2;
        }

        let mut target = address;
        for half in data.chunks_exact(2) {
            if self.controller.read_half_word(target) != u16::from_le_bytes([half[0], half[1]]) {
                warn!("read back mismatch at 0x{:x}", target);
                return Err(FlashError::ReadError);
            }
            target += 2;
        }

        trace!("wrote packet {} at 0x{:x}", packet_index, address);
        if target == self.layout.end() {
            Ok(Written::LastAddress)
        } else {
            Ok(Written::More)
        }
    }

    pub fn lock(&mut self) {
        self.controller.lock();
    }

    /// Check the image against the CRC and length in the trailer.
    pub fn verify_firmware(&mut self) -> Result<()> {
        let trailer = self.controller.read_word(self.layout.crc_address);
        let length = (trailer >> 16) as u16;
        let expected = trailer as u16;

        // Never read past the trailer, whatever the trailer claims.
        if u32::from(length) > self.layout.app_span() {
            warn!("firmware length {} exceeds region", length);
            return Err(FlashError::AddressError);
        }

        let mut crc = 0;
        let mut offset = 0;
        while offset < u32::from(length) {
            let half = self.controller.read_half_word(self.layout.app_start + offset);
            crc = crc16(&half.to_le_bytes(), crc);
            offset += 2;
        }

        if crc != expected {
            warn!("firmware crc 0x{:x}, trailer says 0x{:x}", crc, expected);
            return Err(FlashError::ReadError);
        }
        info!("firmware verified, {} bytes", length);
        Ok(())
    }

    /// The application's vector table, as needed for the hand-off.
    pub fn application_vectors(&mut self) -> AppVectors {
        let table = self.layout.app_start;
        AppVectors {
            table,
            ram: self.map.sram_start,
            words: self.map.vector_table_words,
            stack_pointer: self.controller.read_word(table),
            reset_vector: self.controller.read_word(table + 4),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        let mut budget = self.busy_budget;
        while self.controller.is_busy() {
            if budget == 0 {
                warn!("flash busy timeout");
                return Err(FlashError::WriteTimeout);
            }
            budget -= 1;
        }
        Ok(())
    }
}
