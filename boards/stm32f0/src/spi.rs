//! SPI1 slave transport, for the external watchdog.
//!
//! The watchdog is the bus master and clocks every byte, so the bootloader
//! only ever sees one byte per poll at most.  Received bytes go straight into
//! the caller's buffer, at an index that survives between polls.
//!
//! The HAL only drives SPI as a master, so the peripheral is set up here from
//! its registers.  Pins must already be in alternate function 0.

use boot::bsp::{Bsp, BspKind, Result, Timing, TransportError};
use boot::config::BUSY_WAIT_TICKS;
use hal::pac::{RCC, SPI1};
use stm32f0xx_hal as hal;

// SPI_CR1
const CR1_CPOL: u32 = 1 << 1;
const CR1_SPE: u32 = 1 << 6;

// SPI_CR2: 8 bit frames, RXNE at a quarter full FIFO.
const CR2_DS_8BIT: u32 = 0b0111 << 8;
const CR2_FRXTH: u32 = 1 << 12;

// SPI_SR
const SR_RXNE: u32 = 1 << 0;
const SR_TXE: u32 = 1 << 1;
const SR_OVR: u32 = 1 << 6;

/// Idle polls tolerated in the middle of a payload.
const IDLE_LIMIT: u16 = 0x1ff;

pub struct SpiSlave {
    spi: SPI1,
    timing: Timing,
    index: usize,
    idle: u16,
}

impl SpiSlave {
    pub fn new(spi: SPI1, timing: Timing) -> SpiSlave {
        SpiSlave {
            spi,
            timing,
            index: 0,
            idle: 0,
        }
    }

    fn sr(&self) -> u32 {
        self.spi.sr.read().bits()
    }

    /// DR has to be accessed as a byte, or the FIFO packs two frames.
    fn read_dr(&self) -> u8 {
        unsafe { core::ptr::read_volatile(&self.spi.dr as *const _ as *const u8) }
    }

    fn write_dr(&mut self, byte: u8) {
        unsafe { core::ptr::write_volatile(&self.spi.dr as *const _ as *mut u8, byte) }
    }

    /// Reading DR then SR clears an overrun.
    fn clear_overrun(&mut self) {
        while self.sr() & SR_OVR != 0 {
            let _ = self.read_dr();
            let _ = self.sr();
        }
    }
}

impl Bsp for SpiSlave {
    fn kind(&self) -> BspKind {
        BspKind::ExtWatchdog
    }

    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn init(&mut self) -> Result<()> {
        // RCC belongs to the HAL by now.
        unsafe {
            (*RCC::ptr()).apb2enr.modify(|_, w| w.spi1en().set_bit());
        }
        self.spi.cr2.write(|w| unsafe { w.bits(CR2_FRXTH | CR2_DS_8BIT) });
        // Slave mode is MSTR clear.
        self.spi.cr1.write(|w| unsafe { w.bits(CR1_SPE | CR1_CPOL) });
        self.index = 0;
        self.idle = 0;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        for byte in data {
            let mut budget = BUSY_WAIT_TICKS;
            while self.sr() & SR_TXE == 0 {
                if budget == 0 {
                    return Err(TransportError::XmitTimeout);
                }
                budget -= 1;
            }
            self.write_dr(*byte);
            if self.sr() & SR_OVR != 0 {
                let _ = self.read_dr();
                let _ = self.sr();
            }
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.sr() & SR_RXNE != 0 {
            let byte = self.read_dr();
            if let Some(slot) = buf.get_mut(self.index) {
                *slot = byte;
                self.index += 1;
            }
            self.idle = 0;
        } else if buf.len() > 2 {
            self.idle += 1;
            if self.idle > IDLE_LIMIT {
                self.idle = 0;
                self.reset()?;
                return Err(TransportError::RecvTimeout);
            }
        }

        if self.index >= buf.len() {
            self.index = 0;
            self.clear_overrun();
            return Ok(());
        }
        Err(TransportError::Busy)
    }

    fn reset(&mut self) -> Result<()> {
        self.index = 0;
        self.clear_overrun();
        Ok(())
    }
}
