//! STM32F0 program flash controller.
//!
//! Maps the [`FlashController`] operations onto the FLASH peripheral
//! registers.  Program memory itself is read through the bus.  Nothing here
//! waits; the engine in `boot` polls `is_busy` with its own budget.
//!
//! The HAL has no driver for writing program memory, so this takes the raw
//! peripheral after the clocks have been configured.

use hal::pac::FLASH;
use stm32f0xx_hal as hal;
use storage::{FlashController, Status};

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xcdef_89ab;

// FLASH_SR
const SR_BSY: u32 = 1 << 0;
const SR_PGERR: u32 = 1 << 2;
const SR_WRPRT: u32 = 1 << 4;
const SR_EOP: u32 = 1 << 5;

// FLASH_CR
const CR_PG: u32 = 1 << 0;
const CR_PER: u32 = 1 << 1;
const CR_STRT: u32 = 1 << 6;
const CR_LOCK: u32 = 1 << 7;

const PAGE_SIZE: u32 = 0x400;

pub struct Stm32Flash {
    raw: FLASH,
}

impl Stm32Flash {
    pub fn new(raw: FLASH) -> Stm32Flash {
        Stm32Flash { raw }
    }

    fn sr(&self) -> u32 {
        self.raw.sr.read().bits()
    }

    fn set_cr(&mut self, bits: u32) {
        self.raw.cr.modify(|r, w| unsafe { w.bits(r.bits() | bits) });
    }

    fn clear_cr(&mut self, bits: u32) {
        self.raw.cr.modify(|r, w| unsafe { w.bits(r.bits() & !bits) });
    }
}

impl FlashController for Stm32Flash {
    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn unlock(&mut self) {
        if self.raw.cr.read().bits() & CR_LOCK != 0 {
            self.raw.keyr.write(|w| unsafe { w.bits(KEY1) });
            self.raw.keyr.write(|w| unsafe { w.bits(KEY2) });
        }
    }

    fn is_locked(&mut self) -> bool {
        self.raw.cr.read().bits() & CR_LOCK != 0
    }

    fn lock(&mut self) {
        self.set_cr(CR_LOCK);
    }

    fn is_busy(&mut self) -> bool {
        self.sr() & SR_BSY != 0
    }

    fn status(&mut self) -> Status {
        let sr = self.sr();
        Status {
            program_error: sr & SR_PGERR != 0,
            write_protect_error: sr & SR_WRPRT != 0,
        }
    }

    fn clear_status(&mut self) {
        // Write one to clear.
        self.raw.sr.write(|w| unsafe { w.bits(SR_PGERR | SR_WRPRT | SR_EOP) });
    }

    fn start_page_erase(&mut self, address: u32) {
        self.set_cr(CR_PER);
        self.raw.ar.write(|w| unsafe { w.bits(address) });
        self.set_cr(CR_STRT);
    }

    fn finish_page_erase(&mut self) {
        self.clear_cr(CR_PER);
    }

    fn start_program(&mut self, address: u32, value: u16) {
        self.set_cr(CR_PG);
        unsafe {
            core::ptr::write_volatile(address as *mut u16, value);
        }
    }

    fn finish_program(&mut self) {
        self.clear_cr(CR_PG);
    }

    fn read_half_word(&mut self, address: u32) -> u16 {
        unsafe { core::ptr::read_volatile(address as *const u16) }
    }
}
