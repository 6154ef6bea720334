//! Hand-off to the application.
//!
//! The Cortex-M0 has no VTOR, so the application's vector table is copied to
//! the start of SRAM and SRAM is remapped to address zero before the jump.

use boot::{AppVectors, HandOff};
use hal::pac::{RCC, SYSCFG};
use stm32f0xx_hal as hal;

// SYSCFG_CFGR1
const MEM_MODE_MASK: u32 = 0b11;
const MEM_MODE_SRAM: u32 = 0b11;

pub struct RamVectors {
    syscfg: SYSCFG,
}

impl RamVectors {
    pub fn new(syscfg: SYSCFG) -> RamVectors {
        RamVectors { syscfg }
    }
}

impl HandOff for RamVectors {
    fn start_application(&mut self, app: &AppVectors) -> ! {
        cortex_m::interrupt::disable();

        let table = app.table as *const u32;
        let ram = app.ram as *mut u32;
        for i in 0..app.words {
            unsafe {
                let word = core::ptr::read_volatile(table.add(i));
                core::ptr::write_volatile(ram.add(i), word);
            }
        }

        unsafe {
            (*RCC::ptr()).apb2enr.modify(|_, w| w.syscfgen().set_bit());
        }
        self.syscfg
            .cfgr1
            .modify(|r, w| unsafe { w.bits((r.bits() & !MEM_MODE_MASK) | MEM_MODE_SRAM) });

        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        // Loads MSP from word 0 and branches to word 1 of the copy.
        unsafe { cortex_m::asm::bootload(ram as *const u32) }
    }
}
