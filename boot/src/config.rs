//! Board configuration.
//!
//! The memory layout of the part and the tick budgets of each transport.
//! Nothing in the core hard-codes these; a board picks one of the maps below
//! (or supplies its own) and hands it to the flash engine.

use crate::bsp::{BspKind, Timing};

/// Largest single flash write, in bytes.
pub const MAX_WRITE_SIZE: usize = 1024;

/// Polls allowed for the flash controller to finish one erase or program,
/// and for the lock bit to clear after unlocking.
pub const BUSY_WAIT_TICKS: u32 = 300_000;

/// Flash capacity of one chip variant.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Capacity {
    pub kind: BspKind,
    pub flash_size: u32,
}

/// Memory layout of a part.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryMap {
    /// Absolute start of program flash.
    pub flash_start: u32,
    /// Size of one erasable page.
    pub page_size: u32,
    /// Flash reserved for the bootloader itself.  The application starts
    /// right after it.
    pub bootloader_size: u32,
    /// Absolute start of SRAM.  The application vector table is copied here.
    pub sram_start: u32,
    /// Size of the application vector table, in words.
    pub vector_table_words: usize,
    /// Boards whose part has a flash size other than `default_flash_size`.
    pub capacities: &'static [Capacity],
    pub default_flash_size: u32,
}

impl MemoryMap {
    pub const fn app_start(&self) -> u32 {
        self.flash_start + self.bootloader_size
    }

    /// Flash capacity of the part fitted to the given board.
    pub fn flash_size(&self, kind: BspKind) -> u32 {
        self.capacities
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.flash_size)
            .unwrap_or(self.default_flash_size)
    }
}

pub const FLASH_SIZE_16K: u32 = 0x4000;
pub const FLASH_SIZE_32K: u32 = 0x8000;

/// STM32F0 family.  The Pilot carries an STM32F031G4 with 16k of flash, every
/// other board an STM32F031G6 or STM32F042K6 with 32k.
pub static STM32F0: MemoryMap = MemoryMap {
    flash_start: 0x0800_0000,
    page_size: 0x400,
    bootloader_size: 0x1000,
    sram_start: 0x2000_0000,
    vector_table_words: 0xc0 / 4,
    capacities: &[Capacity { kind: BspKind::Pilot, flash_size: FLASH_SIZE_16K }],
    default_flash_size: FLASH_SIZE_32K,
};

/// Budgets for the UART boards.
pub static UART_TIMING: Timing = Timing {
    boot_timeout_ticks: 300_000,
    app_start_ticks: 200_000,
    comm_done_ticks: 20_000,
    two_bytes_ticks: 0x1ff,
};

/// Budgets for the SPI slave (external watchdog) board.  The host clocks
/// every byte, so the bootloader can give up on a silent master sooner.
pub static SPI_TIMING: Timing = Timing {
    boot_timeout_ticks: 300_000,
    app_start_ticks: 100_000,
    comm_done_ticks: 5_000,
    two_bytes_ticks: 0x1ff,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacities() {
        assert_eq!(STM32F0.flash_size(BspKind::Pilot), FLASH_SIZE_16K);
        assert_eq!(STM32F0.flash_size(BspKind::TorqueSensor), FLASH_SIZE_32K);
        assert_eq!(STM32F0.flash_size(BspKind::ExtWatchdog), FLASH_SIZE_32K);
        assert_eq!(STM32F0.flash_size(BspKind::Unknown), FLASH_SIZE_32K);
    }

    #[test]
    fn app_start() {
        assert_eq!(STM32F0.app_start(), 0x0800_1000);
    }
}
