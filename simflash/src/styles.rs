//! Flash styles
//!
//! The chip variants fitted to the supported boards.  They share the STM32F0
//! page size and memory map, and differ in capacity.

use boot::config::STM32F0;
use boot::BspKind;

use crate::Result;
use crate::SimFlash;

/// One board and the flash of the part it carries.
pub struct ChipStyle {
    pub name: &'static str,
    pub kind: BspKind,
    pub flash_size: u32,
}

impl ChipStyle {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(STM32F0.flash_start, STM32F0.page_size, self.flash_size)
    }
}

/// STM32F031G4 on the Pilot board.  16k, of which 12 pages are application.
pub static F031X4_PILOT: ChipStyle = ChipStyle {
    name: "STM32F031G4 (pilot)",
    kind: BspKind::Pilot,
    flash_size: 0x4000,
};

/// STM32F031G6 on the torque sensor.  32k.
pub static F031X6_TORQUE: ChipStyle = ChipStyle {
    name: "STM32F031G6 (torque sensor)",
    kind: BspKind::TorqueSensor,
    flash_size: 0x8000,
};

/// STM32F042K6 behind the external watchdog SPI link.  32k.
pub static F042X6_WATCHDOG: ChipStyle = ChipStyle {
    name: "STM32F042K6 (external watchdog)",
    kind: BspKind::ExtWatchdog,
    flash_size: 0x8000,
};

pub static ALL_STYLES: [&ChipStyle; 3] = [&F031X4_PILOT, &F031X6_TORQUE, &F042X6_WATCHDOG];

/// Every style, paired with a freshly built flash.
pub fn all_flashes() -> impl Iterator<Item = Result<(&'static ChipStyle, SimFlash)>> {
    ALL_STYLES.iter().map(|style| Ok((*style, style.build()?)))
}
