#![no_main]
#![no_std]

#[cfg(feature = "rtt")]
use defmt_rtt as _;
#[cfg(feature = "rtt")]
use panic_probe as _;
#[cfg(feature = "semihosting")]
extern crate panic_semihosting;

#[cfg(not(any(feature = "pilot", feature = "torque", feature = "watchdog")))]
compile_error!("select a board: pilot, torque or watchdog");

#[cfg(any(
    all(feature = "pilot", feature = "torque"),
    all(feature = "pilot", feature = "watchdog"),
    all(feature = "torque", feature = "watchdog"),
))]
compile_error!("select only one board");

#[cfg(all(feature = "rtt", feature = "semihosting"))]
compile_error!("rtt and semihosting both provide a panic handler");

#[cfg(feature = "rtt")]
macro_rules! log {
    ($($t:tt)*) => { defmt::info!($($t)*) };
}

#[cfg(feature = "semihosting")]
macro_rules! log {
    ($($t:tt)*) => { cortex_m_semihosting::hprintln!($($t)*) };
}

#[cfg(not(any(feature = "rtt", feature = "semihosting")))]
macro_rules! log {
    ($($t:tt)*) => {};
}

mod flash;
mod launch;
#[cfg(feature = "watchdog")]
mod spi;
#[cfg(any(feature = "pilot", feature = "torque"))]
mod usart;

use boot::config::STM32F0;
use boot::{Bsp, FlashEngine};
use cortex_m_rt::entry;
use hal::pac;
use hal::prelude::*;
use stm32f0xx_hal as hal;

use crate::flash::Stm32Flash;
use crate::launch::RamVectors;

#[entry]
fn main() -> ! {
    let Some(mut dp) = pac::Peripherals::take() else {
        panic!("peripherals already taken");
    };

    // - clocks ---------------------------------------------------------------

    let mut rcc = dp.RCC.configure().sysclk(48.mhz()).freeze(&mut dp.FLASH);

    // - transport ------------------------------------------------------------

    let gpioa = dp.GPIOA.split(&mut rcc);

    #[cfg(any(feature = "pilot", feature = "torque"))]
    let mut link = {
        use boot::config::UART_TIMING;
        use boot::BspKind;
        use hal::serial::Serial;

        #[cfg(feature = "pilot")]
        let (kind, baud) = (BspKind::Pilot, 57_600u32);
        #[cfg(feature = "torque")]
        let (kind, baud) = (BspKind::TorqueSensor, 1_125_000u32);

        let (tx, rx) = cortex_m::interrupt::free(|cs| {
            (gpioa.pa2.into_alternate_af1(cs), gpioa.pa3.into_alternate_af1(cs))
        });
        let serial = Serial::usart1(dp.USART1, (tx, rx), baud.bps(), &mut rcc);
        usart::UartLink::new(serial, kind, UART_TIMING)
    };

    #[cfg(feature = "watchdog")]
    let mut link = {
        use boot::config::SPI_TIMING;

        // NSS, SCK, MISO, MOSI.
        cortex_m::interrupt::free(|cs| {
            gpioa.pa4.into_alternate_af0(cs);
            gpioa.pa5.into_alternate_af0(cs);
            gpioa.pa6.into_alternate_af0(cs);
            gpioa.pa7.into_alternate_af0(cs);
        });
        spi::SpiSlave::new(dp.SPI1, SPI_TIMING)
    };

    // - flash ----------------------------------------------------------------

    let kind = link.kind();
    let mut engine = match FlashEngine::init(Stm32Flash::new(dp.FLASH), &STM32F0, kind) {
        Ok(engine) => engine,
        Err(e) => panic!("no flash layout for {:?}: {:?}", kind, e),
    };
    log!("app 0x{:x}, trailer 0x{:x}", engine.layout().app_start, engine.layout().crc_address);

    let mut launcher = RamVectors::new(dp.SYSCFG);

    boot::run(&mut link, &mut engine, &mut launcher)
}
