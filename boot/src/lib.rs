//! This is a field-update bootloader built for embedded rust.
//!
//! An update session is a polled state machine ([`Session`]) that talks to a
//! host over a board supplied transport ([`Bsp`]), programs the application
//! region through the [`FlashEngine`], checks the firmware trailer, and finally
//! hands control to the application through the board's [`HandOff`].

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[macro_use]
mod macros;

pub mod bsp;
pub mod config;
pub mod crc;
pub mod flash;
pub mod packet;
pub mod protocol;

pub use bsp::{AppVectors, Bsp, BspKind, HandOff, Timing, TransportError};
pub use config::MemoryMap;
pub use flash::{FlashEngine, FlashError, FlashLayout, Written};
pub use packet::{Command, Payload, Response};
pub use protocol::{Session, State, Step};

use storage::FlashController;

/// Run the bootloader.  Initializes the transport and then polls the session
/// until it yields the application, which is started through `launcher`.
pub fn run<B, F, H>(bsp: &mut B, flash: &mut FlashEngine<F>, launcher: &mut H) -> !
where
    B: Bsp,
    F: FlashController,
    H: HandOff,
{
    if let Err(e) = bsp.init() {
        warn!("transport init failed: {}", e);
    }
    info!("bootloader up, board {}", bsp.kind());

    let mut session = Session::new();
    loop {
        if let Step::Launch(app) = session.poll(bsp, flash) {
            info!("starting application, reset 0x{:x}", app.reset_vector);
            launcher.start_application(&app);
        }
    }
}
