//! UART transport, for the pilot and the torque sensor.
//!
//! Works over any HAL serial port.  A poll takes at most one byte off the
//! port.

use boot::bsp::{Bsp, BspKind, Result, Timing, TransportError};
use boot::config::BUSY_WAIT_TICKS;
use embedded_hal::serial;

pub struct UartLink<S> {
    serial: S,
    kind: BspKind,
    timing: Timing,
    index: usize,
}

impl<S> UartLink<S>
where
    S: serial::Read<u8> + serial::Write<u8>,
{
    pub fn new(serial: S, kind: BspKind, timing: Timing) -> UartLink<S> {
        UartLink {
            serial,
            kind,
            timing,
            index: 0,
        }
    }

    /// Retry a non-blocking operation until it completes or the budget runs
    /// out.
    fn bounded<T, E>(mut op: impl FnMut() -> nb::Result<T, E>) -> Result<T> {
        let mut budget = BUSY_WAIT_TICKS;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(nb::Error::WouldBlock) if budget > 0 => budget -= 1,
                Err(_) => return Err(TransportError::XmitTimeout),
            }
        }
    }
}

impl<S> Bsp for UartLink<S>
where
    S: serial::Read<u8> + serial::Write<u8>,
{
    fn kind(&self) -> BspKind {
        self.kind
    }

    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn init(&mut self) -> Result<()> {
        // Drain anything that arrived before we were listening.
        while self.serial.read().is_ok() {}
        self.index = 0;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        for byte in data {
            Self::bounded(|| self.serial.write(*byte))?;
        }
        Self::bounded(|| self.serial.flush())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.serial.read() {
            Ok(byte) => {
                if let Some(slot) = buf.get_mut(self.index) {
                    *slot = byte;
                    self.index += 1;
                }
            }
            Err(nb::Error::WouldBlock) => (),
            Err(nb::Error::Other(_)) => {
                // Framing or overrun: the frame is lost.
                self.index = 0;
                return Err(TransportError::RecvTimeout);
            }
        }

        if self.index >= buf.len() {
            self.index = 0;
            return Ok(());
        }
        Err(TransportError::Busy)
    }

    fn reset(&mut self) -> Result<()> {
        self.index = 0;
        Ok(())
    }
}
