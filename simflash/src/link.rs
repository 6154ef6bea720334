//! Simulated transport.
//!
//! A half-duplex byte link between a scripted host and the bootloader.  The
//! host side queues bytes; the bootloader side sees them through [`Bsp`],
//! a few bytes per poll, the way a slave peripheral delivers them.  Receives
//! deposit bytes straight into the caller's buffer and keep their position
//! between polls, so a frame is assembled over many polls.
//!
//! Like the SPI slave driver, a receive of more than two bytes that sees no
//! data for `idle_limit` polls gives up with a receive timeout and starts
//! over.

use std::collections::VecDeque;

use boot::bsp::{Bsp, BspKind, Result, Timing, TransportError};
use boot::packet::{Command, Payload, Response, COMMAND_SIZE};

pub struct SimLink {
    kind: BspKind,
    timing: Timing,

    inbound: VecDeque<u8>,
    /// Position in the frame being received.
    index: usize,
    idle: u32,
    idle_limit: u32,
    bytes_per_poll: usize,
    /// Errors to report from upcoming receives, ahead of any data.
    injected: VecDeque<TransportError>,
    fail_sends: bool,

    sent: Vec<Vec<u8>>,
    inits: usize,
    resets: usize,
}

impl SimLink {
    pub fn new(kind: BspKind, timing: Timing) -> SimLink {
        SimLink {
            kind,
            timing,
            inbound: VecDeque::new(),
            index: 0,
            idle: 0,
            idle_limit: 0x1ff,
            bytes_per_poll: 1,
            injected: VecDeque::new(),
            fail_sends: false,
            sent: Vec::new(),
            inits: 0,
            resets: 0,
        }
    }

    pub fn set_bytes_per_poll(&mut self, bytes: usize) {
        self.bytes_per_poll = bytes.max(1);
    }

    pub fn set_idle_limit(&mut self, polls: u32) {
        self.idle_limit = polls;
    }

    /// Make every send fail with a transmit timeout.
    pub fn set_fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }

    /// Queue raw bytes from the host.
    pub fn host_bytes(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    pub fn host_command(&mut self, command: Command) {
        self.host_bytes(&command.encode());
    }

    pub fn host_payload(&mut self, payload: &Payload) {
        self.host_bytes(&payload.encode());
    }

    /// Make the next receive fail with `error`, whatever is queued.
    pub fn inject(&mut self, error: TransportError) {
        self.injected.push_back(error);
    }

    /// Host bytes not yet taken by the bootloader.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    /// Everything the bootloader sent since the last call, decoded.
    pub fn responses(&mut self) -> Vec<Option<Response>> {
        self.sent
            .drain(..)
            .map(|frame| {
                let frame: [u8; COMMAND_SIZE] = frame.as_slice().try_into().ok()?;
                Response::decode(&frame)
            })
            .collect()
    }

    pub fn inits(&self) -> usize {
        self.inits
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl Bsp for SimLink {
    fn kind(&self) -> BspKind {
        self.kind
    }

    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn init(&mut self) -> Result<()> {
        self.inits += 1;
        self.index = 0;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.fail_sends {
            return Err(TransportError::XmitTimeout);
        }
        self.sent.push(data.to_vec());
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        if let Some(error) = self.injected.pop_front() {
            return Err(error);
        }

        if self.inbound.is_empty() {
            if buf.len() > COMMAND_SIZE {
                self.idle += 1;
                if self.idle > self.idle_limit {
                    self.idle = 0;
                    self.index = 0;
                    return Err(TransportError::RecvTimeout);
                }
            }
            return Err(TransportError::Busy);
        }

        self.idle = 0;
        for _ in 0..self.bytes_per_poll {
            if self.index >= buf.len() {
                break;
            }
            match self.inbound.pop_front() {
                Some(byte) => {
                    buf[self.index] = byte;
                    self.index += 1;
                }
                None => break,
            }
        }

        if self.index >= buf.len() {
            self.index = 0;
            return Ok(());
        }
        Err(TransportError::Busy)
    }

    fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        self.index = 0;
        Ok(())
    }
}
