//! Wire format.
//!
//! Two kinds of frame cross the link, both little endian and of fixed size:
//!
//! - Command frames, 2 bytes.  The host sends a [`Command`], the bootloader
//!   answers on the same channel with a [`Response`].
//! - Payload frames, [`FRAME_SIZE`] bytes: a 2-byte sequence counter,
//!   [`BLOCK_SIZE`] bytes of image data and a CRC16 (seed 0) over the
//!   counter and the data.
//!
//! ```text
//! +---------+-----------------------+---------+
//! | seq  u16| data [u8; BLOCK_SIZE] | crc  u16|
//! +---------+-----------------------+---------+
//!  \_____________ CRC_SPAN ________/
//! ```

use crate::crc::crc16;

/// Size of a command or response frame.
pub const COMMAND_SIZE: usize = 2;

/// Image bytes carried by one payload frame.  This is also the flash write
/// size, so packet `n` lands at `application start + n * BLOCK_SIZE`.
pub const BLOCK_SIZE: usize = 64;

/// Size of a payload frame on the wire.
pub const FRAME_SIZE: usize = BLOCK_SIZE + 4;

/// Bytes of a payload frame covered by its CRC.
pub const CRC_SPAN: usize = FRAME_SIZE - 2;

/// Sequence value meaning no payload is in flight.
pub const NO_SEQUENCE: u16 = 0xffff;

/// Requests from the host.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Command {
    EnterBootloadMode = 0x0001,
    EraseFlash = 0x0002,
    WriteMemory = 0x0003,
    Finish = 0x0004,
}

impl Command {
    pub fn decode(frame: &[u8; COMMAND_SIZE]) -> Option<Command> {
        match u16::from_le_bytes(*frame) {
            0x0001 => Some(Command::EnterBootloadMode),
            0x0002 => Some(Command::EraseFlash),
            0x0003 => Some(Command::WriteMemory),
            0x0004 => Some(Command::Finish),
            _ => None,
        }
    }

    pub fn encode(self) -> [u8; COMMAND_SIZE] {
        (self as u16).to_le_bytes()
    }
}

/// Replies from the bootloader.  These are the only way a failure inside the
/// bootloader becomes visible to the host.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Response {
    Ready = 0x0010,
    Ok = 0x0011,
    Error = 0x0012,
    Abort = 0x0013,
    AppCrcError = 0x0014,
}

impl Response {
    pub fn decode(frame: &[u8; COMMAND_SIZE]) -> Option<Response> {
        match u16::from_le_bytes(*frame) {
            0x0010 => Some(Response::Ready),
            0x0011 => Some(Response::Ok),
            0x0012 => Some(Response::Error),
            0x0013 => Some(Response::Abort),
            0x0014 => Some(Response::AppCrcError),
            _ => None,
        }
    }

    pub fn encode(self) -> [u8; COMMAND_SIZE] {
        (self as u16).to_le_bytes()
    }
}

/// A decoded payload frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Payload {
    pub sequence: u16,
    pub data: [u8; BLOCK_SIZE],
    /// The CRC as carried by the frame, which may not match the contents.
    pub crc: u16,
}

impl Payload {
    /// Build a payload with a correct CRC.
    pub fn new(sequence: u16, data: [u8; BLOCK_SIZE]) -> Payload {
        let mut payload = Payload { sequence, data, crc: 0 };
        payload.crc = payload.compute_crc();
        payload
    }

    pub fn decode(frame: &[u8; FRAME_SIZE]) -> Payload {
        let mut data = [0u8; BLOCK_SIZE];
        data.copy_from_slice(&frame[2..2 + BLOCK_SIZE]);
        Payload {
            sequence: u16::from_le_bytes([frame[0], frame[1]]),
            data,
            crc: u16::from_le_bytes([frame[CRC_SPAN], frame[CRC_SPAN + 1]]),
        }
    }

    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut frame = [0u8; FRAME_SIZE];
        frame[..2].copy_from_slice(&self.sequence.to_le_bytes());
        frame[2..CRC_SPAN].copy_from_slice(&self.data);
        frame[CRC_SPAN..].copy_from_slice(&self.crc.to_le_bytes());
        frame
    }

    /// CRC over the counter and data, as the sender should have computed it.
    pub fn compute_crc(&self) -> u16 {
        let crc = crc16(&self.sequence.to_le_bytes(), 0);
        crc16(&self.data, crc)
    }

    pub fn is_intact(&self) -> bool {
        self.compute_crc() == self.crc
    }
}

/// Mark a receive buffer as holding no payload.
pub fn retire(frame: &mut [u8; FRAME_SIZE]) {
    frame[..2].copy_from_slice(&NO_SEQUENCE.to_le_bytes());
    frame[CRC_SPAN..].copy_from_slice(&NO_SEQUENCE.to_le_bytes());
}
