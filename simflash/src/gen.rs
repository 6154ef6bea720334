//! Image generation.
//!
//! Builds application images the way the host side update tool lays them
//! out: the image at the start of the application region, the rest of the
//! region erased, and the length and CRC trailer in the last word of the
//! bank.  The whole region is then cut into payload frames.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use anyhow::{anyhow, Result};
use boot::crc::crc16;
use boot::packet::{Payload, BLOCK_SIZE};
use boot::FlashLayout;

/// An application image and its trailer values.
pub struct GeneratedImage {
    pub data: Vec<u8>,
    pub length: u16,
    pub crc: u16,
}

pub struct GenBuilder {
    /// Size of the image in bytes.
    size: usize,
    /// Seed for the PRNG
    seed: usize,
    /// Initial stack pointer placed in word 0.
    stack_pointer: u32,
    /// Offset of the reset handler from the start of the image.
    entry: u32,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            size: 7_137,
            seed: 1,
            stack_pointer: 0x2000_1000,
            entry: 0xc1,
        }
    }
}

impl GenBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: usize) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn stack_pointer(&mut self, stack_pointer: u32) -> &mut Self {
        self.stack_pointer = stack_pointer;
        self
    }

    /// Build an image for the given application region.
    pub fn build(&self, layout: &FlashLayout) -> Result<GeneratedImage> {
        if self.size < 8 {
            return Err(anyhow!("image of {} bytes has no room for a vector table", self.size));
        }
        if self.size as u32 > layout.app_span() {
            return Err(anyhow!(
                "image of {} bytes does not fit in 0x{:x}",
                self.size,
                layout.app_span()
            ));
        }

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed as u64);
        let mut data = vec![0u8; self.size];
        rng.fill_bytes(&mut data);

        // A plausible vector table, so the hand-off has something to read.
        data[0..4].copy_from_slice(&self.stack_pointer.to_le_bytes());
        data[4..8].copy_from_slice(&(layout.app_start + self.entry).to_le_bytes());

        // The bootloader checks in half-words, so an odd image picks up the
        // erased byte that follows it.
        let mut padded = data.clone();
        if padded.len() % 2 != 0 {
            padded.push(0xff);
        }

        Ok(GeneratedImage {
            length: self.size as u16,
            crc: crc16(&padded, 0),
            data,
        })
    }
}

impl GeneratedImage {
    /// The trailer as stored in the last word of the bank.
    pub fn trailer(&self) -> [u8; 4] {
        let word = ((self.length as u32) << 16) | self.crc as u32;
        word.to_le_bytes()
    }

    /// The application region from its start to the end of the bank, as it
    /// should read once the update is done.
    pub fn region(&self, layout: &FlashLayout) -> Vec<u8> {
        let mut region = vec![0xff; (layout.end() - layout.app_start) as usize];
        region[..self.data.len()].copy_from_slice(&self.data);
        let trailer = (layout.crc_address - layout.app_start) as usize;
        region[trailer..].copy_from_slice(&self.trailer());
        region
    }

    /// The region cut into payload frames, in order.  The last one carries
    /// the trailer.
    pub fn payloads(&self, layout: &FlashLayout) -> Vec<Payload> {
        self.region(layout)
            .chunks(BLOCK_SIZE)
            .enumerate()
            .map(|(sequence, chunk)| {
                let mut block = [0xff; BLOCK_SIZE];
                block[..chunk.len()].copy_from_slice(chunk);
                Payload::new(sequence as u16, block)
            })
            .collect()
    }
}
