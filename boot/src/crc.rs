//! CRC16 used for payload frames and the firmware trailer.
//!
//! CRC-16/XMODEM: polynomial 0x1021, not reflected, no final xor.  With no
//! final xor a running value can be fed back in as the seed, so a CRC can be
//! computed piecewise.

use crc::{Crc, CRC_16_XMODEM};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC16 of `data`, continuing from `seed`.  A fresh computation uses seed 0.
pub fn crc16(data: &[u8], seed: u16) -> u16 {
    let mut digest = CRC16.digest_with_initial(seed);
    digest.update(data);
    digest.finalize()
}
