//! Flash controller contract.
//!
//! The bootloader core never touches flash registers.  Instead, a board
//! provides something implementing [`FlashController`], which maps each
//! operation onto the register sequence of its particular part (unlock keys,
//! page erase, half-word program, status flags).  All decision logic, such as
//! how long to wait, when to give up, and what to verify, lives above this
//! layer.
//!
//! Addresses are absolute, as seen on the bus.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    NotAligned,
    OutOfBounds,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Sticky error flags reported by the controller after an erase or program.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Status {
    /// Programming error: the target was not erased, or the operation was
    /// rejected.
    pub program_error: bool,
    /// The target lies in a write-protected page.
    pub write_protect_error: bool,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        !self.program_error && !self.write_protect_error
    }
}

/// Register-level view of an on-chip flash controller with half-word
/// programming and page erase.
pub trait FlashController {
    /// Size in bytes of one erasable page.
    fn page_size(&self) -> u32;

    /// Write the two-key unlock sequence.  The controller may take some time
    /// before [`is_locked`](Self::is_locked) reports false.
    fn unlock(&mut self);
    fn is_locked(&mut self) -> bool;
    fn lock(&mut self);

    /// True while an erase or program operation is in progress.
    fn is_busy(&mut self) -> bool;

    fn status(&mut self) -> Status;
    fn clear_status(&mut self);

    /// Start erasing the page containing `address`.
    fn start_page_erase(&mut self, address: u32);
    /// Leave page erase mode once the controller is no longer busy.
    fn finish_page_erase(&mut self);

    /// Start programming one half-word.  `address` must be half-word aligned.
    fn start_program(&mut self, address: u32, value: u16);
    /// Leave programming mode once the controller is no longer busy.
    fn finish_program(&mut self);

    /// Read back one half-word of program memory.
    fn read_half_word(&mut self, address: u32) -> u16;

    /// Read back one word of program memory.  The default composes two
    /// half-word reads, little endian.
    fn read_word(&mut self, address: u32) -> u32 {
        let low = self.read_half_word(address) as u32;
        let high = self.read_half_word(address + 2) as u32;
        (high << 16) | low
    }
}

// Utilities in the spirit of embedded-storage for validating arguments.

/// Check that `[address, address + length)` is a non-empty, half-word aligned
/// range inside `[start, end)`.
pub fn check_program(start: u32, end: u32, address: u32, length: usize) -> Result<()> {
    check_range(start, end, 2, address, length)
}

/// Check that `[from, to)` covers whole pages inside `[start, end)`.
pub fn check_erase(start: u32, end: u32, page_size: u32, from: u32, to: u32) -> Result<()> {
    if from > to || from < start || to > end {
        return Err(Error::OutOfBounds);
    }
    if page_size == 0 || from % page_size != 0 || to % page_size != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub fn check_range(start: u32, end: u32, align: u32, address: u32, length: usize) -> Result<()> {
    let length = u32::try_from(length).map_err(|_| Error::OutOfBounds)?;
    let limit = address.checked_add(length).ok_or(Error::OutOfBounds)?;
    if length == 0 || address < start || limit > end {
        return Err(Error::OutOfBounds);
    }
    if address % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u32 = 0x0800_1000;
    const END: u32 = 0x0800_4000;

    #[test]
    fn program_range() {
        assert_eq!(check_program(START, END, START, 64), Ok(()));
        assert_eq!(check_program(START, END, END - 64, 64), Ok(()));
        assert_eq!(check_program(START, END, END - 62, 64), Err(Error::OutOfBounds));
        assert_eq!(check_program(START, END, START - 2, 4), Err(Error::OutOfBounds));
        assert_eq!(check_program(START, END, START + 1, 64), Err(Error::NotAligned));
        assert_eq!(check_program(START, END, START, 63), Err(Error::NotAligned));
        assert_eq!(check_program(START, END, START, 0), Err(Error::OutOfBounds));
    }

    #[test]
    fn program_range_overflow() {
        assert_eq!(check_program(0, u32::MAX, u32::MAX - 1, 4), Err(Error::OutOfBounds));
    }

    #[test]
    fn erase_range() {
        assert_eq!(check_erase(START, END, 0x400, START, END), Ok(()));
        assert_eq!(check_erase(START, END, 0x400, START, START), Ok(()));
        assert_eq!(check_erase(START, END, 0x400, START + 2, END), Err(Error::NotAligned));
        assert_eq!(check_erase(START, END, 0x400, END, START), Err(Error::OutOfBounds));
        assert_eq!(check_erase(START, END, 0x400, START, END + 0x400), Err(Error::OutOfBounds));
    }

    #[test]
    fn status_flags() {
        assert!(Status::default().is_ok());
        let s = Status { program_error: true, ..Status::default() };
        assert!(!s.is_ok());
    }
}
