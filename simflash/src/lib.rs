//! Simulated flash
//!
//! A host-side model of an STM32F0-style program flash controller, used to
//! exercise the bootloader without hardware.  It follows the rules the real
//! part enforces, which the flash engine has to cope with:
//!
//! - The controller comes up locked, and writes while locked are rejected
//!   with a programming error.
//! - Programming is by half-word, and only onto an erased (0xffff)
//!   half-word.  Anything else raises a programming error and leaves the
//!   cell alone.
//! - Erase works on whole pages and sets them to 0xff.
//! - Each operation keeps the controller busy for a configurable number of
//!   polls.
//!
//! On top of that, faults can be injected: a controller that never finishes,
//! one that never unlocks, write-protected pages, and cells that read back
//! wrong.
//!
//! The contents can also be read through the embedded-storage
//! [`ReadNorFlash`] trait, with offsets relative to the start of flash.

pub mod gen;
pub mod link;
pub mod styles;

use anyhow::{anyhow, Result};
use embedded_storage::nor_flash::{self, ErrorType, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use storage::{FlashController, Status};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Mode {
    Idle,
    Erase,
    Program,
}

pub struct SimFlash {
    base: u32,
    page_size: u32,
    data: Vec<u8>,

    locked: bool,
    mode: Mode,
    busy: u32,
    status: Status,

    /// Polls each operation keeps the controller busy.
    latency: u32,
    stuck_busy: bool,
    stuck_locked: bool,
    protected: Vec<u32>,
    /// Half-word addresses that read back with these bits flipped.
    faults: Vec<(u32, u16)>,

    erases: usize,
    programs: usize,
    reads: usize,
    /// Reads that fell outside the device.
    stray_reads: usize,
    /// Highest address touched by a read.
    highest_read: Option<u32>,
}

impl SimFlash {
    pub fn new(base: u32, page_size: u32, size: u32) -> Result<SimFlash> {
        if page_size == 0 || size == 0 || size % page_size != 0 {
            return Err(anyhow!("flash size 0x{:x} is not a multiple of page 0x{:x}", size, page_size));
        }
        base.checked_add(size).ok_or_else(|| anyhow!("flash wraps the address space"))?;
        Ok(SimFlash {
            base,
            page_size,
            data: vec![0xff; size as usize],
            locked: true,
            mode: Mode::Idle,
            busy: 0,
            status: Status::default(),
            latency: 3,
            stuck_busy: false,
            stuck_locked: false,
            protected: Vec::new(),
            faults: Vec::new(),
            erases: 0,
            programs: 0,
            reads: 0,
            stray_reads: 0,
            highest_read: None,
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn end(&self) -> u32 {
        self.base + self.data.len() as u32
    }

    /// Place bytes directly into flash at an absolute address, as a
    /// programmer would.
    pub fn install(&mut self, bytes: &[u8], address: u32) -> Result<()> {
        let start = self.offset(address).ok_or_else(|| anyhow!("0x{:x} is outside flash", address))?;
        let end = start + bytes.len();
        if end > self.data.len() {
            return Err(anyhow!("{} bytes at 0x{:x} run past the end of flash", bytes.len(), address));
        }
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// The bytes at `[address, address + len)`.
    pub fn region(&self, address: u32, len: usize) -> &[u8] {
        let start = (address - self.base) as usize;
        &self.data[start..start + len]
    }

    /// The controller reports busy forever.
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    /// The unlock keys are never accepted.
    pub fn set_stuck_locked(&mut self, stuck: bool) {
        self.stuck_locked = stuck;
    }

    pub fn protect_page(&mut self, address: u32) {
        self.protected.push(self.page_of(address));
    }

    /// Make the half-word at `address` read back with `mask` xored in.
    pub fn inject_read_fault(&mut self, address: u32, mask: u16) {
        self.faults.push((address & !1, mask));
    }

    pub fn is_locked_now(&self) -> bool {
        self.locked
    }

    pub fn erase_count(&self) -> usize {
        self.erases
    }

    pub fn program_count(&self) -> usize {
        self.programs
    }

    /// Half-word reads through the controller.
    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn stray_reads(&self) -> usize {
        self.stray_reads
    }

    pub fn highest_read(&self) -> Option<u32> {
        self.highest_read
    }

    fn offset(&self, address: u32) -> Option<usize> {
        if address >= self.base && address < self.end() {
            Some((address - self.base) as usize)
        } else {
            None
        }
    }

    fn page_of(&self, address: u32) -> u32 {
        address - (address - self.base) % self.page_size
    }

    fn is_protected(&self, address: u32) -> bool {
        self.protected.contains(&self.page_of(address))
    }

    fn start(&mut self, mode: Mode) {
        self.mode = mode;
        self.busy = self.latency;
    }
}

impl FlashController for SimFlash {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn unlock(&mut self) {
        if !self.stuck_locked {
            self.locked = false;
        }
    }

    fn is_locked(&mut self) -> bool {
        self.locked
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn is_busy(&mut self) -> bool {
        if self.stuck_busy {
            return true;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return true;
        }
        false
    }

    fn status(&mut self) -> Status {
        self.status
    }

    fn clear_status(&mut self) {
        self.status = Status::default();
    }

    fn start_page_erase(&mut self, address: u32) {
        let Some(offset) = self.offset(address) else {
            self.status.program_error = true;
            return;
        };
        if self.locked {
            self.status.program_error = true;
            return;
        }
        if self.is_protected(address) {
            self.status.write_protect_error = true;
            return;
        }
        let page = offset - offset % self.page_size as usize;
        self.data[page..page + self.page_size as usize].fill(0xff);
        self.erases += 1;
        self.start(Mode::Erase);
    }

    fn finish_page_erase(&mut self) {
        assert_ne!(self.mode, Mode::Program, "page erase finished while programming");
        self.mode = Mode::Idle;
    }

    fn start_program(&mut self, address: u32, value: u16) {
        assert_eq!(address % 2, 0, "unaligned half-word program at 0x{:x}", address);
        let Some(offset) = self.offset(address) else {
            self.status.program_error = true;
            return;
        };
        if self.locked {
            self.status.program_error = true;
            return;
        }
        if self.is_protected(address) {
            self.status.write_protect_error = true;
            return;
        }
        let current = u16::from_le_bytes([self.data[offset], self.data[offset + 1]]);
        if current != 0xffff {
            self.status.program_error = true;
            return;
        }
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        self.programs += 1;
        self.start(Mode::Program);
    }

    fn finish_program(&mut self) {
        assert_ne!(self.mode, Mode::Erase, "program finished while erasing");
        self.mode = Mode::Idle;
    }

    fn read_half_word(&mut self, address: u32) -> u16 {
        self.reads += 1;
        self.highest_read = Some(self.highest_read.map_or(address + 1, |h| h.max(address + 1)));
        let Some(offset) = self.offset(address).filter(|o| o + 1 < self.data.len()) else {
            self.stray_reads += 1;
            return 0;
        };
        let value = u16::from_le_bytes([self.data[offset], self.data[offset + 1]]);
        let mask = self
            .faults
            .iter()
            .filter(|(a, _)| *a == address)
            .fold(0, |m, (_, f)| m | f);
        value ^ mask
    }
}

/// The richer error type used in the simulator.
#[derive(Debug, Clone, Copy)]
pub enum SimError {
    Inner(NorFlashErrorKind),
}

impl From<NorFlashErrorKind> for SimError {
    fn from(inner: NorFlashErrorKind) -> Self {
        SimError::Inner(inner)
    }
}

impl NorFlashError for SimError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            SimError::Inner(inner) => *inner,
        }
    }
}

impl ErrorType for SimFlash {
    type Error = SimError;
}

impl ReadNorFlash for SimFlash {
    const READ_SIZE: usize = 1;

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> core::result::Result<(), SimError> {
        nor_flash::check_read(self, offset, bytes.len())?;
        let offset = offset as usize;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }
}
