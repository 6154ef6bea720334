//! Board support contract.
//!
//! A board binds one physical transport (UART, SPI, CAN) and its timing
//! budget to the protocol core.  The core is written only against [`Bsp`],
//! so it never knows which interface it is talking over.

/// The board variants the bootloader knows about.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BspKind {
    Unknown,
    Pilot,
    TorqueSensor,
    ExtWatchdog,
    Can,
}

/// Reasons a transport operation did not complete.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// A receive is still in progress.  Poll again.
    Busy,
    RecvTimeout,
    XmitTimeout,
}

pub type Result<T> = core::result::Result<T, TransportError>;

/// Tick budgets for one transport.  A tick is one poll of the session.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Timing {
    /// Polls a state may hold before the session is forced back to default.
    pub boot_timeout_ticks: u32,
    /// Polls without a bootload request before the resident application is
    /// verified and started.
    pub app_start_ticks: u32,
    /// Spin count after the final reply so it leaves the wire before the
    /// hand-off.
    pub comm_done_ticks: u32,
    /// Consecutive unfinished payload polls tolerated before the receiver is
    /// reset.
    pub two_bytes_ticks: u32,
}

/// One physical interface, as seen by the protocol core.
pub trait Bsp {
    fn kind(&self) -> BspKind;
    fn timing(&self) -> &Timing;

    fn init(&mut self) -> Result<()>;
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Non-blocking receive of exactly `buf.len()` bytes.  Returns
    /// [`TransportError::Busy`] until the whole buffer has been filled.  Bytes
    /// may be deposited in `buf` across several calls, so the caller must hand
    /// in the same buffer until this returns `Ok`.
    fn recv(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Drop any partially received frame.
    fn reset(&mut self) -> Result<()>;
}

/// Where the application lives and how to enter it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AppVectors {
    /// Address of the application's vector table in flash.
    pub table: u32,
    /// Where the vector table is relocated to before the jump.
    pub ram: u32,
    /// Size of the vector table in words.
    pub words: usize,
    /// Initial main stack pointer, word 0 of the table.
    pub stack_pointer: u32,
    /// Reset handler, word 1 of the table.
    pub reset_vector: u32,
}

/// The single point where the bootloader gives up the processor.
pub trait HandOff {
    /// Relocate the vector table, load the stack pointer and jump.  Never
    /// returns.
    fn start_application(&mut self, app: &AppVectors) -> !;
}
