//! Update protocol state machine.
//!
//! A [`Session`] is polled from the main loop.  Each poll evaluates exactly
//! one state: it makes at most one receive attempt, acts on what arrived, and
//! picks the next state.  Nothing here blocks.
//!
//! ```text
//!  Default --EnterBootloadMode--> EraseCommand --EraseFlash--> WriteMemoryCommand
//!     |  ^                                                          |
//!     |  | AppCrcError                                         WriteMemory
//!     |  |                                                          v
//!     |  +------ VerifyApplication <--Finish-- FinishUpdate   PayloadReceive <-+
//!     |                 ^    |                      ^              |           |
//!     +--(no request)---+    OK                LastAddress       frame         |
//!                            v                      |              v           |
//!                     StartApplication              +------- PayloadCheck -----+
//! ```
//!
//! Every state other than `StartApplication` is guarded by the sticky
//! watchdog: a state that fails to move on for more than the board's boot
//! timeout is abandoned and the session restarts from `Default`.

use storage::FlashController;

use crate::bsp::{AppVectors, Bsp, Timing, TransportError};
use crate::flash::{FlashEngine, Written};
use crate::packet::{self, Command, Payload, Response, COMMAND_SIZE, FRAME_SIZE, NO_SEQUENCE};

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Default,
    EraseCommand,
    WriteMemoryCommand,
    PayloadReceive,
    PayloadCheck,
    FinishUpdate,
    VerifyApplication,
    StartApplication,
}

/// What the caller should do after a poll.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Step {
    /// Poll again.
    Pending,
    /// The application has been verified and flash is locked.  Hand off to
    /// it; the session must not be polled again.
    Launch(AppVectors),
}

/// The one update session.  Owns the protocol state, its counters, and the
/// receive buffers, all of which persist between polls.
#[derive(Debug)]
pub struct Session {
    state: State,
    /// Idle polls in `Default`.
    ticks: u32,
    /// Polls the current state has held without a transition.
    sticky: u32,
    /// Receive timeouts since the last complete frame.
    receive_ticks: u32,
    command: [u8; COMMAND_SIZE],
    frame: [u8; FRAME_SIZE],
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    pub const fn new() -> Session {
        Session {
            state: State::Default,
            ticks: 0,
            sticky: 0,
            receive_ticks: 0,
            command: [0; COMMAND_SIZE],
            frame: [0xff; FRAME_SIZE],
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Sequence number of the payload awaiting its check, if any.
    pub fn in_flight(&self) -> Option<u16> {
        match u16::from_le_bytes([self.frame[0], self.frame[1]]) {
            NO_SEQUENCE => None,
            sequence => Some(sequence),
        }
    }

    /// Evaluate the current state once.
    pub fn poll<B, F>(&mut self, bsp: &mut B, flash: &mut FlashEngine<F>) -> Step
    where
        B: Bsp,
        F: FlashController,
    {
        let timing = *bsp.timing();
        let mut step = Step::Pending;

        let next = match self.state {
            State::Default => self.idle(bsp, &timing),
            State::EraseCommand => self.erase_command(bsp, flash),
            State::WriteMemoryCommand => self.write_memory_command(bsp),
            State::PayloadReceive => self.payload_receive(bsp, &timing),
            State::PayloadCheck => self.payload_check(bsp, flash),
            State::FinishUpdate => self.finish_update(bsp),
            State::VerifyApplication => self.verify_application(bsp, flash),
            State::StartApplication => {
                step = Step::Launch(self.start_application(flash, &timing));
                State::StartApplication
            }
        };

        self.advance(bsp, next, &timing);
        step
    }

    fn idle<B: Bsp>(&mut self, bsp: &mut B, timing: &Timing) -> State {
        match self.receive_command(bsp) {
            Some(Some(Command::EnterBootloadMode)) => {
                self.ticks = 0;
                reply(bsp, Response::Ready);
                State::EraseCommand
            }
            Some(_) => State::Default,
            None => {
                if self.ticks > timing.app_start_ticks {
                    self.ticks = 0;
                    info!("no bootload request, checking application");
                    State::VerifyApplication
                } else {
                    self.ticks += 1;
                    State::Default
                }
            }
        }
    }

    fn erase_command<B: Bsp, F: FlashController>(
        &mut self,
        bsp: &mut B,
        flash: &mut FlashEngine<F>,
    ) -> State {
        if self.receive_command(bsp) != Some(Some(Command::EraseFlash)) {
            return State::EraseCommand;
        }
        match flash.erase() {
            Ok(()) => {
                reply(bsp, Response::Ok);
                State::WriteMemoryCommand
            }
            Err(e) => {
                warn!("erase: {}", e);
                reply(bsp, Response::Error);
                State::EraseCommand
            }
        }
    }

    fn write_memory_command<B: Bsp>(&mut self, bsp: &mut B) -> State {
        if self.receive_command(bsp) != Some(Some(Command::WriteMemory)) {
            return State::WriteMemoryCommand;
        }
        packet::retire(&mut self.frame);
        reply(bsp, Response::Ok);
        reset(bsp);
        State::PayloadReceive
    }

    fn payload_receive<B: Bsp>(&mut self, bsp: &mut B, timing: &Timing) -> State {
        match bsp.recv(&mut self.frame) {
            Ok(()) => {
                self.receive_ticks = 0;
                State::PayloadCheck
            }
            Err(TransportError::RecvTimeout) => {
                self.receive_ticks += 1;
                if self.receive_ticks > timing.two_bytes_ticks {
                    debug!("payload stalled, resetting receiver");
                    self.receive_ticks = 0;
                    reset(bsp);
                }
                State::PayloadReceive
            }
            // Still arriving.
            Err(_) => State::PayloadReceive,
        }
    }

    fn payload_check<B: Bsp, F: FlashController>(
        &mut self,
        bsp: &mut B,
        flash: &mut FlashEngine<F>,
    ) -> State {
        let payload = Payload::decode(&self.frame);
        packet::retire(&mut self.frame);

        let (response, next) = if payload.is_intact() {
            match flash.write(&payload.data, payload.sequence) {
                Ok(Written::More) => (Response::Ok, State::PayloadReceive),
                Ok(Written::LastAddress) => {
                    info!("last packet {} written", payload.sequence);
                    (Response::Ok, State::FinishUpdate)
                }
                Err(e) => {
                    warn!("packet {}: {}", payload.sequence, e);
                    (Response::Error, State::PayloadReceive)
                }
            }
        } else {
            warn!("packet {}: bad crc", payload.sequence);
            reset(bsp);
            (Response::Error, State::PayloadReceive)
        };

        reply(bsp, response);
        next
    }

    fn finish_update<B: Bsp>(&mut self, bsp: &mut B) -> State {
        if self.receive_command(bsp) == Some(Some(Command::Finish)) {
            State::VerifyApplication
        } else {
            State::FinishUpdate
        }
    }

    fn verify_application<B: Bsp, F: FlashController>(
        &mut self,
        bsp: &mut B,
        flash: &mut FlashEngine<F>,
    ) -> State {
        match flash.verify_firmware() {
            Ok(()) => {
                reply(bsp, Response::Ok);
                State::StartApplication
            }
            Err(e) => {
                warn!("application rejected: {}", e);
                reply(bsp, Response::AppCrcError);
                State::Default
            }
        }
    }

    fn start_application<F: FlashController>(
        &mut self,
        flash: &mut FlashEngine<F>,
        timing: &Timing,
    ) -> AppVectors {
        for _ in 0..timing.comm_done_ticks {
            core::hint::spin_loop();
        }
        flash.lock();
        flash.application_vectors()
    }

    /// One receive attempt for a command frame.  `None` if nothing complete
    /// arrived, `Some(None)` for a frame that is not a command.
    fn receive_command<B: Bsp>(&mut self, bsp: &mut B) -> Option<Option<Command>> {
        bsp.recv(&mut self.command).ok()?;
        let command = Command::decode(&self.command);
        match command {
            Some(command) => trace!("{}: {}", self.state, command),
            None => debug!("{}: unknown command 0x{:x}", self.state, u16::from_le_bytes(self.command)),
        }
        Some(command)
    }

    fn advance<B: Bsp>(&mut self, bsp: &mut B, next: State, timing: &Timing) {
        let mut next = next;
        if next == self.state {
            if self.state != State::StartApplication {
                self.sticky += 1;
                if self.sticky > timing.boot_timeout_ticks {
                    warn!("stuck in {}, back to default", self.state);
                    next = State::Default;
                    self.sticky = 0;
                    // Drop any half-received frame.
                    reset(bsp);
                }
            }
        } else {
            self.sticky = 0;
        }

        if next != self.state {
            debug!("{} -> {}", self.state, next);
            self.receive_ticks = 0;
        }
        self.state = next;
    }
}

fn reply<B: Bsp>(bsp: &mut B, response: Response) {
    if let Err(e) = bsp.send(&response.encode()) {
        warn!("reply {} not sent: {}", response, e);
    }
}

fn reset<B: Bsp>(bsp: &mut B) {
    if let Err(e) = bsp.reset() {
        warn!("transport reset: {}", e);
    }
}
