// Update sessions driven end to end over the simulated link and flash.

use std::panic::{self, AssertUnwindSafe};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use boot::config::STM32F0;
use boot::packet::{Payload, BLOCK_SIZE};
use boot::{
    AppVectors, Bsp, Command, FlashEngine, HandOff, Response, Session, State, Step, Timing,
    TransportError,
};
use simflash::gen::{GenBuilder, GeneratedImage};
use simflash::link::SimLink;
use simflash::styles::{self, ChipStyle, F031X4_PILOT};
use simflash::SimFlash;

/// Short timeouts so stalls resolve quickly.
const FAST: Timing = Timing {
    boot_timeout_ticks: 2000,
    app_start_ticks: 50,
    comm_done_ticks: 10,
    two_bytes_ticks: 200,
};

/// Upper bound on polls for any single exchange.
const LIMIT: usize = 10_000;

struct Rig {
    session: Session,
    link: SimLink,
    engine: FlashEngine<SimFlash>,
}

impl Rig {
    fn new(style: &ChipStyle) -> Rig {
        Rig::with_timing(style, FAST)
    }

    fn with_timing(style: &ChipStyle, timing: Timing) -> Rig {
        let flash = style.build().unwrap();
        Rig {
            session: Session::new(),
            link: SimLink::new(style.kind, timing),
            engine: FlashEngine::init(flash, &STM32F0, style.kind).unwrap(),
        }
    }

    fn state(&self) -> State {
        self.session.state()
    }

    fn poll(&mut self) -> Step {
        self.session.poll(&mut self.link, &mut self.engine)
    }

    /// Poll until the session reaches `state`, returning the polls taken.
    fn drive_to(&mut self, state: State) -> usize {
        for polls in 1..=LIMIT {
            assert_eq!(self.poll(), Step::Pending, "launched on the way to {:?}", state);
            if self.state() == state {
                return polls;
            }
        }
        panic!("never reached {:?}, stuck in {:?}", state, self.state());
    }

    /// Send a command and poll until the session moves to `next`.
    fn command(&mut self, command: Command, next: State) {
        self.link.host_command(command);
        self.drive_to(next);
    }

    /// Send one payload and poll until it has been checked.
    fn payload(&mut self, payload: &Payload) -> Option<Response> {
        self.link.host_payload(payload);
        self.drive_to(State::PayloadCheck);
        assert_eq!(self.poll(), Step::Pending);
        let mut responses = self.link.responses();
        assert_eq!(responses.len(), 1, "one reply per payload");
        responses.pop().flatten()
    }

    /// Get from `Default` to waiting for the first payload.
    fn open(&mut self) {
        self.command(Command::EnterBootloadMode, State::EraseCommand);
        self.command(Command::EraseFlash, State::WriteMemoryCommand);
        self.command(Command::WriteMemory, State::PayloadReceive);
        assert_eq!(
            self.link.responses(),
            vec![Some(Response::Ready), Some(Response::Ok), Some(Response::Ok)]
        );
    }

    /// Run a whole update of `img` and return what the session launched.
    fn update(&mut self, img: &GeneratedImage) -> AppVectors {
        let layout = *self.engine.layout();
        self.open();
        let payloads = img.payloads(&layout);
        let (last, body) = payloads.split_last().unwrap();
        for payload in body {
            assert_eq!(self.payload(payload), Some(Response::Ok), "packet {}", payload.sequence);
            assert_eq!(self.state(), State::PayloadReceive);
        }
        assert_eq!(self.payload(last), Some(Response::Ok));
        assert_eq!(self.state(), State::FinishUpdate);

        self.command(Command::Finish, State::VerifyApplication);
        assert_eq!(self.poll(), Step::Pending);
        assert_eq!(self.state(), State::StartApplication);
        assert_eq!(self.link.responses(), vec![Some(Response::Ok)]);

        match self.poll() {
            Step::Launch(app) => app,
            Step::Pending => panic!("verified image not launched"),
        }
    }
}

#[test]
fn enter_bootload_mode() {
    let mut rig = Rig::new(&F031X4_PILOT);
    rig.link.host_command(Command::EnterBootloadMode);
    assert_eq!(rig.poll(), Step::Pending);
    assert_eq!(rig.state(), State::Default);
    assert_eq!(rig.poll(), Step::Pending);
    assert_eq!(rig.state(), State::EraseCommand);
    assert_eq!(rig.link.responses(), vec![Some(Response::Ready)]);
}

#[test]
fn bad_payload_crc() {
    let mut rig = Rig::new(&F031X4_PILOT);
    rig.open();
    let resets = rig.link.resets();

    let mut payload = Payload::new(0, [0x5a; BLOCK_SIZE]);
    payload.crc ^= 0x0100;
    assert_eq!(rig.payload(&payload), Some(Response::Error));

    assert_eq!(rig.state(), State::PayloadReceive);
    assert_eq!(rig.link.resets(), resets + 1);
    assert_eq!(rig.session.in_flight(), None);
    assert_eq!(rig.engine.controller().program_count(), 0);

    // The same packet, intact, goes through.
    let payload = Payload::new(0, [0x5a; BLOCK_SIZE]);
    assert_eq!(rig.payload(&payload), Some(Response::Ok));
    assert_eq!(rig.engine.controller().program_count(), BLOCK_SIZE / 2);
}

#[test]
fn full_update() {
    for flashes in styles::all_flashes() {
        let (style, flash) = flashes.unwrap();
        let mut rig = Rig {
            session: Session::new(),
            link: SimLink::new(style.kind, FAST),
            engine: FlashEngine::init(flash, &STM32F0, style.kind).unwrap(),
        };
        let layout = *rig.engine.layout();
        let img = GenBuilder::default().size(5_000).seed(7).build(&layout).unwrap();
        println!("{}: {} bytes, crc {:04x}", style.name, img.length, img.crc);

        let app = rig.update(&img);

        let controller = rig.engine.controller();
        assert!(controller.is_locked_now(), "{}", style.name);
        let written = controller.region(layout.app_start, (layout.end() - layout.app_start) as usize);
        assert!(written == img.region(&layout).as_slice(), "{}", style.name);
        assert_eq!(app.table, layout.app_start);
        assert_eq!(app.stack_pointer, 0x2000_1000);
        assert_eq!(app.reset_vector, layout.app_start + 0xc1);
        assert_eq!(rig.link.pending(), 0);
    }
}

#[test]
fn update_over_existing_image() {
    let mut rig = Rig::new(&F031X4_PILOT);
    let layout = *rig.engine.layout();
    let old = GenBuilder::default().size(9_000).seed(1).build(&layout).unwrap();
    rig.engine.controller_mut().install(&old.region(&layout), layout.app_start).unwrap();

    let new = GenBuilder::default().size(2_222).seed(2).build(&layout).unwrap();
    rig.update(&new);
    let written = rig.engine.controller().region(layout.app_start, (layout.end() - layout.app_start) as usize);
    assert!(written == new.region(&layout).as_slice());
}

#[test]
fn corrupt_image_is_rejected() {
    let mut rig = Rig::new(&F031X4_PILOT);
    let layout = *rig.engine.layout();
    let img = GenBuilder::default().size(3_000).build(&layout).unwrap();

    // Every frame is intact, but packet 3 does not match the trailer.
    let mut payloads = img.payloads(&layout);
    let mut data = payloads[3].data;
    data[5] ^= 0x01;
    payloads[3] = Payload::new(3, data);

    rig.open();
    for payload in &payloads {
        assert_eq!(rig.payload(payload), Some(Response::Ok));
    }
    rig.command(Command::Finish, State::VerifyApplication);
    assert_eq!(rig.poll(), Step::Pending);
    assert_eq!(rig.state(), State::Default);
    assert_eq!(rig.link.responses(), vec![Some(Response::AppCrcError)]);
}

#[test]
fn erase_failure_reported() {
    let mut rig = Rig::new(&F031X4_PILOT);
    let app = rig.engine.layout().app_start;
    rig.engine.controller_mut().protect_page(app + 5 * STM32F0.page_size);

    rig.command(Command::EnterBootloadMode, State::EraseCommand);
    rig.link.host_command(Command::EraseFlash);
    rig.poll();
    rig.poll();
    assert_eq!(rig.state(), State::EraseCommand);
    assert_eq!(rig.link.responses(), vec![Some(Response::Ready), Some(Response::Error)]);
}

#[test]
fn write_failure_reported() {
    let mut rig = Rig::new(&F031X4_PILOT);
    let app = rig.engine.layout().app_start;
    rig.engine.controller_mut().inject_read_fault(app + 10, 0x8000);
    rig.open();

    assert_eq!(rig.payload(&Payload::new(0, [0; BLOCK_SIZE])), Some(Response::Error));
    assert_eq!(rig.state(), State::PayloadReceive);
    assert_eq!(rig.payload(&Payload::new(1, [0; BLOCK_SIZE])), Some(Response::Ok));
}

#[test]
fn out_of_order_commands_ignored() {
    let mut rig = Rig::new(&F031X4_PILOT);
    rig.command(Command::EnterBootloadMode, State::EraseCommand);
    rig.link.responses();

    rig.link.host_command(Command::WriteMemory);
    rig.link.host_command(Command::Finish);
    rig.link.host_bytes(&[0x55, 0xaa]);
    for _ in 0..6 {
        assert_eq!(rig.poll(), Step::Pending);
        assert_eq!(rig.state(), State::EraseCommand);
    }
    assert!(rig.link.responses().is_empty());
    assert_eq!(rig.engine.controller().erase_count(), 0);
}

#[test]
fn lost_replies_do_not_stall() {
    let mut rig = Rig::new(&F031X4_PILOT);
    rig.link.set_fail_sends(true);
    rig.command(Command::EnterBootloadMode, State::EraseCommand);
    rig.command(Command::EraseFlash, State::WriteMemoryCommand);
    assert!(rig.link.responses().is_empty());
}

#[test]
fn auto_boot_blank() {
    let mut rig = Rig::new(&F031X4_PILOT);
    let polls = rig.drive_to(State::VerifyApplication);
    assert_eq!(polls, FAST.app_start_ticks as usize + 2);

    assert_eq!(rig.poll(), Step::Pending);
    assert_eq!(rig.state(), State::Default);
    assert_eq!(rig.link.responses(), vec![Some(Response::AppCrcError)]);

    // And it keeps trying.
    assert_eq!(rig.drive_to(State::VerifyApplication), FAST.app_start_ticks as usize + 2);
}

#[test]
fn auto_boot_installed() {
    for flashes in styles::all_flashes() {
        let (style, flash) = flashes.unwrap();
        let mut rig = Rig {
            session: Session::new(),
            link: SimLink::new(style.kind, FAST),
            engine: FlashEngine::init(flash, &STM32F0, style.kind).unwrap(),
        };
        let layout = *rig.engine.layout();
        let img = GenBuilder::default().size(4_321).build(&layout).unwrap();
        rig.engine.controller_mut().install(&img.region(&layout), layout.app_start).unwrap();

        rig.drive_to(State::VerifyApplication);
        assert_eq!(rig.poll(), Step::Pending);
        assert_eq!(rig.state(), State::StartApplication);
        match rig.poll() {
            Step::Launch(app) => assert_eq!(app.table, layout.app_start),
            Step::Pending => panic!("{}: not launched", style.name),
        }
        assert!(rig.engine.controller().is_locked_now());
    }
}

#[test]
fn garbage_does_not_count_as_idle() {
    let mut rig = Rig::new(&F031X4_PILOT);
    rig.link.host_bytes(&[0x55, 0xaa]);
    assert_eq!(rig.drive_to(State::VerifyApplication), FAST.app_start_ticks as usize + 3);
}

#[test]
fn stalled_states_return_to_default() {
    let stall = FAST.boot_timeout_ticks as usize + 1;

    let mut rig = Rig::new(&F031X4_PILOT);
    rig.command(Command::EnterBootloadMode, State::EraseCommand);
    let resets = rig.link.resets();
    assert_eq!(rig.drive_to(State::Default), stall);
    assert_eq!(rig.link.resets(), resets + 1);

    let mut rig = Rig::new(&F031X4_PILOT);
    rig.command(Command::EnterBootloadMode, State::EraseCommand);
    rig.command(Command::EraseFlash, State::WriteMemoryCommand);
    assert_eq!(rig.drive_to(State::Default), stall);

    let mut rig = Rig::new(&F031X4_PILOT);
    rig.open();
    let resets = rig.link.resets();
    assert_eq!(rig.drive_to(State::Default), stall);
    // The receiver was restarted along the way.
    assert!(rig.link.resets() > resets);

    let mut rig = Rig::new(&F031X4_PILOT);
    let layout = *rig.engine.layout();
    let img = GenBuilder::default().build(&layout).unwrap();
    rig.open();
    let last = img.payloads(&layout).pop().unwrap();
    assert_eq!(rig.payload(&last), Some(Response::Ok));
    assert_eq!(rig.state(), State::FinishUpdate);
    assert_eq!(rig.drive_to(State::Default), stall);
}

#[test]
fn stall_drops_partial_frame() {
    let mut rig = Rig::new(&F031X4_PILOT);
    rig.open();

    // Part of a payload, then stuck until the watchdog gives up.
    let payload = Payload::new(0, [0x77; BLOCK_SIZE]).encode();
    rig.link.host_bytes(&payload[..30]);
    rig.link.set_idle_limit(u32::MAX);
    rig.drive_to(State::Default);

    // The next command is read from its first byte.
    rig.link.host_command(Command::EnterBootloadMode);
    rig.poll();
    rig.poll();
    assert_eq!(rig.state(), State::EraseCommand);
    assert_eq!(rig.link.responses(), vec![Some(Response::Ready)]);
}

#[test]
fn slow_bytes_complete_frame() {
    let timing = Timing {
        boot_timeout_ticks: 100_000,
        ..FAST
    };
    let gap = timing.two_bytes_ticks as usize + 50;
    let mut rig = Rig::with_timing(&F031X4_PILOT, timing);
    rig.open();
    let resets = rig.link.resets();

    let frame = Payload::new(0, [0x3c; BLOCK_SIZE]).encode();
    let (last, body) = frame.split_last().unwrap();
    for byte in body {
        rig.link.host_bytes(&[*byte]);
        for _ in 0..=gap {
            assert_eq!(rig.poll(), Step::Pending);
            assert_eq!(rig.state(), State::PayloadReceive);
        }
    }
    rig.link.host_bytes(&[*last]);
    assert_eq!(rig.poll(), Step::Pending);
    assert_eq!(rig.state(), State::PayloadCheck);
    assert_eq!(rig.link.resets(), resets);

    assert_eq!(rig.poll(), Step::Pending);
    assert_eq!(rig.link.responses(), vec![Some(Response::Ok)]);
    assert_eq!(rig.engine.controller().program_count(), BLOCK_SIZE / 2);
}

#[test]
fn receive_timeouts_restart_frame() {
    let mut rig = Rig::new(&F031X4_PILOT);
    rig.open();
    let resets = rig.link.resets();

    let payload = Payload::new(0, [0x77; BLOCK_SIZE]);
    rig.link.host_bytes(&payload.encode()[..30]);
    for _ in 0..30 {
        rig.poll();
    }
    assert_eq!(rig.link.pending(), 0);

    // Up to the budget the partial frame is kept.
    for _ in 0..FAST.two_bytes_ticks {
        rig.link.inject(TransportError::RecvTimeout);
        rig.poll();
    }
    assert_eq!(rig.link.resets(), resets);

    // One more and the receiver starts over.
    rig.link.inject(TransportError::RecvTimeout);
    rig.poll();
    assert_eq!(rig.link.resets(), resets + 1);
    assert_eq!(rig.state(), State::PayloadReceive);

    assert_eq!(rig.payload(&payload), Some(Response::Ok));
}

/// Random traffic never launches anything that was not just verified.
#[test]
fn launch_only_after_verify() {
    let mut rng = Xoshiro256Plus::seed_from_u64(0x5eed);
    let commands = [
        Command::EnterBootloadMode,
        Command::EraseFlash,
        Command::WriteMemory,
        Command::Finish,
    ];

    for round in 0..20 {
        let mut rig = Rig::new(&F031X4_PILOT);
        let layout = *rig.engine.layout();
        let img = GenBuilder::default().seed(round).build(&layout).unwrap();
        rig.engine.controller_mut().install(&img.region(&layout), layout.app_start).unwrap();
        let payloads = img.payloads(&layout);

        let mut previous = rig.state();
        let mut launched = false;
        for _ in 0..20_000 {
            if rig.link.pending() == 0 && rng.gen_ratio(1, 8) {
                match rng.gen_range(0..4) {
                    0 => rig.link.host_command(commands[rng.gen_range(0..commands.len())]),
                    1 => rig.link.host_payload(&payloads[rng.gen_range(0..payloads.len())]),
                    2 => rig.link.host_bytes(&[rng.gen::<u8>(), rng.gen::<u8>()]),
                    _ => {}
                }
            }

            let step = rig.poll();
            let replies = rig.link.responses();
            let state = rig.state();

            if let Step::Launch(app) = step {
                assert_eq!(previous, State::StartApplication, "round {}", round);
                assert_eq!(app.table, layout.app_start);
                launched = true;
                break;
            }
            if state == State::StartApplication && previous != State::StartApplication {
                assert_eq!(previous, State::VerifyApplication, "round {}", round);
                assert_eq!(replies, vec![Some(Response::Ok)], "round {}", round);
            }
            previous = state;
        }
        println!("round {}: launched {}", round, launched);
    }
}

struct Catch;

impl HandOff for Catch {
    fn start_application(&mut self, app: &AppVectors) -> ! {
        panic::panic_any(*app)
    }
}

#[test]
fn run_hands_off() {
    let mut link = SimLink::new(F031X4_PILOT.kind, FAST);
    let flash = F031X4_PILOT.build().unwrap();
    let mut engine = FlashEngine::init(flash, &STM32F0, F031X4_PILOT.kind).unwrap();
    let layout = *engine.layout();
    let img = GenBuilder::default().build(&layout).unwrap();
    engine.controller_mut().install(&img.region(&layout), layout.app_start).unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        boot::run(&mut link, &mut engine, &mut Catch);
    }));
    let app = *result.unwrap_err().downcast::<AppVectors>().unwrap();

    assert_eq!(app.table, layout.app_start);
    assert_eq!(app.words, STM32F0.vector_table_words);
    assert_eq!(link.inits(), 1);
    assert_eq!(link.kind(), F031X4_PILOT.kind);
    assert!(engine.controller().is_locked_now());
}
