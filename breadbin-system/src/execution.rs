// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use breadbin_core::device::cartridge::{Cartridge, Chip, ChipType, HwType};
use breadbin_core::drive::Disk;
use breadbin_core::factory::{RomKind, SystemModel, Tape};

use super::c64::{C64, ExecState};
use super::message::{Message, MessageQueue};
use super::pacer::Pacer;
use super::{Config, Error};

// Design:
//   The machine lives on a single dedicated worker thread; the host talks to
//   it through a command channel and observes it through the message queue.
//   Cancellation and pausing always complete the current instruction first
//   so the CPU is left at a clean boundary. Commands that reshape the
//   machine (ROMs, cartridge, disk, model) are honored only from the paused
//   state.

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum State {
    Starting,
    Running,
    Paused,
    Halted,
    Stopped,
}

/// Plain-data cartridge description, buildable off-thread.
pub struct CartridgeSpec {
    pub version: u16,
    pub hw_type: u8,
    pub exrom: bool,
    pub game: bool,
    pub chips: Vec<ChipSpec>,
}

pub struct ChipSpec {
    pub chip_type: u16,
    pub bank_number: u8,
    pub offset: u16,
    pub data: Vec<u8>,
}

impl CartridgeSpec {
    fn build(self) -> Cartridge {
        let mut cartridge = Cartridge::new(
            self.version,
            HwType::from(self.hw_type),
            self.exrom,
            self.game,
        );
        for chip in self.chips {
            let size = chip.data.len() as u16;
            cartridge.add(Chip {
                chip_type: ChipType::from(chip.chip_type),
                bank_number: chip.bank_number,
                offset: chip.offset,
                size,
                data: chip.data,
            });
        }
        cartridge
    }
}

pub enum Command {
    Run,
    Pause,
    Step,
    Reset(bool),
    Quit,
    SetWarp(bool),
    SetAlwaysWarp(bool),
    SetModel(SystemModel),
    LoadRom(RomKind, Vec<u8>),
    AttachCartridge(CartridgeSpec),
    DetachCartridge,
    InsertDisk(Disk),
    EjectDisk,
    AttachTape(Box<dyn Tape + Send>),
    DetachTape,
    TapePlay,
    TapeStop,
    KeyDown(u8, u8),
    KeyUp(u8, u8),
    Restore(bool),
    SetJoystick(u8, u8),
    TakeSnapshot(Sender<Vec<u8>>),
    RestoreSnapshot(Vec<u8>),
}

pub struct ExecutionEngine {
    thread: Option<JoinHandle<()>>,
    commands: Sender<Command>,
    messages: Receiver<Message>,
}

impl ExecutionEngine {
    pub fn launch(config: Config) -> Self {
        let (command_tx, command_rx) = unbounded();
        let (boot_tx, boot_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name("c64-worker".to_string())
            .spawn(move || {
                let queue = MessageQueue::new();
                boot_tx
                    .send(queue.listener())
                    .expect("host went away during startup");
                let c64 = C64::build_with_queue(Rc::new(config), queue.clone());
                Worker::new(c64, queue, command_rx).run();
            })
            .expect("failed to spawn worker thread");
        let messages = boot_rx.recv().expect("worker died during startup");
        ExecutionEngine {
            thread: Some(thread),
            commands: command_tx,
            messages,
        }
    }

    pub fn send(&self, command: Command) {
        let _ = self.commands.send(command);
    }

    pub fn poll_message(&self) -> Option<Message> {
        self.messages.try_recv().ok()
    }

    pub fn messages(&self) -> &Receiver<Message> {
        &self.messages
    }

    pub fn shutdown(mut self) {
        self.shutdown_internal();
    }

    fn shutdown_internal(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Command::Quit);
            let _ = thread.join();
        }
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        self.shutdown_internal();
    }
}

struct Worker {
    c64: C64,
    state: State,
    pacer: Pacer,
    queue: MessageQueue,
    commands: Receiver<Command>,
}

impl Worker {
    fn new(c64: C64, queue: MessageQueue, commands: Receiver<Command>) -> Self {
        let pacer = Pacer::new(c64.get_config().model.refresh_rate);
        Worker {
            c64,
            state: State::Starting,
            pacer,
            queue,
            commands,
        }
    }

    fn run(mut self) {
        info!(target: "c64", "Execution thread started");
        loop {
            while let Ok(command) = self.commands.try_recv() {
                self.handle(command);
            }
            match self.state {
                State::Running => self.run_frame(),
                State::Starting | State::Paused | State::Halted => {
                    match self.commands.recv_timeout(Duration::from_millis(20)) {
                        Ok(command) => self.handle(command),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            self.state = State::Stopped;
                        }
                    }
                }
                State::Stopped => break,
            }
            if self.state == State::Stopped {
                break;
            }
        }
        info!(target: "c64", "Execution thread terminated");
        self.c64.put_message(Message::Halt);
    }

    fn run_frame(&mut self) {
        match self.c64.step_one_frame() {
            ExecState::Continue => {
                self.c64.reset_vsync();
                if !self.c64.is_warp() {
                    self.pacer.sync();
                }
            }
            ExecState::Halted => {
                self.pause_at_boundary();
                self.state = State::Halted;
                if !self.c64.is_cpu_jammed() {
                    self.c64.put_message(Message::Halt);
                }
            }
        }
    }

    /// Finish the in-flight instruction so the CPU stops at a clean boundary.
    fn pause_at_boundary(&mut self) {
        if !self.c64.is_cpu_jammed() {
            while !self.c64.get_cpu().at_instruction_boundary() {
                let _ = self.c64.step_one_cycle();
            }
        }
        self.c64.set_suspended(true);
    }

    fn resume(&mut self) {
        match self.c64.check_roms() {
            Ok(()) => {
                self.c64.set_suspended(false);
                self.state = State::Running;
                self.pacer.restart();
                self.c64.put_message(Message::Run);
            }
            Err(Error::RomMissing(mask)) => {
                self.c64.put_message(Message::RomMissing(mask));
                self.state = State::Halted;
            }
            Err(_) => {
                self.state = State::Halted;
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Run => self.resume(),
            Command::Pause => {
                if self.state == State::Running {
                    self.pause_at_boundary();
                    self.state = State::Paused;
                }
            }
            Command::Step => {
                if self.state != State::Running {
                    self.c64.set_suspended(false);
                    let _ = self.c64.step_one_instruction();
                    self.c64.set_suspended(true);
                }
            }
            Command::Reset(hard) => {
                self.c64.reset(hard);
                if self.state == State::Running {
                    self.pacer.restart();
                }
            }
            Command::Quit => {
                if self.state == State::Running {
                    self.pause_at_boundary();
                }
                self.state = State::Stopped;
            }
            Command::SetWarp(warp) => self.c64.set_warp(warp),
            Command::SetAlwaysWarp(warp) => self.c64.set_always_warp(warp),
            Command::SetModel(model) => {
                if self.require_paused("model switching") {
                    // Rebuild the machine around the same message queue so
                    // the host's listener keeps working.
                    let old = self.c64.get_config();
                    let mut config = Config::new(model);
                    config.roms.basic = old.roms.basic.clone();
                    config.roms.charset = old.roms.charset.clone();
                    config.roms.kernal = old.roms.kernal.clone();
                    config.roms.drive = old.roms.drive.clone();
                    self.c64 = C64::build_with_queue(Rc::new(config), self.queue.clone());
                    self.c64.reset(false);
                    self.pacer = Pacer::new(model.refresh_rate);
                }
            }
            Command::LoadRom(kind, data) => {
                if self.require_paused("rom loading") {
                    if let Err(error) = self.c64.load_rom(kind, &data) {
                        warn!(target: "c64", "Rom load failed: {}", error);
                    }
                }
            }
            Command::AttachCartridge(spec) => {
                if self.require_paused("cartridge insertion") {
                    self.c64.attach_cartridge(spec.build());
                    self.c64.reset(false);
                }
            }
            Command::DetachCartridge => {
                if self.require_paused("cartridge removal") {
                    self.c64.detach_cartridge();
                }
            }
            Command::InsertDisk(disk) => {
                if self.require_paused("disk insertion") {
                    self.c64.insert_disk(disk);
                }
            }
            Command::EjectDisk => {
                if self.require_paused("disk removal") {
                    self.c64.eject_disk();
                }
            }
            Command::AttachTape(tape) => self.c64.attach_tape(tape),
            Command::DetachTape => self.c64.detach_tape(),
            Command::TapePlay => self.c64.get_datassette().borrow_mut().play(),
            Command::TapeStop => self.c64.get_datassette().borrow_mut().stop(),
            Command::KeyDown(row, col) => {
                self.c64.get_keyboard().set_key(row, col, true);
                self.c64.put_message(Message::KeyMatrix);
            }
            Command::KeyUp(row, col) => {
                self.c64.get_keyboard().set_key(row, col, false);
                self.c64.put_message(Message::KeyMatrix);
            }
            Command::Restore(pressed) => self.c64.get_keyboard().set_restore(pressed),
            Command::SetJoystick(port, state) => {
                let joystick = if port == 0 {
                    self.c64.get_joystick_1()
                } else {
                    self.c64.get_joystick_2()
                };
                joystick.set_state(state);
            }
            Command::TakeSnapshot(reply) => {
                let was_running = self.state == State::Running;
                if was_running {
                    self.pause_at_boundary();
                }
                let _ = reply.send(self.c64.take_snapshot());
                if was_running {
                    self.c64.set_suspended(false);
                }
            }
            Command::RestoreSnapshot(data) => {
                let was_running = self.state == State::Running;
                if was_running {
                    self.pause_at_boundary();
                }
                if let Err(error) = self.c64.restore_snapshot(&data) {
                    warn!(target: "c64", "Snapshot restore failed: {}", error);
                }
                if was_running {
                    self.c64.set_suspended(false);
                }
            }
        }
    }

    fn require_paused(&mut self, what: &str) -> bool {
        if self.state == State::Running {
            warn!(target: "c64", "Ignoring {}; machine must be paused", what);
            false
        } else {
            true
        }
    }
}
