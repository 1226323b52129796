// This file is part of breadbin.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;
use std::sync::Arc;

use bit_field::BitField;

use breadbin_core::device::cartridge::Cartridge;
use breadbin_core::device::{Datassette, Joystick, Keyboard};
use breadbin_core::drive::{Disk, DriveEvent, Vc1541};
use breadbin_core::factory::*;
use breadbin_core::mem::{ExpansionPort, Pla};
use breadbin_core::sound::{SamplingMethod, Sid};
use breadbin_core::util::*;

use super::breakpoint::BreakpointManager;
use super::message::{Message, MessageQueue};
use super::snapshot;
use super::{C64Factory, Config, Error, FrameBuffer, Palette, SoundBuffer};

// Design:
//   C64 owns the whole machine and advances it one system cycle at a time in
//   the hardware phase order: VIC (phi1 fetches and BA), CIA 1, CIA 2, CPU,
//   expansion port, floppy, datassette, then the counters and the
//   end-of-line / end-of-frame hooks. Side effects of one component's cycle
//   N become visible to every other component in cycle N+1, through the
//   delayed registers where the silicon has a latch and through this fixed
//   order everywhere else.

/// Size of the back-in-time snapshot ring (one entry every 4 seconds).
const HISTORY_SIZE: usize = 16;
const HISTORY_INTERVAL_SECS: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExecState {
    Continue,
    Halted,
}

pub struct C64 {
    // Dependencies
    config: Rc<Config>,
    // Chipset
    cpu: Box<dyn Cpu>,
    cia_1: Shared<dyn Chip>,
    cia_2: Shared<dyn Chip>,
    sid: Shared<Sid>,
    vic: Shared<dyn Chip>,
    // Memory
    color_ram: Shared<Ram>,
    expansion_port: Shared<ExpansionPort>,
    ram: Shared<Ram>,
    rom_basic: Shared<Rom>,
    rom_charset: Shared<Rom>,
    rom_kernal: Shared<Rom>,
    rom_mask: u8,
    // Peripherals
    datassette: Shared<Datassette>,
    drive: Vc1541,
    joystick_1: Joystick,
    joystick_2: Joystick,
    keyboard: Keyboard,
    // Buffers
    frame_buffer: Shared<FrameBuffer>,
    sound_buffer: Arc<SoundBuffer>,
    // I/O lines
    cia_2_port_a: Shared<IoPort>,
    // Runtime State
    breakpoints: BreakpointManager,
    clock: Rc<Clock>,
    cycle_duration_ps: u64,
    frame_count: u32,
    rasterline: u16,
    rasterline_cycle: u16,
    cycles_per_line: u16,
    lines_per_frame: u16,
    warp: bool,
    always_warp: bool,
    suspended: bool,
    halt_announced: bool,
    last_watchpoint: Option<WatchpointHit>,
    history: Vec<Vec<u8>>,
    history_index: usize,
    queue: MessageQueue,
    vsync_flag: SharedCell<bool>,
}

impl C64 {
    pub fn build(config: Rc<Config>) -> C64 {
        Self::build_with_queue(config, MessageQueue::new())
    }

    /// Build the machine around an existing message queue so the host's
    /// listener survives a model switch.
    pub fn build_with_queue(config: Rc<Config>, queue: MessageQueue) -> C64 {
        info!(target: "c64", "Initializing system");
        let factory = C64Factory::new();
        let model = config.model;
        // Buffers
        let clock = Rc::new(Clock::default());
        let joystick_1_state = new_shared_cell(0u8);
        let joystick_2_state = new_shared_cell(0u8);
        let keyboard_matrix = new_shared([0xff; 16]);
        let vsync_flag = new_shared_cell(false);
        let vic_base_address = new_shared_cell(0u16);
        let vic_data_bus = new_shared_cell(0u8);
        let frame_buffer = new_shared(FrameBuffer::new(
            model.frame_buffer_size.0,
            model.frame_buffer_size.1,
            Palette::default(),
        ));
        let sound_buffer = Arc::new(SoundBuffer::new(config.sound.buffer_size));

        // I/O Lines
        let rdy_line = new_shared(IrqLine::new("rdy"));
        let cpu_io_port = new_shared(IoPort::new(0x00, 0xff));
        let cia_1_flag_pin = new_shared(Pin::new_low());
        let cia_1_port_a = new_shared(IoPort::new(0x00, 0xff));
        let cia_1_port_b = new_shared(IoPort::new(0x00, 0xff));
        let cia_2_flag_pin = new_shared(Pin::new_low());
        let cia_2_port_a = new_shared(IoPort::new(0x00, 0xff));
        let cia_2_port_b = new_shared(IoPort::new(0x00, 0xff));
        let exp_io_line = new_shared(IoPort::new(0xff, 0xff));
        let irq_line = new_shared(IrqLine::new("irq"));
        let nmi_line = new_shared(IrqLine::new("nmi"));

        // Memory
        let color_ram = factory.new_ram(model.color_ram);
        let ram = factory.new_ram(model.memory_size);
        let rom_basic = factory.new_rom(&vec![0; RomKind::Basic.size()], 0);
        let rom_charset = factory.new_rom(&vec![0; RomKind::Charset.size()], 0);
        let rom_kernal = factory.new_rom(&vec![0; RomKind::Kernal.size()], 0);

        // Chipset
        let cia_1 = factory.new_cia_1(
            joystick_1_state.clone(),
            joystick_2_state.clone(),
            keyboard_matrix.clone(),
            cia_1_port_a.clone(),
            cia_1_port_b.clone(),
            cia_1_flag_pin.clone(),
            irq_line.clone(),
        );
        let cia_2 = factory.new_cia_2(
            cia_2_port_a.clone(),
            cia_2_port_b.clone(),
            cia_2_flag_pin.clone(),
            nmi_line.clone(),
        );
        let sid = new_shared(Sid::new(
            model.sid_model,
            clock.clone(),
            sound_buffer.clone(),
        ));
        sid.borrow_mut().set_sampling_parameters(
            SamplingMethod::ResampleFast,
            model.cpu_freq,
            config.sound.sample_rate,
        );
        sid.borrow_mut().enable_filter(config.sound.sid_filters);
        let fb_output: Shared<dyn VideoOutput> = frame_buffer.clone();
        let vic = factory.new_vic(
            model.vic_model,
            color_ram.clone(),
            ram.clone(),
            rom_charset.clone(),
            vic_base_address.clone(),
            vic_data_bus.clone(),
            fb_output,
            vsync_flag.clone(),
            rdy_line.clone(),
            irq_line.clone(),
        );

        // Memory Controller and Processor
        let expansion_port = new_shared(ExpansionPort::new(
            exp_io_line.clone(),
            nmi_line.clone(),
            clock.clone(),
        ));
        let mmu = new_shared(Pla::new());
        let sid_chip: Shared<dyn Chip> = sid.clone();
        let mem = factory.new_memory(
            mmu.clone(),
            cia_1.clone(),
            cia_2.clone(),
            color_ram.clone(),
            expansion_port.clone(),
            ram.clone(),
            rom_basic.clone(),
            rom_charset.clone(),
            rom_kernal.clone(),
            sid_chip,
            vic.clone(),
            vic_data_bus.clone(),
        );
        let cpu = factory.new_cpu(
            mem,
            cpu_io_port.clone(),
            rdy_line.clone(),
            irq_line.clone(),
            nmi_line.clone(),
            vic_data_bus.clone(),
            clock.clone(),
        );

        // Peripherals
        let datassette = new_shared(Datassette::new(cia_1_flag_pin, cpu_io_port.clone()));
        let drive = Vc1541::new();
        let joystick_1 = Joystick::new(joystick_1_state);
        let joystick_2 = Joystick::new(joystick_2_state);
        let keyboard = Keyboard::new(keyboard_matrix, nmi_line.clone());

        // Observers
        let exp_io_line_clone_1 = exp_io_line.clone();
        let mmu_clone_1 = mmu.clone();
        cpu_io_port
            .borrow_mut()
            .set_observer(Box::new(move |cpu_port| {
                let expansion_port_io = exp_io_line_clone_1.borrow().get_value();
                let mode = cpu_port & 0x07 | expansion_port_io & 0x18;
                mmu_clone_1.borrow_mut().switch_banks(mode);
            }));
        let cpu_io_port_clone_2 = cpu_io_port.clone();
        let mmu_clone_2 = mmu.clone();
        exp_io_line
            .borrow_mut()
            .set_observer(Box::new(move |expansion_port_io| {
                let cpu_port_io = cpu_io_port_clone_2.borrow().get_value();
                let mode = cpu_port_io & 0x07 | expansion_port_io & 0x18;
                mmu_clone_2.borrow_mut().switch_banks(mode);
            }));
        let vic_base_address_clone = vic_base_address.clone();
        cia_2_port_a
            .borrow_mut()
            .set_observer(Box::new(move |value| {
                let base_address = u16::from(!value & 0x03) << 14;
                vic_base_address_clone.set(base_address);
            }));

        let cycles_per_line = (model.cycles_per_frame
            / u32::from(model.frame_buffer_size.1 as u16)) as u16;
        let lines_per_frame = model.frame_buffer_size.1 as u16;
        let cycle_duration_ps = 1_000_000_000_000 / u64::from(model.cpu_freq);
        let basic_data = config.roms.basic.clone();
        let charset_data = config.roms.charset.clone();
        let kernal_data = config.roms.kernal.clone();
        let drive_data = config.roms.drive.clone();
        let mut c64 = C64 {
            config,
            cpu,
            cia_1,
            cia_2,
            sid,
            vic,
            color_ram,
            expansion_port,
            ram,
            rom_basic,
            rom_charset,
            rom_kernal,
            rom_mask: 0,
            datassette,
            drive,
            joystick_1,
            joystick_2,
            keyboard,
            frame_buffer,
            sound_buffer,
            cia_2_port_a,
            breakpoints: BreakpointManager::default(),
            clock,
            cycle_duration_ps,
            frame_count: 0,
            rasterline: 0,
            rasterline_cycle: 1,
            cycles_per_line,
            lines_per_frame,
            warp: false,
            always_warp: false,
            suspended: true,
            halt_announced: false,
            last_watchpoint: None,
            history: Vec::new(),
            history_index: 0,
            queue,
            vsync_flag,
        };
        for (kind, data) in [
            (RomKind::Basic, basic_data),
            (RomKind::Charset, charset_data),
            (RomKind::Kernal, kernal_data),
            (RomKind::Drive, drive_data),
        ]
        .iter()
        {
            if !data.is_empty() {
                if let Err(error) = c64.load_rom(*kind, data) {
                    warn!(target: "c64", "Rom load failed: {}", error);
                }
            }
        }
        c64
    }

    // -- Accessors

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_clock(&self) -> Rc<Clock> {
        self.clock.clone()
    }

    pub fn get_cycles(&self) -> u64 {
        self.clock.get()
    }

    pub fn get_cpu(&self) -> &dyn Cpu {
        &*self.cpu
    }

    pub fn get_cpu_mut(&mut self) -> &mut dyn Cpu {
        &mut *self.cpu
    }

    pub fn get_cia_1(&self) -> Shared<dyn Chip> {
        self.cia_1.clone()
    }

    pub fn get_cia_2(&self) -> Shared<dyn Chip> {
        self.cia_2.clone()
    }

    pub fn get_vic(&self) -> Shared<dyn Chip> {
        self.vic.clone()
    }

    pub fn get_drive(&self) -> &Vc1541 {
        &self.drive
    }

    pub fn get_drive_mut(&mut self) -> &mut Vc1541 {
        &mut self.drive
    }

    pub fn get_datassette(&self) -> Shared<Datassette> {
        self.datassette.clone()
    }

    pub fn get_keyboard(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    pub fn get_joystick_1(&mut self) -> &mut Joystick {
        &mut self.joystick_1
    }

    pub fn get_joystick_2(&mut self) -> &mut Joystick {
        &mut self.joystick_2
    }

    pub fn get_frame_buffer(&self) -> Shared<FrameBuffer> {
        self.frame_buffer.clone()
    }

    pub fn get_sound_buffer(&self) -> Arc<SoundBuffer> {
        self.sound_buffer.clone()
    }

    pub fn get_frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn get_bpm(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    pub fn get_bpm_mut(&mut self) -> &mut BreakpointManager {
        &mut self.breakpoints
    }

    pub fn get_last_watchpoint(&self) -> Option<WatchpointHit> {
        self.last_watchpoint
    }

    pub fn is_warp(&self) -> bool {
        self.warp
    }

    pub fn is_cpu_jammed(&self) -> bool {
        self.cpu.is_jammed()
    }

    pub fn get_vsync(&self) -> bool {
        self.vsync_flag.get()
    }

    pub fn reset_vsync(&self) {
        self.vsync_flag.set(false);
    }

    /// Sync watchpoint configuration into the CPU's fast-path flag.
    pub fn sync_debugger(&mut self) {
        let wp = self.breakpoints.watchpoints();
        let enabled = !wp.is_empty();
        self.cpu.set_watchpoints(wp);
        self.cpu.set_debug_enabled(enabled);
    }

    // -- Messages

    pub fn put_message(&self, message: Message) {
        self.queue.put(message);
    }

    pub fn poll_message(&self) -> Option<Message> {
        self.queue.poll()
    }

    pub fn message_listener(&self) -> crossbeam_channel::Receiver<Message> {
        self.queue.listener()
    }

    // -- Lifecycle

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn check_roms(&self) -> Result<(), Error> {
        let missing = !self.rom_mask & 0x0f;
        if missing != 0 {
            Err(Error::RomMissing(missing))
        } else {
            Ok(())
        }
    }

    pub fn load_rom(&mut self, kind: RomKind, data: &[u8]) -> Result<(), Error> {
        debug_assert!(self.suspended, "rom loading requires the suspended state");
        if data.len() != kind.size() {
            return Err(Error::ImageInvalid("rom size mismatch"));
        }
        match kind {
            RomKind::Basic => self.rom_basic.borrow_mut().load(data),
            RomKind::Charset => self.rom_charset.borrow_mut().load(data),
            RomKind::Kernal => self.rom_kernal.borrow_mut().load(data),
            RomKind::Drive => self.drive.load_rom(data),
        }
        self.rom_mask.set_bit(rom_bit(kind), true);
        self.queue.put(Message::RomLoaded(kind));
        if self.rom_mask & 0x0f == 0x0f {
            self.queue.put(Message::RomComplete);
        }
        Ok(())
    }

    pub fn load_ram(&mut self, data: &[u8], offset: u16) {
        let mut mem = self.ram.borrow_mut();
        let mut address = offset;
        for byte in data {
            mem.write(address, *byte);
            address = address.wrapping_add(1);
        }
    }

    pub fn reset(&mut self, hard: bool) {
        info!(target: "c64", "Resetting system");
        self.clock.reset();
        // Memory
        if hard {
            self.ram.borrow_mut().fill(0x00);
            self.color_ram.borrow_mut().fill(0x00);
        }
        // Chipset
        self.cpu.reset();
        self.cia_1.borrow_mut().reset();
        self.cia_2.borrow_mut().reset();
        self.sid.borrow_mut().reset();
        self.vic.borrow_mut().reset();
        // I/O
        self.expansion_port.borrow_mut().reset();
        // Peripherals
        self.datassette.borrow_mut().reset();
        self.drive.reset();
        self.joystick_1.reset();
        self.joystick_2.reset();
        self.keyboard.reset();
        self.frame_buffer.borrow_mut().reset();
        self.sound_buffer.reset();
        // Runtime State
        self.frame_count = 0;
        self.rasterline = 0;
        self.rasterline_cycle = 1;
        self.halt_announced = false;
        self.last_watchpoint = None;
        self.vsync_flag.set(false);
    }

    // -- Peripheral Ops

    pub fn attach_cartridge(&mut self, cartridge: Cartridge) {
        debug_assert!(self.suspended, "cartridge insertion requires the suspended state");
        self.expansion_port.borrow_mut().attach(cartridge);
        self.queue.put(Message::Cartridge(true));
    }

    pub fn detach_cartridge(&mut self) {
        debug_assert!(self.suspended, "cartridge removal requires the suspended state");
        self.expansion_port.borrow_mut().detach();
        self.queue.put(Message::Cartridge(false));
        self.reset(false);
    }

    pub fn insert_disk(&mut self, disk: Disk) {
        debug_assert!(self.suspended, "disk insertion requires the suspended state");
        self.drive.insert_disk(disk);
    }

    pub fn eject_disk(&mut self) {
        debug_assert!(self.suspended, "disk removal requires the suspended state");
        self.drive.eject_disk();
    }

    pub fn attach_tape(&mut self, tape: Box<dyn Tape>) {
        self.datassette.borrow_mut().attach(tape);
        self.queue.put(Message::Vc1530Tape);
    }

    pub fn detach_tape(&mut self) {
        self.datassette.borrow_mut().detach();
        self.queue.put(Message::Vc1530NoTape);
    }

    pub fn set_warp(&mut self, warp: bool) {
        if self.warp == warp {
            return;
        }
        self.warp = warp;
        /* Warping puts audio out of sync, so SID is silenced during warp and
           faded back in afterwards. */
        if warp {
            self.sid.borrow_mut().ramp_down();
        } else {
            self.sid.borrow_mut().ramp_up();
        }
        self.queue.put(Message::Warp(warp));
    }

    pub fn set_always_warp(&mut self, always_warp: bool) {
        if self.always_warp != always_warp {
            self.always_warp = always_warp;
            self.set_warp(always_warp);
            self.queue.put(Message::AlwaysWarp(always_warp));
        }
    }

    // -- Execution

    #[inline]
    pub fn step_one_cycle(&mut self) -> ExecState {
        self.vic.borrow_mut().clock();
        self.cia_1.borrow_mut().clock();
        self.cia_2.borrow_mut().clock();
        self.cpu.clock();
        self.expansion_port.borrow_mut().clock();
        self.drive.execute(self.cycle_duration_ps);
        self.datassette.borrow_mut().clock();
        self.update_iec();
        self.clock.tick();
        self.rasterline_cycle += 1;
        if self.rasterline_cycle > self.cycles_per_line {
            self.end_of_line();
        }
        if self.cpu.is_jammed() {
            if !self.halt_announced {
                self.halt_announced = true;
                self.queue.put(Message::Halt);
            }
            return ExecState::Halted;
        }
        if self.cpu.at_instruction_boundary() {
            if self.breakpoints.is_bp_present() {
                let pc = self.cpu.get_frozen_pc();
                if self.breakpoints.check(pc).is_some() {
                    return ExecState::Halted;
                }
            }
            if let Some(hit) = self.cpu.take_watchpoint_hit() {
                self.last_watchpoint = Some(hit);
                return ExecState::Halted;
            }
        }
        ExecState::Continue
    }

    /// Run to the next instruction boundary; restores a clean stop point.
    pub fn step_one_instruction(&mut self) -> ExecState {
        loop {
            let state = self.step_one_cycle();
            if self.cpu.at_instruction_boundary() || state == ExecState::Halted {
                return state;
            }
        }
    }

    pub fn step_one_line(&mut self) -> ExecState {
        loop {
            if let ExecState::Halted = self.step_one_cycle() {
                return ExecState::Halted;
            }
            if self.rasterline_cycle == 1 {
                return ExecState::Continue;
            }
        }
    }

    pub fn step_one_frame(&mut self) -> ExecState {
        loop {
            if let ExecState::Halted = self.step_one_cycle() {
                return ExecState::Halted;
            }
            if self.vsync_flag.get() {
                return ExecState::Continue;
            }
        }
    }

    fn end_of_line(&mut self) {
        self.rasterline_cycle = 1;
        self.rasterline += 1;
        // Catch the audio pipeline up to the end of the line.
        self.sid.borrow_mut().process_vsync();
        if self.rasterline >= self.lines_per_frame {
            self.rasterline = 0;
            self.end_of_frame();
        }
    }

    fn end_of_frame(&mut self) {
        self.frame_count = self.frame_count.wrapping_add(1);
        let fps = self.config.model.frames_per_second();
        // Time of day clocks tick every tenth of a second.
        if self.frame_count % (fps / 10).max(1) == 0 {
            self.cia_1.borrow_mut().process_vsync();
            self.cia_2.borrow_mut().process_vsync();
        }
        // Back-in-time snapshot every few seconds of emulated time.
        if self.frame_count % (fps * HISTORY_INTERVAL_SECS).max(1) == 0 {
            self.take_history_snapshot();
        }
        for event in self.drive.drain_events() {
            self.queue.put(map_drive_event(event));
        }
        let (playing, progress) = {
            let datassette = self.datassette.borrow();
            (datassette.is_playing(), datassette.progress())
        };
        if playing {
            self.queue.put(Message::Vc1530Progress(progress));
        }
    }

    /* The IEC lines are wired-AND: a bit written as 1 on either side pulls
       the line low through its inverting driver. The drive reads ATN back
       inverted, and the ATNA flip-flop pulls DATA while it disagrees with
       ATN. */
    fn update_iec(&mut self) {
        let cia2_out = self.cia_2_port_a.borrow().get_value();
        let via_1 = self.drive.get_via_1();
        let via_port_b = via_1.borrow().get_port_b();
        let via_out = via_port_b.borrow().get_value();
        let atn_low = cia2_out.get_bit(3);
        let atna = via_out.get_bit(4);
        let clock_low = cia2_out.get_bit(4) || via_out.get_bit(3);
        let data_low = cia2_out.get_bit(5) || via_out.get_bit(1) || (atn_low && !atna);
        self.cia_2_port_a.borrow_mut().set_input(
            0x3f | ((!clock_low as u8) << 6) | ((!data_low as u8) << 7),
        );
        let mut drive_in = 0xffu8;
        drive_in.set_bit(0, !data_low);
        drive_in.set_bit(2, !clock_low);
        drive_in.set_bit(7, atn_low);
        via_port_b.borrow_mut().set_input(drive_in);
    }

    // -- Snapshots

    pub fn take_snapshot(&self) -> Vec<u8> {
        snapshot::save(self)
    }

    pub fn restore_snapshot(&mut self, data: &[u8]) -> Result<(), Error> {
        snapshot::restore(self, data)
    }

    fn take_history_snapshot(&mut self) {
        let data = self.take_snapshot();
        if self.history.len() < HISTORY_SIZE {
            self.history.push(data);
            self.history_index = self.history.len() - 1;
        } else {
            self.history_index = (self.history_index + 1) % HISTORY_SIZE;
            self.history[self.history_index] = data;
        }
    }

    /// Historic snapshot `nr` entries back in time, 0 being the newest.
    pub fn history_snapshot(&self, nr: usize) -> Option<&[u8]> {
        if nr >= self.history.len() {
            return None;
        }
        let pos = (self.history.len() + self.history_index - nr) % self.history.len();
        self.history.get(pos).map(|data| data.as_slice())
    }

    // -- Snapshot internals, used by the snapshot module

    pub(crate) fn snapshot_parts(
        &self,
    ) -> (
        &Shared<Ram>,
        &Shared<Ram>,
        &dyn Cpu,
        &Shared<dyn Chip>,
        &Shared<dyn Chip>,
        &Shared<Sid>,
        &Shared<dyn Chip>,
        &Vc1541,
    ) {
        (
            &self.ram,
            &self.color_ram,
            &*self.cpu,
            &self.cia_1,
            &self.cia_2,
            &self.sid,
            &self.vic,
            &self.drive,
        )
    }

    pub(crate) fn snapshot_parts_mut(
        &mut self,
    ) -> (
        &Shared<Ram>,
        &Shared<Ram>,
        &mut dyn Cpu,
        &Shared<dyn Chip>,
        &Shared<dyn Chip>,
        &Shared<Sid>,
        &Shared<dyn Chip>,
        &mut Vc1541,
    ) {
        (
            &self.ram,
            &self.color_ram,
            &mut *self.cpu,
            &self.cia_1,
            &self.cia_2,
            &self.sid,
            &self.vic,
            &mut self.drive,
        )
    }

    pub(crate) fn snapshot_counters(&self) -> (u64, u32, u16, u16) {
        (
            self.clock.get(),
            self.frame_count,
            self.rasterline,
            self.rasterline_cycle,
        )
    }

    pub(crate) fn restore_counters(&mut self, cycles: u64, frame: u32, line: u16, cycle: u16) {
        self.clock.set(cycles);
        self.frame_count = frame;
        self.rasterline = line;
        self.rasterline_cycle = cycle;
        self.halt_announced = false;
        self.vsync_flag.set(false);
    }

    pub(crate) fn model_id(&self) -> u8 {
        match self.config.model.vic_model {
            VicModel::Mos6569 => 0,
            VicModel::Mos6567 => 1,
        }
    }

    pub(crate) fn screenshot(&self) -> Vec<u8> {
        self.frame_buffer.borrow().get_pixel_data().to_vec()
    }
}

fn rom_bit(kind: RomKind) -> usize {
    match kind {
        RomKind::Basic => 0,
        RomKind::Charset => 1,
        RomKind::Kernal => 2,
        RomKind::Drive => 3,
    }
}

fn map_drive_event(event: DriveEvent) -> Message {
    match event {
        DriveEvent::MotorOn => Message::Vc1541MotorOn,
        DriveEvent::MotorOff => Message::Vc1541MotorOff,
        DriveEvent::RedLedOn => Message::Vc1541RedLedOn,
        DriveEvent::RedLedOff => Message::Vc1541RedLedOff,
        DriveEvent::HeadUp => Message::Vc1541HeadUp,
        DriveEvent::HeadDown => Message::Vc1541HeadDown,
        DriveEvent::DiskInserted => Message::Vc1541Disk,
        DriveEvent::DiskEjected => Message::Vc1541NoDisk,
    }
}

/// Identify a ROM image by size and magic prefix.
pub fn identify_rom(data: &[u8]) -> Result<RomKind, Error> {
    match data.len() {
        0x1000 => Ok(RomKind::Charset),
        0x4000 => Ok(RomKind::Drive),
        0x2000 => {
            if data.starts_with(&[0x94, 0xe3, 0x7b]) {
                Ok(RomKind::Basic)
            } else if data.starts_with(&[0x85, 0x56, 0x20]) {
                Ok(RomKind::Kernal)
            } else {
                Err(Error::ImageInvalid("unrecognized 8K rom image"))
            }
        }
        _ => Err(Error::ImageInvalid("unrecognized rom size")),
    }
}
